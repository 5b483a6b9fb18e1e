//! Revenue goal tracking
//!
//! Goal progress is derived data: `actual`, `variance`, `percent_achieved`
//! and the on-track flags are recomputed from live charges on every read.
//! `on_track` follows the variance sign; `pace_on_track` compares against the
//! target pro-rated over the elapsed part of the window.

use crate::aggregation::DateRange;
use crate::error::{RevenueError, RevenueResult};
use crate::models::{Charge, GoalPeriod, RevenueGoal};
use crate::scoring::percent;
use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Create or replace a goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalRequest {
    pub organization_id: Uuid,
    /// Existing goal to update
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    pub period: GoalPeriod,
    pub start_date: NaiveDate,
    /// Derived from `period` when absent
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub target_amount: Decimal,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

pub struct GoalTracker;

impl GoalTracker {
    /// Last day of a goal window starting on `start`.
    pub fn period_end(period: GoalPeriod, start: NaiveDate) -> Option<NaiveDate> {
        let months = match period {
            GoalPeriod::Monthly => 1,
            GoalPeriod::Quarterly => 3,
            GoalPeriod::Annual => 12,
        };
        start
            .checked_add_months(Months::new(months))
            .map(|d| d - Duration::days(1))
    }

    /// Validate `request` and merge it over `existing`.
    pub fn build(
        request: &GoalRequest,
        existing: Option<&RevenueGoal>,
        now: DateTime<Utc>,
    ) -> RevenueResult<RevenueGoal> {
        if request.name.trim().is_empty() {
            return Err(RevenueError::Validation("Goal name is required".to_string()));
        }
        if request.target_amount <= Decimal::ZERO {
            return Err(RevenueError::Validation(
                "Goal target must be greater than zero".to_string(),
            ));
        }
        let end_date = match request.end_date {
            Some(end) => end,
            None => Self::period_end(request.period, request.start_date).ok_or_else(|| {
                RevenueError::Validation(format!("Cannot derive goal end from {}", request.start_date))
            })?,
        };
        DateRange::new(request.start_date, end_date)?;

        let base = existing.cloned().unwrap_or_else(|| RevenueGoal {
            id: request.id.unwrap_or_else(Uuid::new_v4),
            organization_id: request.organization_id,
            name: String::new(),
            period: request.period,
            start_date: request.start_date,
            end_date,
            target_amount: request.target_amount,
            actual_amount: Decimal::ZERO,
            variance: Decimal::ZERO,
            percent_achieved: Decimal::ZERO,
            on_track: false,
            pace_on_track: false,
            active: request.active,
            updated_at: None,
        });

        Ok(RevenueGoal {
            name: request.name.trim().to_string(),
            period: request.period,
            start_date: request.start_date,
            end_date,
            target_amount: request.target_amount,
            active: request.active,
            updated_at: Some(now),
            ..base
        })
    }

    /// Refresh derived progress fields from `charges` as of `as_of`.
    pub fn recompute(goal: &RevenueGoal, charges: &[Charge], as_of: NaiveDate) -> RevenueGoal {
        let through = as_of.min(goal.end_date);
        let actual: Decimal = charges
            .iter()
            .filter(|c| c.organization_id == goal.organization_id)
            .filter(|c| c.service_date >= goal.start_date && c.service_date <= through)
            .map(Charge::billed)
            .sum();

        let expected = goal.target_amount * elapsed_fraction(goal.start_date, goal.end_date, as_of);
        let variance = (actual - goal.target_amount).round_dp(2);
        RevenueGoal {
            actual_amount: actual.round_dp(2),
            variance,
            percent_achieved: percent(actual, goal.target_amount).round_dp(1),
            on_track: variance >= Decimal::ZERO,
            pace_on_track: actual >= expected,
            ..goal.clone()
        }
    }
}

/// Share of the goal window elapsed by `as_of`, inclusive of that day.
fn elapsed_fraction(start: NaiveDate, end: NaiveDate, as_of: NaiveDate) -> Decimal {
    if as_of < start {
        return Decimal::ZERO;
    }
    if as_of >= end {
        return Decimal::ONE;
    }
    let total = (end - start).num_days() + 1;
    let elapsed = (as_of - start).num_days() + 1;
    Decimal::from(elapsed) / Decimal::from(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChargeStatus;
    use rust_decimal_macros::dec;
    use std::collections::BTreeSet;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn charge(day: NaiveDate, fee: Decimal) -> Charge {
        Charge {
            id: Uuid::new_v4(),
            organization_id: Uuid::nil(),
            encounter_id: None,
            patient_id: Uuid::new_v4(),
            provider_id: Uuid::nil(),
            payer_id: None,
            code: "98940".to_string(),
            service_date: day,
            fee,
            units: 1,
            modifiers: BTreeSet::new(),
            adjustment: Decimal::ZERO,
            balance: Decimal::ZERO,
            status: ChargeStatus::Billed,
        }
    }

    fn request(target: Decimal) -> GoalRequest {
        GoalRequest {
            organization_id: Uuid::nil(),
            id: None,
            name: "April".to_string(),
            period: GoalPeriod::Monthly,
            start_date: date(4, 1),
            end_date: None,
            target_amount: target,
            active: true,
        }
    }

    #[test]
    fn test_build_derives_period_end() {
        let goal = GoalTracker::build(&request(dec!(30000)), None, Utc::now()).unwrap();
        assert_eq!(goal.end_date, date(4, 30));

        let mut quarterly = request(dec!(90000));
        quarterly.period = GoalPeriod::Quarterly;
        let goal = GoalTracker::build(&quarterly, None, Utc::now()).unwrap();
        assert_eq!(goal.end_date, date(6, 30));
    }

    #[test]
    fn test_build_rejects_bad_input() {
        assert!(matches!(
            GoalTracker::build(&request(Decimal::ZERO), None, Utc::now()),
            Err(RevenueError::Validation(_))
        ));
        let mut backwards = request(dec!(100));
        backwards.end_date = Some(date(3, 1));
        assert!(GoalTracker::build(&backwards, None, Utc::now()).is_err());
    }

    #[test]
    fn test_build_keeps_identity_on_update() {
        let original = GoalTracker::build(&request(dec!(30000)), None, Utc::now()).unwrap();
        let mut update = request(dec!(40000));
        update.id = Some(original.id);
        let updated = GoalTracker::build(&update, Some(&original), Utc::now()).unwrap();
        assert_eq!(updated.id, original.id);
        assert_eq!(updated.target_amount, dec!(40000));
    }

    #[test]
    fn test_recompute_splits_target_and_pace() {
        let goal = GoalTracker::build(&request(dec!(30000)), None, Utc::now()).unwrap();
        let charges = vec![
            charge(date(4, 5), dec!(8000)),
            charge(date(4, 12), dec!(8000)),
            charge(date(3, 31), dec!(9999)),
        ];

        // half the month elapsed, 16000 billed against 15000 expected
        let progress = GoalTracker::recompute(&goal, &charges, date(4, 15));
        assert_eq!(progress.actual_amount, dec!(16000));
        assert_eq!(progress.variance, dec!(-14000));
        assert_eq!(progress.percent_achieved, dec!(53.3));
        assert!(!progress.on_track);
        assert!(progress.pace_on_track);

        let month_end = GoalTracker::recompute(&goal, &charges, date(4, 30));
        assert!(!month_end.on_track);
        assert!(!month_end.pace_on_track);
    }

    #[test]
    fn test_on_track_matches_variance_sign() {
        let goal = GoalTracker::build(&request(dec!(16000)), None, Utc::now()).unwrap();
        let charges = vec![charge(date(4, 5), dec!(8000)), charge(date(4, 12), dec!(8000))];

        let met = GoalTracker::recompute(&goal, &charges, date(4, 20));
        assert_eq!(met.variance, Decimal::ZERO);
        assert!(met.on_track);

        let short = GoalTracker::recompute(&goal, &charges[..1], date(4, 10));
        assert!(short.variance < Decimal::ZERO);
        assert!(!short.on_track);
        // 8000 billed against 10 of 30 days of a 16000 target
        assert!(short.pace_on_track);
    }

    #[test]
    fn test_elapsed_fraction_bounds() {
        assert_eq!(elapsed_fraction(date(4, 1), date(4, 30), date(3, 1)), Decimal::ZERO);
        assert_eq!(elapsed_fraction(date(4, 1), date(4, 30), date(5, 1)), Decimal::ONE);
        assert_eq!(elapsed_fraction(date(4, 1), date(4, 30), date(4, 15)), dec!(0.5));
    }
}
