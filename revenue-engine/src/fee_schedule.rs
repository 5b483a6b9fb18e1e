//! Fee schedule optimization
//!
//! Recommendations only ever raise a fee. Each benchmark check that applies
//! sets a floor; the recommended fee is the largest floor (or the current
//! fee), so it moves monotonically with the benchmarks.

use crate::aggregation::{DateRange, Dimension, GroupKey, LineTotals, RevenueSnapshot};
use crate::benchmarks::BenchmarkTables;
use crate::config::EngineConfig;
use crate::error::{RevenueError, RevenueResult};
use crate::findings::FeeScheduleAnalysis;
use crate::lifecycle::FeeAnalysisStatus;
use crate::models::{FeeSchedule, FeeScheduleItem};
use crate::scoring::{money, percent, rank_key, Confidence, Priority, PriorityThresholds, MAX_CONFIDENCE};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Confidence lost when a code has no benchmark to compare against
const MISSING_BENCHMARK_PENALTY: u8 = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeeAnalysisRequest {
    pub organization_id: Uuid,
    /// Organization default when absent
    pub fee_schedule_id: Option<Uuid>,
    /// Only analyze these codes; empty means the whole schedule
    #[serde(default)]
    pub codes: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Minimum billed units in the window, default 1
    pub min_utilization: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeAnalysisSummary {
    pub codes_analyzed: usize,
    pub changes_recommended: usize,
    pub total_projected_impact: Decimal,
    pub by_priority: BTreeMap<Priority, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeAnalysisReport {
    pub fee_schedule_id: Uuid,
    pub range: DateRange,
    pub summary: FeeAnalysisSummary,
    pub analyses: Vec<FeeScheduleAnalysis>,
    pub generated_at: DateTime<Utc>,
}

/// Market and reimbursement inputs for one code
#[derive(Debug, Clone, PartialEq)]
pub struct CodeEvidence {
    pub current_fee: Decimal,
    pub benchmark_rate: Option<Decimal>,
    pub regional_rate: Option<Decimal>,
    pub avg_reimbursement: Decimal,
    pub avg_allowed: Decimal,
    pub best_payer: Option<(Uuid, Decimal)>,
}

/// Result of running the benchmark checks for one code
#[derive(Debug, Clone, PartialEq)]
pub struct FeeRecommendation {
    pub recommended_fee: Decimal,
    pub confidence: u8,
    pub reasoning: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeEffectiveness {
    pub analysis_id: Uuid,
    pub code: String,
    pub effective_date: NaiveDate,
    pub pre_window: DateRange,
    pub post_window: DateRange,
    pub pre_avg_fee: Decimal,
    pub post_avg_fee: Decimal,
    pub pre_volume: Decimal,
    pub post_volume: Decimal,
    /// Post-minus-pre billed revenue, annualized
    pub actual_impact: Decimal,
    pub projected_impact: Decimal,
    pub effectiveness_percent: Decimal,
}

pub struct FeeScheduleOptimizer {
    config: Arc<EngineConfig>,
    tables: Arc<BenchmarkTables>,
}

impl FeeScheduleOptimizer {
    pub fn new(config: Arc<EngineConfig>, tables: Arc<BenchmarkTables>) -> Self {
        Self { config, tables }
    }

    pub fn resolve_range(&self, request: &FeeAnalysisRequest, as_of: NaiveDate) -> RevenueResult<DateRange> {
        let end = request.end_date.unwrap_or(as_of);
        let start = request
            .start_date
            .unwrap_or_else(|| DateRange::last_months(end, self.config.fee_window_months).start);
        DateRange::new(start, end)
    }

    pub fn analyze(
        &self,
        schedule: &FeeSchedule,
        snapshot: &RevenueSnapshot,
        request: &FeeAnalysisRequest,
        range: DateRange,
        now: DateTime<Utc>,
    ) -> FeeAnalysisReport {
        let index = snapshot.index();
        let volume = index.group_charges(Dimension::Code);
        let lines_by_code = index.lines_by_code();
        let lines_by_payer = index.lines_by_payer_and_code();
        let floor = request.min_utilization.unwrap_or(1);

        let mut analyses: Vec<FeeScheduleAnalysis> = schedule
            .items
            .iter()
            .filter(|item| request.codes.is_empty() || request.codes.contains(&item.code))
            .filter_map(|item| {
                let units = volume
                    .get(&GroupKey::Code(item.code.clone()))
                    .and_then(|t| t.units.to_u64())
                    .unwrap_or(0);
                if units < floor {
                    return None;
                }
                let lines = lines_by_code.get(&item.code).copied().unwrap_or_default();
                let best_payer = lines_by_payer
                    .iter()
                    .filter(|((_, code), totals)| *code == item.code && totals.paid > Decimal::ZERO)
                    .map(|((payer, _), totals)| (*payer, totals.avg_paid_per_unit()))
                    .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)));
                let evidence = self.evidence(item, &lines, best_payer);
                Some(self.build_analysis(schedule, item, evidence, units, range, now))
            })
            .collect();

        analyses.sort_by(|a, b| {
            rank_key(a.priority, a.projected_annual_impact)
                .cmp(&rank_key(b.priority, b.projected_annual_impact))
                .then_with(|| a.code.cmp(&b.code))
        });

        let mut summary = FeeAnalysisSummary {
            codes_analyzed: analyses.len(),
            ..Default::default()
        };
        for analysis in &analyses {
            if analysis.recommends_change() {
                summary.changes_recommended += 1;
            }
            summary.total_projected_impact += analysis.projected_annual_impact;
            *summary.by_priority.entry(analysis.priority).or_default() += 1;
        }

        FeeAnalysisReport {
            fee_schedule_id: schedule.id,
            range,
            summary,
            analyses,
            generated_at: now,
        }
    }

    fn evidence(&self, item: &FeeScheduleItem, lines: &LineTotals, best_payer: Option<(Uuid, Decimal)>) -> CodeEvidence {
        let benchmark_rate = self.tables.benchmark_rate(&item.code);
        CodeEvidence {
            current_fee: item.fee,
            benchmark_rate,
            regional_rate: benchmark_rate.map(|rate| rate * self.config.regional_multiplier),
            avg_reimbursement: lines.avg_paid_per_unit(),
            avg_allowed: lines.avg_allowed_per_unit(),
            best_payer,
        }
    }

    /// Run the benchmark checks for one code.
    pub fn recommend(&self, evidence: &CodeEvidence) -> FeeRecommendation {
        let current = evidence.current_fee;
        let mut recommended = current;
        let mut confidence = Confidence::new(self.config.fee_confidence_base, MAX_CONFIDENCE);
        let mut reasoning = Vec::new();

        match evidence.benchmark_rate.filter(|rate| *rate > Decimal::ZERO) {
            Some(benchmark) => {
                if current < benchmark * dec!(1.25) {
                    recommended = recommended.max(benchmark * dec!(1.5));
                    confidence.add(20);
                    reasoning.push(format!(
                        "Current fee ${} is below 125% of the ${} benchmark; raise to at least 150%",
                        current, benchmark
                    ));
                } else if current < benchmark * dec!(1.75) {
                    recommended = recommended.max(benchmark * dec!(1.75));
                    confidence.add(15);
                    reasoning.push(format!(
                        "Current fee ${} is below 175% of the ${} benchmark; raise to 175%",
                        current, benchmark
                    ));
                } else if current > benchmark * dec!(3) {
                    reasoning.push(format!(
                        "Current fee ${} exceeds 300% of the ${} benchmark and may be overpriced",
                        current, benchmark
                    ));
                }
            }
            None => {
                confidence.subtract(MISSING_BENCHMARK_PENALTY);
                reasoning.push("No benchmark rate available for this code".to_string());
            }
        }

        let reimbursement = evidence.avg_reimbursement;
        if reimbursement > Decimal::ZERO && current <= reimbursement * dec!(1.2) {
            recommended = recommended.max(reimbursement * dec!(1.5));
            confidence.add(15);
            reasoning.push(format!(
                "Fee is within 120% of the ${} average reimbursement; payers may be paying the full charge",
                reimbursement.round_dp(2)
            ));
        }

        if let Some((_, best)) = evidence.best_payer.filter(|(_, rate)| *rate > Decimal::ZERO) {
            if current <= best * dec!(1.3) {
                recommended = recommended.max(best * dec!(1.5));
                confidence.add(10);
                reasoning.push(format!(
                    "Fee is within 130% of the best payer rate ${}",
                    best.round_dp(2)
                ));
            }
        }

        if let Some(regional) = evidence.regional_rate.filter(|rate| *rate > Decimal::ZERO) {
            if current < regional * dec!(1.5) {
                recommended = recommended.max(regional * dec!(1.75));
                reasoning.push(format!(
                    "Fee is below 150% of the ${} regional rate; raise to 175%",
                    regional.round_dp(2)
                ));
            }
        }

        let mut recommended = recommended.round_dp(2);
        if recommended - current < self.config.minimum_fee_change {
            if recommended != current {
                reasoning.push(format!(
                    "Net change under ${}; no change recommended",
                    self.config.minimum_fee_change
                ));
            }
            recommended = current;
        }

        FeeRecommendation {
            recommended_fee: recommended,
            confidence: confidence.value(),
            reasoning,
        }
    }

    /// Fee delta × utilization × fee-sensitive share, annualized to the window.
    pub fn projected_impact(&self, fee_change: Decimal, utilization: u64, range: DateRange) -> Decimal {
        money(
            fee_change
                * Decimal::from(utilization)
                * self.config.cash_volume_share
                * range.annualization_factor(),
        )
    }

    fn build_analysis(
        &self,
        schedule: &FeeSchedule,
        item: &FeeScheduleItem,
        evidence: CodeEvidence,
        utilization: u64,
        range: DateRange,
        now: DateTime<Utc>,
    ) -> FeeScheduleAnalysis {
        let recommendation = self.recommend(&evidence);
        let fee_change = recommendation.recommended_fee - evidence.current_fee;
        let impact = self.projected_impact(fee_change, utilization, range);
        let code_name = self
            .tables
            .benchmark(&item.code)
            .map(|b| b.name.clone())
            .or_else(|| item.description.clone());

        FeeScheduleAnalysis {
            id: Uuid::new_v4(),
            organization_id: schedule.organization_id,
            fee_schedule_id: schedule.id,
            code: item.code.clone(),
            code_name,
            current_fee: evidence.current_fee,
            recommended_fee: recommendation.recommended_fee,
            fee_change,
            benchmark_rate: evidence.benchmark_rate,
            regional_rate: evidence.regional_rate.map(|r| r.round_dp(2)),
            avg_reimbursement: evidence.avg_reimbursement.round_dp(2),
            avg_allowed: evidence.avg_allowed.round_dp(2),
            best_payer_rate: evidence.best_payer.map(|(_, rate)| rate.round_dp(2)),
            best_payer_id: evidence.best_payer.map(|(id, _)| id),
            utilization,
            projected_annual_impact: impact,
            priority: PriorityThresholds::FEE_SCHEDULE.classify(impact),
            confidence: recommendation.confidence,
            reasoning: recommendation.reasoning,
            status: FeeAnalysisStatus::Pending,
            effective_date: None,
            created_at: now,
            updated_at: now,
            reviewed_by: None,
            review_notes: None,
            implemented_at: None,
        }
    }

    // =========================================================================
    // Effectiveness tracking
    // =========================================================================

    /// Equal-length windows before and after the change took effect.
    pub fn effectiveness_windows(
        &self,
        analysis: &FeeScheduleAnalysis,
        as_of: NaiveDate,
    ) -> RevenueResult<(NaiveDate, DateRange, DateRange)> {
        if analysis.status != FeeAnalysisStatus::Implemented {
            return Err(RevenueError::BadRequest(format!(
                "Fee analysis {} has not been implemented",
                analysis.id
            )));
        }
        let effective = analysis
            .effective_date
            .or_else(|| analysis.implemented_at.map(|at| at.date_naive()))
            .ok_or_else(|| {
                RevenueError::Validation(format!("Fee analysis {} has no effective date", analysis.id))
            })?;
        if as_of < effective {
            return Err(RevenueError::BadRequest(format!(
                "Change for {} takes effect on {}, after {}",
                analysis.code, effective, as_of
            )));
        }
        let post = DateRange::new(effective, as_of)?;
        let pre_end = effective - Duration::days(1);
        let pre = DateRange::new(pre_end - Duration::days(post.days() - 1), pre_end)?;
        Ok((effective, pre, post))
    }

    /// Compare billed fee and volume for the code across the two windows.
    pub fn effectiveness(
        &self,
        analysis: &FeeScheduleAnalysis,
        pre: &RevenueSnapshot,
        post: &RevenueSnapshot,
        as_of: NaiveDate,
    ) -> RevenueResult<FeeEffectiveness> {
        let (effective_date, pre_window, post_window) = self.effectiveness_windows(analysis, as_of)?;
        let key = GroupKey::Code(analysis.code.clone());
        let before = pre
            .index()
            .group_charges(Dimension::Code)
            .get(&key)
            .copied()
            .unwrap_or_default();
        let after = post
            .index()
            .group_charges(Dimension::Code)
            .get(&key)
            .copied()
            .unwrap_or_default();

        let actual = ((after.billed - before.billed) * post_window.annualization_factor()).round_dp(2);
        let projected = analysis.projected_annual_impact;

        Ok(FeeEffectiveness {
            analysis_id: analysis.id,
            code: analysis.code.clone(),
            effective_date,
            pre_window,
            post_window,
            pre_avg_fee: before.avg_fee_per_unit().round_dp(2),
            post_avg_fee: after.avg_fee_per_unit().round_dp(2),
            pre_volume: before.units,
            post_volume: after.units,
            actual_impact: actual,
            projected_impact: projected,
            effectiveness_percent: percent(actual, projected).round_dp(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn optimizer() -> FeeScheduleOptimizer {
        FeeScheduleOptimizer::new(
            Arc::new(EngineConfig::default()),
            Arc::new(BenchmarkTables::standard()),
        )
    }

    fn evidence(current: Decimal, benchmark: Option<Decimal>) -> CodeEvidence {
        CodeEvidence {
            current_fee: current,
            benchmark_rate: benchmark,
            regional_rate: benchmark,
            avg_reimbursement: Decimal::ZERO,
            avg_allowed: Decimal::ZERO,
            best_payer: None,
        }
    }

    #[test]
    fn test_raise_to_175_percent_of_benchmark() {
        let rec = optimizer().recommend(&evidence(dec!(60), Some(dec!(40))));
        assert_eq!(rec.recommended_fee, dec!(70));
        assert_eq!(rec.confidence, 65);
        assert!(!rec.reasoning.is_empty());
    }

    #[test]
    fn test_far_below_benchmark_raises_to_floor() {
        let rec = optimizer().recommend(&evidence(dec!(30), Some(dec!(40))));
        // 150% benchmark tier, then the 175% regional floor
        assert_eq!(rec.recommended_fee, dec!(70));
        assert_eq!(rec.confidence, 70);
    }

    #[test]
    fn test_overpriced_fee_is_not_raised() {
        let rec = optimizer().recommend(&evidence(dec!(130), Some(dec!(40))));
        assert_eq!(rec.recommended_fee, dec!(130));
        assert!(rec.reasoning.iter().any(|r| r.contains("overpriced")));
    }

    #[test]
    fn test_small_change_means_no_change() {
        // 175% of 40 is 70; a 68 fee would only move by 2
        let rec = optimizer().recommend(&evidence(dec!(68), Some(dec!(40))));
        assert_eq!(rec.recommended_fee, dec!(68));
    }

    #[test]
    fn test_missing_benchmark_reduces_confidence() {
        let rec = optimizer().recommend(&evidence(dec!(50), None));
        assert_eq!(rec.recommended_fee, dec!(50));
        assert_eq!(rec.confidence, 40);
    }

    #[test]
    fn test_reimbursement_and_best_payer_floors() {
        let mut ev = evidence(dec!(100), None);
        ev.avg_reimbursement = dec!(90);
        ev.best_payer = Some((Uuid::nil(), dec!(95)));
        let rec = optimizer().recommend(&ev);
        assert_eq!(rec.recommended_fee, dec!(142.50));
        assert_eq!(rec.confidence, 65);
    }

    #[test]
    fn test_projected_impact_annualizes_window() {
        let optimizer = optimizer();
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 30).unwrap(),
        )
        .unwrap();
        // 365-day window: factor 1
        assert_eq!(optimizer.projected_impact(dec!(10), 100, range), dec!(300));
    }

    proptest! {
        #[test]
        fn prop_never_recommends_below_current(
            current in 1i64..100_000,
            benchmark in prop::option::of(1i64..50_000),
            reimbursement in 0i64..50_000,
            best in prop::option::of(1i64..50_000),
        ) {
            let ev = CodeEvidence {
                current_fee: Decimal::new(current, 2),
                benchmark_rate: benchmark.map(|b| Decimal::new(b, 2)),
                regional_rate: benchmark.map(|b| Decimal::new(b, 2)),
                avg_reimbursement: Decimal::new(reimbursement, 2),
                avg_allowed: Decimal::ZERO,
                best_payer: best.map(|b| (Uuid::nil(), Decimal::new(b, 2))),
            };
            let rec = optimizer().recommend(&ev);
            prop_assert!(rec.recommended_fee >= ev.current_fee);
            prop_assert!(rec.confidence <= MAX_CONFIDENCE);
        }

        #[test]
        fn prop_higher_reimbursement_floor_never_lowers_fee(
            current in 100i64..10_000,
            low in 1i64..10_000,
            extra in 0i64..10_000,
        ) {
            let optimizer = optimizer();
            let mut a = evidence(Decimal::new(current, 2), None);
            a.avg_reimbursement = Decimal::new(low, 2);
            let mut b = a.clone();
            b.avg_reimbursement = Decimal::new(low + extra, 2);
            let ra = optimizer.recommend(&a);
            let rb = optimizer.recommend(&b);
            prop_assert!(rb.recommended_fee >= ra.recommended_fee);
        }
    }
}
