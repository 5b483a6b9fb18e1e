//! Revenue forecasting
//!
//! Historical trend and seasonality are computed from monthly charge
//! buckets; scheduled appointments add a short-term pipeline on top of the
//! trend projection. Goal variance always uses the baseline scenario.

use crate::aggregation::{DateRange, Dimension, GroupKey, MonthKey, RevenueSnapshot};
use crate::config::EngineConfig;
use crate::error::{RevenueError, RevenueResult};
use crate::models::RevenueGoal;
use crate::scoring::{money, percent, ratio, EffortLevel, Priority, PriorityThresholds};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use itertools::Itertools;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub const MIN_HORIZON_MONTHS: u32 = 1;
pub const MAX_HORIZON_MONTHS: u32 = 24;
pub const MIN_LOOKBACK_MONTHS: u32 = 3;
pub const MAX_LOOKBACK_MONTHS: u32 = 36;

const TREND_THRESHOLD: Decimal = dec!(0.02);
const SEASONALITY_MIN_MONTHS: usize = 6;
const PIPELINE_MONTHS: u32 = 3;
const LOW_COLLECTION_RATE: Decimal = dec!(0.70);
const SLOW_MONTH_FACTOR: Decimal = dec!(0.9);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Conservative,
    Baseline,
    Optimistic,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [Scenario::Conservative, Scenario::Baseline, Scenario::Optimistic];

    fn multiplier(self, config: &EngineConfig) -> Decimal {
        let multipliers = &config.scenario_multipliers;
        match self {
            Scenario::Conservative => multipliers.conservative,
            Scenario::Baseline => multipliers.baseline,
            Scenario::Optimistic => multipliers.optimistic,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastRequest {
    pub organization_id: Uuid,
    /// 1 to 24 months
    pub horizon_months: u32,
    /// 3 to 36 months
    pub lookback_months: u32,
    pub include_seasonality: bool,
    pub include_pipeline: bool,
    pub scenarios: Vec<Scenario>,
}

impl Default for ForecastRequest {
    fn default() -> Self {
        Self {
            organization_id: Uuid::nil(),
            horizon_months: 12,
            lookback_months: 12,
            include_seasonality: true,
            include_pipeline: true,
            scenarios: Scenario::ALL.to_vec(),
        }
    }
}

/// Validated forecast parameters anchored to a date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastPlan {
    pub as_of: NaiveDate,
    pub horizon_months: u32,
    pub lookback_months: u32,
    pub include_seasonality: bool,
    pub include_pipeline: bool,
    pub scenarios: Vec<Scenario>,
    /// Full calendar months preceding `as_of`
    pub history: DateRange,
    /// Appointments counted toward the pipeline
    pub pipeline_window: DateRange,
    pub first_month: MonthKey,
}

impl ForecastPlan {
    pub fn months(&self) -> impl Iterator<Item = (u32, MonthKey)> + '_ {
        (1..=self.horizon_months).map(|i| (i, self.first_month.plus(i - 1)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalMonth {
    pub month: MonthKey,
    pub revenue: Decimal,
    pub collections: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Stable,
    Decreasing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalTrend {
    pub months_of_data: usize,
    pub avg_monthly_revenue: Decimal,
    pub avg_monthly_collections: Decimal,
    pub monthly_growth_rate: Decimal,
    pub annualized_growth_rate: Decimal,
    /// Standard deviation over mean of monthly revenue
    pub volatility: Decimal,
    pub collection_rate: Decimal,
    pub revenue_per_encounter: Decimal,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalFactor {
    pub month: u32,
    pub factor: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEstimate {
    pub scheduled_appointments: u64,
    pub revenue_per_encounter: Decimal,
    pub conversion_rate: Decimal,
    pub total_value: Decimal,
    pub monthly_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastMonth {
    pub month: MonthKey,
    pub base_revenue: Decimal,
    pub seasonal_adjustment: Decimal,
    pub pipeline_adjustment: Decimal,
    pub forecasted_revenue: Decimal,
    pub forecasted_collections: Decimal,
    pub cumulative_revenue: Decimal,
    pub lower_bound: Decimal,
    pub upper_bound: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioForecast {
    pub scenario: Scenario,
    pub monthly_growth_rate: Decimal,
    pub months: Vec<ForecastMonth>,
    pub total_revenue: Decimal,
    pub total_collections: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalVariance {
    pub goal_id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub target: Decimal,
    pub forecasted: Decimal,
    pub variance: Decimal,
    pub variance_percent: Decimal,
    pub on_track: bool,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastAction {
    pub title: String,
    pub description: String,
    pub estimated_impact: Decimal,
    pub effort: EffortLevel,
    pub timeframe: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastReport {
    pub plan: ForecastPlan,
    pub history: Vec<HistoricalMonth>,
    pub trend: HistoricalTrend,
    pub seasonality: Vec<SeasonalFactor>,
    pub pipeline: Option<PipelineEstimate>,
    pub scenarios: Vec<ScenarioForecast>,
    pub goals: Vec<GoalVariance>,
    pub actions: Vec<ForecastAction>,
    pub generated_at: DateTime<Utc>,
}

pub struct RevenueForecaster {
    config: Arc<EngineConfig>,
}

impl RevenueForecaster {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    /// Validate the request and anchor its windows to `as_of`.
    pub fn plan(&self, request: &ForecastRequest, as_of: NaiveDate) -> RevenueResult<ForecastPlan> {
        if !(MIN_HORIZON_MONTHS..=MAX_HORIZON_MONTHS).contains(&request.horizon_months) {
            return Err(RevenueError::BadRequest(format!(
                "Forecast horizon must be between {} and {} months, got {}",
                MIN_HORIZON_MONTHS, MAX_HORIZON_MONTHS, request.horizon_months
            )));
        }
        if !(MIN_LOOKBACK_MONTHS..=MAX_LOOKBACK_MONTHS).contains(&request.lookback_months) {
            return Err(RevenueError::BadRequest(format!(
                "Historical lookback must be between {} and {} months, got {}",
                MIN_LOOKBACK_MONTHS, MAX_LOOKBACK_MONTHS, request.lookback_months
            )));
        }

        let first_month = MonthKey::from_date(as_of);
        let invalid = || RevenueError::Validation(format!("Cannot build forecast windows around {}", as_of));
        let history_start = first_month
            .first_day()
            .and_then(|d| d.checked_sub_months(chrono::Months::new(request.lookback_months)))
            .ok_or_else(invalid)?;
        let history_end = first_month.previous().last_day().ok_or_else(invalid)?;

        let mut scenarios = request.scenarios.clone();
        scenarios.sort();
        scenarios.dedup();
        if scenarios.is_empty() {
            scenarios.push(Scenario::Baseline);
        }

        Ok(ForecastPlan {
            as_of,
            horizon_months: request.horizon_months,
            lookback_months: request.lookback_months,
            include_seasonality: request.include_seasonality,
            include_pipeline: request.include_pipeline,
            scenarios,
            history: DateRange::new(history_start, history_end)?,
            pipeline_window: DateRange::last_days(
                as_of + Duration::days(self.config.pipeline_horizon_days - 1),
                self.config.pipeline_horizon_days,
            ),
            first_month,
        })
    }

    pub fn forecast(
        &self,
        plan: &ForecastPlan,
        snapshot: &RevenueSnapshot,
        goals: &[RevenueGoal],
        now: DateTime<Utc>,
    ) -> ForecastReport {
        let history = monthly_history(snapshot, &plan.history);
        let trend = self.trend(snapshot, &history);
        let factors = if plan.include_seasonality {
            seasonal_factors(&history)
        } else {
            BTreeMap::new()
        };
        let pipeline = plan
            .include_pipeline
            .then(|| self.pipeline(plan, snapshot, trend.revenue_per_encounter));

        let scenarios: Vec<ScenarioForecast> = plan
            .scenarios
            .iter()
            .map(|scenario| self.project(plan, *scenario, &trend, &factors, pipeline.as_ref()))
            .collect();
        let baseline = scenarios
            .iter()
            .find(|s| s.scenario == Scenario::Baseline)
            .cloned()
            .unwrap_or_else(|| self.project(plan, Scenario::Baseline, &trend, &factors, pipeline.as_ref()));

        let goal_variances: Vec<GoalVariance> = goals
            .iter()
            .filter(|g| g.active)
            .filter_map(|g| goal_variance(g, &baseline))
            .collect();
        let seasonality: Vec<SeasonalFactor> = (1..=12)
            .map(|month| SeasonalFactor {
                month,
                factor: factors.get(&month).copied().unwrap_or(Decimal::ONE),
            })
            .collect();
        let actions = recommend_actions(&trend, &goal_variances, &seasonality);

        debug!(
            months_of_data = history.len(),
            scenarios = scenarios.len(),
            goals = goal_variances.len(),
            "Forecast computed"
        );

        ForecastReport {
            plan: plan.clone(),
            history,
            trend,
            seasonality,
            pipeline,
            scenarios,
            goals: goal_variances,
            actions,
            generated_at: now,
        }
    }

    fn trend(&self, snapshot: &RevenueSnapshot, history: &[HistoricalMonth]) -> HistoricalTrend {
        let months = Decimal::from(history.len());
        let revenue: Decimal = history.iter().map(|m| m.revenue).sum();
        let collections: Decimal = history.iter().map(|m| m.collections).sum();
        let avg_revenue = ratio(revenue, months);

        let growth_rates: Vec<Decimal> = history
            .iter()
            .tuple_windows()
            .filter(|(prev, _)| !prev.revenue.is_zero())
            .map(|(prev, next)| (next.revenue - prev.revenue) / prev.revenue)
            .collect();
        let monthly_growth = ratio(growth_rates.iter().copied().sum(), Decimal::from(growth_rates.len()));

        let variance = ratio(
            history
                .iter()
                .map(|m| (m.revenue - avg_revenue) * (m.revenue - avg_revenue))
                .sum(),
            months,
        );
        let volatility = ratio(variance.sqrt().unwrap_or(Decimal::ZERO), avg_revenue);

        let encounters = snapshot
            .encounters
            .iter()
            .filter(|e| e.is_completed())
            .count();

        let direction = if monthly_growth > TREND_THRESHOLD {
            TrendDirection::Increasing
        } else if monthly_growth < -TREND_THRESHOLD {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        };

        HistoricalTrend {
            months_of_data: history.len(),
            avg_monthly_revenue: avg_revenue.round_dp(2),
            avg_monthly_collections: ratio(collections, months).round_dp(2),
            monthly_growth_rate: monthly_growth.round_dp(4),
            annualized_growth_rate: (compound(monthly_growth, 12) - Decimal::ONE).round_dp(4),
            volatility: volatility.round_dp(4),
            collection_rate: ratio(collections, revenue).round_dp(4),
            revenue_per_encounter: ratio(revenue, Decimal::from(encounters)).round_dp(2),
            direction,
        }
    }

    fn pipeline(&self, plan: &ForecastPlan, snapshot: &RevenueSnapshot, revenue_per_encounter: Decimal) -> PipelineEstimate {
        let scheduled = snapshot
            .appointments
            .iter()
            .filter(|a| a.is_pending() && plan.pipeline_window.contains(a.scheduled_date))
            .count();
        let scheduled = u64::try_from(scheduled).unwrap_or(u64::MAX);
        let total = Decimal::from(scheduled) * revenue_per_encounter * self.config.pipeline_conversion_rate;
        PipelineEstimate {
            scheduled_appointments: scheduled,
            revenue_per_encounter,
            conversion_rate: self.config.pipeline_conversion_rate,
            total_value: money(total),
            monthly_value: money(total / Decimal::from(PIPELINE_MONTHS)),
        }
    }

    fn project(
        &self,
        plan: &ForecastPlan,
        scenario: Scenario,
        trend: &HistoricalTrend,
        factors: &BTreeMap<u32, Decimal>,
        pipeline: Option<&PipelineEstimate>,
    ) -> ScenarioForecast {
        let growth = trend.monthly_growth_rate * scenario.multiplier(&self.config);
        let mut cumulative = Decimal::ZERO;
        let mut total_collections = Decimal::ZERO;

        let months: Vec<ForecastMonth> = plan
            .months()
            .map(|(i, month)| {
                let base = trend.avg_monthly_revenue * compound(growth, i);
                let factor = factors.get(&month.month).copied().unwrap_or(Decimal::ONE);
                let seasonal = base * (factor - Decimal::ONE);
                let pipeline_adjustment = match pipeline {
                    Some(p) if i <= PIPELINE_MONTHS => (p.monthly_value - base).max(Decimal::ZERO),
                    _ => Decimal::ZERO,
                };
                let revenue = money(base + seasonal + pipeline_adjustment);
                let collections = money(revenue * trend.collection_rate);
                cumulative += revenue;
                total_collections += collections;
                ForecastMonth {
                    month,
                    base_revenue: money(base),
                    seasonal_adjustment: seasonal.round_dp(2),
                    pipeline_adjustment: money(pipeline_adjustment),
                    forecasted_revenue: revenue,
                    forecasted_collections: collections,
                    cumulative_revenue: cumulative,
                    lower_bound: money(revenue * (Decimal::ONE - trend.volatility)),
                    upper_bound: money(revenue * (Decimal::ONE + trend.volatility)),
                }
            })
            .collect();

        ScenarioForecast {
            scenario,
            monthly_growth_rate: growth.round_dp(4),
            months,
            total_revenue: cumulative,
            total_collections,
        }
    }
}

/// Months with charge activity inside `range`, oldest first.
fn monthly_history(snapshot: &RevenueSnapshot, range: &DateRange) -> Vec<HistoricalMonth> {
    snapshot
        .index()
        .group_charges_where(Dimension::Month, |c| range.contains(c.service_date))
        .into_iter()
        .filter_map(|(key, totals)| match key {
            GroupKey::Month(month) => Some(HistoricalMonth {
                month,
                revenue: totals.billed,
                collections: totals.paid,
            }),
            _ => None,
        })
        .collect()
}

/// Calendar-month average over overall average; empty below six months.
fn seasonal_factors(history: &[HistoricalMonth]) -> BTreeMap<u32, Decimal> {
    if history.len() < SEASONALITY_MIN_MONTHS {
        return BTreeMap::new();
    }
    let overall = ratio(
        history.iter().map(|m| m.revenue).sum(),
        Decimal::from(history.len()),
    );
    let mut by_month: BTreeMap<u32, (Decimal, u32)> = BTreeMap::new();
    for month in history {
        let entry = by_month.entry(month.month.month).or_insert((Decimal::ZERO, 0));
        entry.0 += month.revenue;
        entry.1 += 1;
    }
    by_month
        .into_iter()
        .map(|(month, (sum, count))| {
            let factor = if overall.is_zero() {
                Decimal::ONE
            } else {
                (ratio(sum, Decimal::from(count)) / overall).round_dp(4)
            };
            (month, factor)
        })
        .collect()
}

/// `(1 + rate)^periods`
pub fn compound(rate: Decimal, periods: u32) -> Decimal {
    let step = Decimal::ONE + rate;
    (0..periods).fold(Decimal::ONE, |acc, _| acc.checked_mul(step).unwrap_or(acc))
}

fn goal_variance(goal: &RevenueGoal, baseline: &ScenarioForecast) -> Option<GoalVariance> {
    let window = DateRange::new(goal.start_date, goal.end_date).ok()?;
    let overlapping: Vec<&ForecastMonth> = baseline
        .months
        .iter()
        .filter(|m| m.month.range().is_some_and(|r| r.overlaps(&window)))
        .collect();
    if overlapping.is_empty() {
        return None;
    }
    let forecasted: Decimal = overlapping.iter().map(|m| m.forecasted_revenue).sum();
    let variance = forecasted - goal.target_amount;
    let variance_percent = percent(variance, goal.target_amount).round_dp(1);

    Some(GoalVariance {
        goal_id: goal.id,
        name: goal.name.clone(),
        start_date: goal.start_date,
        end_date: goal.end_date,
        target: goal.target_amount,
        forecasted,
        variance,
        variance_percent,
        on_track: variance >= Decimal::ZERO,
        recommendation: goal_recommendation(variance_percent).to_string(),
    })
}

fn goal_recommendation(variance_percent: Decimal) -> &'static str {
    if variance_percent >= dec!(10) {
        "Forecast exceeds the goal comfortably; consider raising the target"
    } else if variance_percent >= Decimal::ZERO {
        "On track; maintain current scheduling and collection practices"
    } else if variance_percent >= dec!(-10) {
        "Slightly behind; tighten scheduling and follow up on open balances"
    } else if variance_percent >= dec!(-25) {
        "Behind target; launch recall and referral initiatives now"
    } else {
        "Significantly behind; revisit the goal or make structural changes"
    }
}

fn recommend_actions(
    trend: &HistoricalTrend,
    goals: &[GoalVariance],
    seasonality: &[SeasonalFactor],
) -> Vec<ForecastAction> {
    let annual_revenue = trend.avg_monthly_revenue * dec!(12);
    let mut actions = Vec::new();

    let gap: Decimal = goals
        .iter()
        .filter(|g| !g.on_track)
        .map(|g| -g.variance)
        .sum();
    if gap > Decimal::ZERO {
        actions.push(action(
            "Improve scheduling efficiency",
            format!("Fill open slots and reduce no-shows to close part of the ${} goal gap", money(gap)),
            gap * dec!(0.15),
            EffortLevel::Easy,
            "30 days",
            None,
        ));
        actions.push(action(
            "Run a patient recall campaign",
            "Contact inactive patients due for care".to_string(),
            gap * dec!(0.20),
            EffortLevel::Moderate,
            "60 days",
            None,
        ));
    }

    if trend.direction == TrendDirection::Decreasing {
        actions.push(action(
            "Reverse the declining revenue trend",
            format!(
                "Revenue is falling {}% per month; review volume, payer mix and coding",
                (trend.monthly_growth_rate * dec!(100)).round_dp(1)
            ),
            annual_revenue * trend.monthly_growth_rate.abs(),
            EffortLevel::Complex,
            "Immediate",
            Some(Priority::Critical),
        ));
    }

    if trend.months_of_data > 0 && trend.collection_rate < LOW_COLLECTION_RATE {
        actions.push(action(
            "Improve collections",
            format!(
                "Only {}% of billed revenue is collected; review denials and patient balances",
                (trend.collection_rate * dec!(100)).round_dp(1)
            ),
            annual_revenue * (LOW_COLLECTION_RATE - trend.collection_rate),
            EffortLevel::Moderate,
            "90 days",
            None,
        ));
    }

    let slow: Vec<&SeasonalFactor> = seasonality.iter().filter(|s| s.factor < SLOW_MONTH_FACTOR).collect();
    if !slow.is_empty() {
        let months = slow.iter().map(|s| s.month.to_string()).collect::<Vec<_>>().join(", ");
        actions.push(action(
            "Plan promotions for slow months",
            format!("Revenue dips in months {}; schedule wellness or reactivation promotions", months),
            slow.iter()
                .map(|s| trend.avg_monthly_revenue * (Decimal::ONE - s.factor) * dec!(0.5))
                .sum(),
            EffortLevel::Easy,
            "Before the slow season",
            None,
        ));
    }

    if trend.months_of_data > 0 && trend.direction != TrendDirection::Increasing {
        actions.push(action(
            "Add a new service line",
            "Growth has stalled; evaluate services with strong reimbursement".to_string(),
            annual_revenue * dec!(0.05),
            EffortLevel::Complex,
            "6 months",
            None,
        ));
    }

    actions.sort_by(|a, b| b.estimated_impact.cmp(&a.estimated_impact));
    actions
}

fn action(
    title: &str,
    description: String,
    impact: Decimal,
    effort: EffortLevel,
    timeframe: &str,
    priority: Option<Priority>,
) -> ForecastAction {
    let impact = money(impact);
    ForecastAction {
        title: title.to_string(),
        description,
        estimated_impact: impact,
        effort,
        timeframe: timeframe.to_string(),
        priority: priority.unwrap_or_else(|| PriorityThresholds::LEAKAGE.classify(impact)),
    }
}
