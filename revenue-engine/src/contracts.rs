//! Payer contract analysis
//!
//! Scores each payer's reimbursement against benchmark-derived market rates
//! and produces renegotiation priorities and talking points.
//! [`ContractAnalyzer::model_change`] is a what-if calculator and never
//! persists anything.

use crate::aggregation::{DateRange, LineTotals, RevenueSnapshot, SnapshotIndex};
use crate::benchmarks::BenchmarkTables;
use crate::config::EngineConfig;
use crate::error::RevenueResult;
use crate::findings::{OpportunityCategory, RevenueOpportunity};
use crate::lifecycle::OpportunityStatus;
use crate::models::{Payer, PayerCategory};
use crate::scoring::{money, percent, rank_key, Priority, PriorityThresholds};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub const RENEGOTIATE_CONTRACT: &str = "renegotiate_contract";

const HIGH_DENIAL_RATE: Decimal = dec!(15);
const SLOW_PAYMENT_DAYS: Decimal = dec!(45);
const VOLUME_LEVERAGE_CLAIMS: u64 = 100;
const CONTRACT_CONFIDENCE: u8 = 70;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractRequest {
    pub organization_id: Uuid,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub payer_id: Option<Uuid>,
    /// Minimum claims for a payer to be scored, default 10
    pub min_claims: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractRating {
    Poor,
    BelowAverage,
    Average,
    Good,
    Excellent,
}

impl ContractRating {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractRating::Poor => "poor",
            ContractRating::BelowAverage => "below_average",
            ContractRating::Average => "average",
            ContractRating::Good => "good",
            ContractRating::Excellent => "excellent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketPosition {
    BelowMarket,
    AtMarket,
    AboveMarket,
}

/// Paid rate for one code against the low/mid/high market tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeRateComparison {
    pub code: String,
    pub units: Decimal,
    pub avg_paid: Decimal,
    pub market_low: Decimal,
    pub market_mid: Decimal,
    pub market_high: Decimal,
    pub position: MarketPosition,
    /// Annualized shortfall against the market midpoint, zero unless below market
    pub annual_gap: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayerScorecard {
    pub payer_id: Uuid,
    pub payer_name: String,
    pub category: PayerCategory,
    pub claims: u64,
    pub billed: Decimal,
    pub allowed: Decimal,
    pub paid: Decimal,
    pub reimbursement_rate: Decimal,
    pub denial_rate: Decimal,
    pub avg_days_to_payment: Decimal,
    pub volume_share: Decimal,
    pub rating: ContractRating,
    pub priority: Priority,
    pub codes: Vec<CodeRateComparison>,
    pub opportunity_value: Decimal,
    pub talking_points: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractSummary {
    pub payers_analyzed: usize,
    pub renegotiation_candidates: usize,
    pub below_market_codes: usize,
    pub total_opportunity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractReport {
    pub range: DateRange,
    pub summary: ContractSummary,
    pub scorecards: Vec<PayerScorecard>,
    pub opportunities: Vec<RevenueOpportunity>,
    pub generated_at: DateTime<Utc>,
}

/// Caller-proposed rate for one code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedRate {
    pub code: String,
    pub rate: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractModelRequest {
    pub organization_id: Uuid,
    pub payer_id: Uuid,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub changes: Vec<ProposedRate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateChangeImpact {
    pub code: String,
    pub current_rate: Decimal,
    pub proposed_rate: Decimal,
    pub annual_units: Decimal,
    /// Signed: negative when the proposal lowers the rate
    pub annual_impact: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractModel {
    pub payer_id: Uuid,
    pub payer_name: String,
    pub range: DateRange,
    pub changes: Vec<RateChangeImpact>,
    pub current_annual_revenue: Decimal,
    pub projected_annual_revenue: Decimal,
    pub annual_impact: Decimal,
    pub percent_change: Decimal,
}

pub struct ContractAnalyzer {
    config: Arc<EngineConfig>,
    tables: Arc<BenchmarkTables>,
}

impl ContractAnalyzer {
    pub fn new(config: Arc<EngineConfig>, tables: Arc<BenchmarkTables>) -> Self {
        Self { config, tables }
    }

    pub fn resolve_range(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        as_of: NaiveDate,
    ) -> RevenueResult<DateRange> {
        let end = end.unwrap_or(as_of);
        let start = start.unwrap_or_else(|| DateRange::last_months(end, self.config.contract_window_months).start);
        DateRange::new(start, end)
    }

    pub fn analyze(
        &self,
        snapshot: &RevenueSnapshot,
        request: &ContractRequest,
        range: DateRange,
        now: DateTime<Utc>,
    ) -> ContractReport {
        let index = snapshot.index();
        let factor = range.annualization_factor();
        let min_claims = request.min_claims.unwrap_or(10);
        let by_payer = index.claims_by_payer();
        let lines = index.lines_by_payer_and_code();
        let total_claims: u64 = by_payer.values().map(|t| t.claims).sum();

        let mut scorecards: Vec<PayerScorecard> = by_payer
            .iter()
            .filter(|(payer_id, totals)| {
                totals.claims >= min_claims && request.payer_id.map_or(true, |id| id == **payer_id)
            })
            .map(|(payer_id, totals)| {
                let (name, category) = payer_identity(&index, *payer_id);
                let codes: Vec<CodeRateComparison> = lines
                    .range((*payer_id, String::new())..)
                    .take_while(|((id, _), _)| id == payer_id)
                    .filter_map(|((_, code), line)| self.compare_code(code, line, category, factor))
                    .collect();
                let opportunity_value = money(codes.iter().map(|c| c.annual_gap).sum());

                let reimbursement_rate = totals.reimbursement_rate().round_dp(1);
                let denial_rate = totals.denial_rate().round_dp(1);
                let avg_days = totals.avg_days_to_payment().round_dp(1);
                let (rating, base_priority) = rate_contract(reimbursement_rate, opportunity_value);
                let priority = if denial_rate > HIGH_DENIAL_RATE || avg_days > SLOW_PAYMENT_DAYS {
                    base_priority.escalate()
                } else {
                    base_priority
                };

                let mut scorecard = PayerScorecard {
                    payer_id: *payer_id,
                    payer_name: name,
                    category,
                    claims: totals.claims,
                    billed: money(totals.billed),
                    allowed: money(totals.allowed),
                    paid: money(totals.paid),
                    reimbursement_rate,
                    denial_rate,
                    avg_days_to_payment: avg_days,
                    volume_share: percent(Decimal::from(totals.claims), Decimal::from(total_claims)).round_dp(1),
                    rating,
                    priority,
                    codes,
                    opportunity_value,
                    talking_points: Vec::new(),
                };
                scorecard.talking_points = talking_points(&scorecard);
                scorecard
            })
            .collect();
        scorecards.sort_by(|a, b| {
            rank_key(a.priority, a.opportunity_value).cmp(&rank_key(b.priority, b.opportunity_value))
        });

        let opportunities: Vec<RevenueOpportunity> = scorecards
            .iter()
            .filter(|s| s.priority >= Priority::High)
            .map(|s| renegotiation_opportunity(snapshot.organization_id, s, now))
            .collect();

        let summary = ContractSummary {
            payers_analyzed: scorecards.len(),
            renegotiation_candidates: opportunities.len(),
            below_market_codes: scorecards
                .iter()
                .flat_map(|s| s.codes.iter())
                .filter(|c| c.position == MarketPosition::BelowMarket)
                .count(),
            total_opportunity: scorecards.iter().map(|s| s.opportunity_value).sum(),
        };

        ContractReport {
            range,
            summary,
            scorecards,
            opportunities,
            generated_at: now,
        }
    }

    fn compare_code(
        &self,
        code: &str,
        line: &LineTotals,
        category: PayerCategory,
        factor: Decimal,
    ) -> Option<CodeRateComparison> {
        let benchmark = self.tables.benchmark_rate(code)?;
        if line.units.is_zero() {
            return None;
        }
        let mid = benchmark * self.tables.market_ratio(category) * self.config.regional_multiplier;
        let low = mid * self.tables.market_band.low;
        let high = mid * self.tables.market_band.high;
        let avg_paid = line.avg_paid_per_unit();

        let position = if avg_paid < low {
            MarketPosition::BelowMarket
        } else if avg_paid > high {
            MarketPosition::AboveMarket
        } else {
            MarketPosition::AtMarket
        };
        let annual_gap = if position == MarketPosition::BelowMarket {
            money((mid - avg_paid) * line.units * factor)
        } else {
            Decimal::ZERO
        };

        Some(CodeRateComparison {
            code: code.to_string(),
            units: line.units,
            avg_paid: avg_paid.round_dp(2),
            market_low: low.round_dp(2),
            market_mid: mid.round_dp(2),
            market_high: high.round_dp(2),
            position,
            annual_gap,
        })
    }

    /// Project the annual effect of proposed per-code rates from the
    /// payer's historical volume in `snapshot`.
    pub fn model_change(
        &self,
        snapshot: &RevenueSnapshot,
        payer: &Payer,
        changes: &[ProposedRate],
        range: DateRange,
    ) -> ContractModel {
        let index = snapshot.index();
        let factor = range.annualization_factor();
        let lines = index.lines_by_payer_and_code();

        let current_annual_revenue = lines
            .range((payer.id, String::new())..)
            .take_while(|((id, _), _)| *id == payer.id)
            .map(|(_, line)| line.paid)
            .sum::<Decimal>()
            * factor;

        let impacts: Vec<RateChangeImpact> = changes
            .iter()
            .map(|change| {
                let line = lines
                    .get(&(payer.id, change.code.clone()))
                    .copied()
                    .unwrap_or_default();
                let annual_units = line.units * factor;
                let current_rate = line.avg_paid_per_unit();
                RateChangeImpact {
                    code: change.code.clone(),
                    current_rate: current_rate.round_dp(2),
                    proposed_rate: change.rate,
                    annual_units: annual_units.round_dp(1),
                    annual_impact: ((change.rate - current_rate) * annual_units).round_dp(2),
                }
            })
            .collect();

        let annual_impact: Decimal = impacts.iter().map(|i| i.annual_impact).sum();
        let current = current_annual_revenue.round_dp(2);
        ContractModel {
            payer_id: payer.id,
            payer_name: payer.name.clone(),
            range,
            changes: impacts,
            current_annual_revenue: current,
            projected_annual_revenue: (current + annual_impact).round_dp(2),
            annual_impact,
            percent_change: percent(annual_impact, current).round_dp(1),
        }
    }
}

fn payer_identity(index: &SnapshotIndex<'_>, payer_id: Uuid) -> (String, PayerCategory) {
    index.payer(payer_id).map_or_else(
        || (payer_id.to_string(), PayerCategory::Other),
        |p| (p.name.clone(), p.category),
    )
}

/// Rating and base priority for a reimbursement rate, in percent.
pub fn rate_contract(reimbursement_rate: Decimal, opportunity: Decimal) -> (ContractRating, Priority) {
    let size = PriorityThresholds::LEAKAGE;
    if reimbursement_rate < dec!(40) {
        (ContractRating::Poor, Priority::Critical)
    } else if reimbursement_rate < dec!(50) {
        (ContractRating::BelowAverage, Priority::High)
    } else if reimbursement_rate < dec!(60) {
        let priority = if opportunity >= size.high {
            Priority::High
        } else {
            Priority::Medium
        };
        (ContractRating::Average, priority)
    } else if reimbursement_rate < dec!(70) {
        let priority = if opportunity >= size.medium {
            Priority::Medium
        } else {
            Priority::Low
        };
        (ContractRating::Good, priority)
    } else {
        (ContractRating::Excellent, Priority::Low)
    }
}

fn talking_points(scorecard: &PayerScorecard) -> Vec<String> {
    let mut points: Vec<String> = scorecard
        .codes
        .iter()
        .filter(|c| c.position == MarketPosition::BelowMarket)
        .map(|c| {
            format!(
                "{}: paid ${} per unit against a market midpoint of ${}; request ${}",
                c.code, c.avg_paid, c.market_mid, c.market_mid
            )
        })
        .collect();

    if scorecard.denial_rate > HIGH_DENIAL_RATE {
        points.push(format!(
            "Denial rate of {}% exceeds the {}% norm; request a review of denial criteria",
            scorecard.denial_rate, HIGH_DENIAL_RATE
        ));
    }
    if scorecard.avg_days_to_payment > SLOW_PAYMENT_DAYS {
        points.push(format!(
            "Average payment takes {} days; negotiate prompt-pay terms under {} days",
            scorecard.avg_days_to_payment, SLOW_PAYMENT_DAYS
        ));
    }
    if scorecard.claims > VOLUME_LEVERAGE_CLAIMS {
        points.push(format!(
            "{} claims this period ({}% of volume) give leverage for better terms",
            scorecard.claims, scorecard.volume_share
        ));
    }
    points
}

fn renegotiation_opportunity(
    organization_id: Uuid,
    scorecard: &PayerScorecard,
    now: DateTime<Utc>,
) -> RevenueOpportunity {
    let mut action_items = vec![
        format!("Request the current fee schedule from {}", scorecard.payer_name),
        "Prepare rate comparison for below-market codes".to_string(),
    ];
    action_items.extend(scorecard.talking_points.iter().cloned());
    action_items.push("Schedule the renegotiation meeting".to_string());

    RevenueOpportunity {
        id: Uuid::new_v4(),
        organization_id,
        category: OpportunityCategory::Contract,
        opportunity_type: RENEGOTIATE_CONTRACT.to_string(),
        title: format!("Renegotiate contract with {}", scorecard.payer_name),
        description: format!(
            "{} contract rated {} at {}% reimbursement across {} claims",
            scorecard.payer_name,
            scorecard.rating.as_str(),
            scorecard.reimbursement_rate,
            scorecard.claims
        ),
        estimated_value: scorecard.opportunity_value,
        confidence: CONTRACT_CONFIDENCE,
        priority: scorecard.priority,
        related_entity: Some(scorecard.payer_id.to_string()),
        action_items,
        status: OpportunityStatus::Identified,
        captured_value: None,
        notes: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Claim, ClaimLine, ClaimStatus};

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn analyzer() -> ContractAnalyzer {
        ContractAnalyzer::new(
            Arc::new(EngineConfig::default()),
            Arc::new(BenchmarkTables::standard()),
        )
    }

    fn payer(category: PayerCategory) -> Payer {
        Payer {
            id: Uuid::new_v4(),
            organization_id: Uuid::nil(),
            name: "Acme Health".to_string(),
            category,
        }
    }

    fn claim(payer_id: Uuid, billed: Decimal, paid: Decimal, status: ClaimStatus, lines: Vec<ClaimLine>) -> Claim {
        Claim {
            id: Uuid::new_v4(),
            organization_id: Uuid::nil(),
            payer_id,
            patient_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            total_charged: billed,
            total_allowed: paid,
            total_paid: paid,
            status,
            submission_date: Some(date(3, 1)),
            payment_date: Some(date(3, 21)),
            lines,
        }
    }

    fn line(code: &str, paid: Decimal) -> ClaimLine {
        ClaimLine {
            id: Uuid::new_v4(),
            charge_id: None,
            code: code.to_string(),
            units: 1,
            charged: dec!(100),
            allowed: paid,
            paid,
        }
    }

    fn range() -> DateRange {
        DateRange::new(date(1, 1), date(12, 31)).unwrap()
    }

    #[test]
    fn test_low_reimbursement_payer_is_poor_and_critical() {
        let payer = payer(PayerCategory::Commercial);
        let mut snapshot = RevenueSnapshot {
            payers: vec![payer.clone()],
            ..RevenueSnapshot::default()
        };
        for _ in 0..12 {
            snapshot
                .claims
                .push(claim(payer.id, dec!(100), dec!(25), ClaimStatus::Paid, Vec::new()));
        }

        let report = analyzer().analyze(&snapshot, &ContractRequest::default(), range(), Utc::now());
        let card = &report.scorecards[0];
        assert_eq!(card.reimbursement_rate, dec!(25));
        assert_eq!(card.rating, ContractRating::Poor);
        assert_eq!(card.priority, Priority::Critical);
        assert_eq!(report.opportunities.len(), 1);
        assert_eq!(report.opportunities[0].opportunity_type, RENEGOTIATE_CONTRACT);
        assert_eq!(report.opportunities[0].related_entity, Some(payer.id.to_string()));
    }

    #[test]
    fn test_min_claims_floor() {
        let payer = payer(PayerCategory::Commercial);
        let mut snapshot = RevenueSnapshot::default();
        for _ in 0..5 {
            snapshot
                .claims
                .push(claim(payer.id, dec!(100), dec!(25), ClaimStatus::Paid, Vec::new()));
        }
        let report = analyzer().analyze(&snapshot, &ContractRequest::default(), range(), Utc::now());
        assert!(report.scorecards.is_empty());
    }

    #[test]
    fn test_below_market_code_gap_and_talking_point() {
        let payer = payer(PayerCategory::Medicare);
        let mut snapshot = RevenueSnapshot {
            payers: vec![payer.clone()],
            ..RevenueSnapshot::default()
        };
        for _ in 0..10 {
            snapshot.claims.push(claim(
                payer.id,
                dec!(100),
                dec!(80),
                ClaimStatus::Paid,
                vec![line("98940", dec!(20))],
            ));
        }
        let report = analyzer().analyze(&snapshot, &ContractRequest::default(), range(), Utc::now());
        let card = &report.scorecards[0];
        assert_eq!(card.rating, ContractRating::Excellent);
        let code = &card.codes[0];
        assert_eq!(code.position, MarketPosition::BelowMarket);
        assert_eq!(code.market_mid, dec!(28.50));
        assert!(code.annual_gap > Decimal::ZERO);
        assert!(card.talking_points.iter().any(|p| p.starts_with("98940")));
    }

    #[test]
    fn test_denials_escalate_priority() {
        let payer = payer(PayerCategory::Commercial);
        let mut snapshot = RevenueSnapshot::default();
        for i in 0..10 {
            let status = if i < 2 { ClaimStatus::Denied } else { ClaimStatus::Paid };
            snapshot
                .claims
                .push(claim(payer.id, dec!(100), dec!(75), status, Vec::new()));
        }
        let report = analyzer().analyze(&snapshot, &ContractRequest::default(), range(), Utc::now());
        let card = &report.scorecards[0];
        assert_eq!(card.denial_rate, dec!(20));
        assert_eq!(card.rating, ContractRating::Excellent);
        assert_eq!(card.priority, Priority::Medium);
        assert!(report.opportunities.is_empty());
    }

    #[test]
    fn test_rating_ladder() {
        assert_eq!(rate_contract(dec!(45), Decimal::ZERO), (ContractRating::BelowAverage, Priority::High));
        assert_eq!(rate_contract(dec!(55), dec!(6000)), (ContractRating::Average, Priority::High));
        assert_eq!(rate_contract(dec!(55), dec!(100)), (ContractRating::Average, Priority::Medium));
        assert_eq!(rate_contract(dec!(65), dec!(1500)), (ContractRating::Good, Priority::Medium));
        assert_eq!(rate_contract(dec!(65), Decimal::ZERO), (ContractRating::Good, Priority::Low));
    }

    #[test]
    fn test_model_change_projects_delta() {
        let payer = payer(PayerCategory::Commercial);
        let mut snapshot = RevenueSnapshot::default();
        for _ in 0..10 {
            snapshot.claims.push(claim(
                payer.id,
                dec!(100),
                dec!(30),
                ClaimStatus::Paid,
                vec![line("98940", dec!(30))],
            ));
        }
        let window = DateRange::new(date(1, 1), date(12, 30)).unwrap();
        assert_eq!(window.days(), 365);
        let model = analyzer().model_change(
            &snapshot,
            &payer,
            &[ProposedRate {
                code: "98940".to_string(),
                rate: dec!(35),
            }],
            window,
        );
        assert_eq!(model.current_annual_revenue, dec!(300));
        assert_eq!(model.annual_impact, dec!(50));
        assert_eq!(model.projected_annual_revenue, dec!(350));
        assert_eq!(model.percent_change, dec!(16.7));
    }
}
