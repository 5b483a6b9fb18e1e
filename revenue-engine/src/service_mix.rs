//! Service mix analysis: category profitability, payer mix, provider time
//! utilization, and the capacity recommendations synthesized from them.

use crate::aggregation::{DateRange, LineTotals, RevenueSnapshot, SnapshotIndex};
use crate::benchmarks::{BenchmarkTables, ServiceCategory};
use crate::config::EngineConfig;
use crate::error::RevenueResult;
use crate::findings::{OpportunityCategory, RevenueOpportunity};
use crate::lifecycle::OpportunityStatus;
use crate::scoring::{money, percent, rank_key, ratio, Priority, PriorityThresholds};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceMixRequest {
    pub organization_id: Uuid,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub provider_id: Option<Uuid>,
    /// Minimum charge lines for a category to be reported, default 1
    pub min_volume: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profitability {
    HighMargin,
    Standard,
    Unprofitable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryProfitability {
    pub category: ServiceCategory,
    pub label: String,
    pub charge_count: u64,
    pub units: Decimal,
    pub revenue: Decimal,
    pub reimbursement: Decimal,
    pub reimbursement_rate: Decimal,
    /// Reimbursement rate net of overhead, in percent
    pub profit_margin: Decimal,
    pub minutes: Decimal,
    pub revenue_per_minute: Decimal,
    pub profitability: Profitability,
    pub priority: Priority,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayerSignal {
    pub priority: Priority,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayerMixEntry {
    pub payer_id: Uuid,
    pub payer_name: String,
    pub claims: u64,
    pub billed: Decimal,
    pub paid: Decimal,
    pub reimbursement_rate: Decimal,
    pub denial_rate: Decimal,
    pub avg_days_to_payment: Decimal,
    pub volume_share: Decimal,
    pub priority: Priority,
    pub signals: Vec<PayerSignal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderUtilization {
    pub provider_id: Uuid,
    pub provider_name: String,
    pub encounters: u64,
    pub minutes: Decimal,
    pub revenue: Decimal,
    pub revenue_per_hour: Decimal,
    pub avg_minutes_per_encounter: Decimal,
    pub avg_revenue_per_encounter: Decimal,
    pub utilization_percent: Decimal,
    pub priority: Priority,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMixSummary {
    pub total_revenue: Decimal,
    pub total_reimbursement: Decimal,
    pub reimbursement_rate: Decimal,
    pub total_minutes: Decimal,
    pub uncategorized_revenue: Decimal,
    pub categories_analyzed: usize,
    pub high_margin_categories: usize,
    pub unprofitable_categories: usize,
    pub payers_analyzed: usize,
    pub providers_analyzed: usize,
    pub recommendation_value: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMixReport {
    pub range: DateRange,
    pub summary: ServiceMixSummary,
    pub categories: Vec<CategoryProfitability>,
    pub payer_mix: Vec<PayerMixEntry>,
    pub providers: Vec<ProviderUtilization>,
    pub recommendations: Vec<RevenueOpportunity>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Default)]
struct CategoryAccumulator {
    charges: u64,
    units: Decimal,
    billed: Decimal,
    lines: LineTotals,
}

pub struct ServiceMixAnalyzer {
    config: Arc<EngineConfig>,
    tables: Arc<BenchmarkTables>,
}

impl ServiceMixAnalyzer {
    pub fn new(config: Arc<EngineConfig>, tables: Arc<BenchmarkTables>) -> Self {
        Self { config, tables }
    }

    pub fn resolve_range(&self, request: &ServiceMixRequest, as_of: NaiveDate) -> RevenueResult<DateRange> {
        let end = request.end_date.unwrap_or(as_of);
        let start = request
            .start_date
            .unwrap_or_else(|| DateRange::last_months(end, self.config.service_mix_window_months).start);
        DateRange::new(start, end)
    }

    pub fn analyze(
        &self,
        snapshot: &RevenueSnapshot,
        request: &ServiceMixRequest,
        range: DateRange,
        now: DateTime<Utc>,
    ) -> ServiceMixReport {
        let index = snapshot.index();
        let min_volume = request.min_volume.unwrap_or(1);

        let (categories, uncategorized_revenue) = self.category_profitability(&index, min_volume);
        let payer_mix = self.payer_mix(&index);
        let providers = self.provider_utilization(&index, range);
        let recommendations = self.capacity_recommendations(
            snapshot.organization_id,
            &categories,
            &payer_mix,
            &providers,
            now,
        );

        let total_revenue: Decimal = snapshot.charges.iter().map(|c| c.billed()).sum();
        let total_reimbursement: Decimal = snapshot
            .charges
            .iter()
            .map(|c| index.line_totals(c.id).paid)
            .sum();
        let summary = ServiceMixSummary {
            total_revenue: total_revenue.round_dp(2),
            total_reimbursement: total_reimbursement.round_dp(2),
            reimbursement_rate: percent(total_reimbursement, total_revenue).round_dp(2),
            total_minutes: categories.iter().map(|c| c.minutes).sum(),
            uncategorized_revenue: uncategorized_revenue.round_dp(2),
            categories_analyzed: categories.len(),
            high_margin_categories: categories
                .iter()
                .filter(|c| c.profitability == Profitability::HighMargin)
                .count(),
            unprofitable_categories: categories
                .iter()
                .filter(|c| c.profitability == Profitability::Unprofitable)
                .count(),
            payers_analyzed: payer_mix.len(),
            providers_analyzed: providers.len(),
            recommendation_value: recommendations.iter().map(|r| r.estimated_value).sum(),
        };

        ServiceMixReport {
            range,
            summary,
            categories,
            payer_mix,
            providers,
            recommendations,
            generated_at: now,
        }
    }

    // =========================================================================
    // Category profitability
    // =========================================================================

    fn category_profitability(
        &self,
        index: &SnapshotIndex<'_>,
        min_volume: u64,
    ) -> (Vec<CategoryProfitability>, Decimal) {
        let mut groups: BTreeMap<ServiceCategory, CategoryAccumulator> = BTreeMap::new();
        let mut uncategorized = Decimal::ZERO;
        for charge in &index.snapshot.charges {
            match self.tables.category_of(&charge.code) {
                Some(def) => {
                    let acc = groups.entry(def.category).or_default();
                    acc.charges += 1;
                    acc.units += Decimal::from(charge.units);
                    acc.billed += charge.billed();
                    acc.lines.merge(&index.line_totals(charge.id));
                }
                None => uncategorized += charge.billed(),
            }
        }

        let mut categories: Vec<CategoryProfitability> = groups
            .into_iter()
            .filter(|(_, acc)| acc.charges >= min_volume)
            .map(|(category, acc)| {
                let minutes_per_unit = self
                    .tables
                    .categories
                    .iter()
                    .find(|d| d.category == category)
                    .map(|d| d.minutes_per_unit)
                    .unwrap_or_default();
                let minutes = acc.units * minutes_per_unit;
                let reimbursement_rate = percent(acc.lines.paid, acc.billed);
                let revenue_per_minute = ratio(acc.billed, minutes);
                let profitability = classify_category(revenue_per_minute, reimbursement_rate);
                let (priority, recommendation) = category_recommendation(category, profitability, reimbursement_rate);
                CategoryProfitability {
                    category,
                    label: category.label().to_string(),
                    charge_count: acc.charges,
                    units: acc.units,
                    revenue: acc.billed.round_dp(2),
                    reimbursement: acc.lines.paid.round_dp(2),
                    reimbursement_rate: reimbursement_rate.round_dp(2),
                    profit_margin: (reimbursement_rate * (Decimal::ONE - self.config.overhead_rate)).round_dp(2),
                    minutes,
                    revenue_per_minute: revenue_per_minute.round_dp(2),
                    profitability,
                    priority,
                    recommendation,
                }
            })
            .collect();
        categories.sort_by(|a, b| b.revenue.cmp(&a.revenue).then_with(|| a.category.cmp(&b.category)));
        (categories, uncategorized)
    }

    // =========================================================================
    // Payer mix
    // =========================================================================

    fn payer_mix(&self, index: &SnapshotIndex<'_>) -> Vec<PayerMixEntry> {
        let by_payer = index.claims_by_payer();
        let total_billed: Decimal = by_payer.values().map(|t| t.billed).sum();

        let mut entries: Vec<PayerMixEntry> = by_payer
            .into_iter()
            .map(|(payer_id, totals)| {
                let reimbursement_rate = totals.reimbursement_rate();
                let denial_rate = totals.denial_rate();
                let days = totals.avg_days_to_payment();
                let share = percent(totals.billed, total_billed);

                let mut signals = Vec::new();
                if reimbursement_rate < dec!(40) {
                    let priority = if share >= dec!(20) { Priority::Critical } else { Priority::High };
                    signals.push(PayerSignal {
                        priority,
                        message: format!(
                            "Reimbursement at {}% of billed; renegotiate rates",
                            reimbursement_rate.round_dp(1)
                        ),
                    });
                }
                if denial_rate > dec!(20) {
                    signals.push(PayerSignal {
                        priority: Priority::High,
                        message: format!("Denial rate {}% needs a root-cause review", denial_rate.round_dp(1)),
                    });
                }
                if days > dec!(60) {
                    signals.push(PayerSignal {
                        priority: Priority::Medium,
                        message: format!("Average {} days to payment; escalate follow-up", days.round_dp(0)),
                    });
                }
                if reimbursement_rate > dec!(70) && share < dec!(10) {
                    signals.push(PayerSignal {
                        priority: Priority::Medium,
                        message: "Well-paying payer with low volume; grow this payer".to_string(),
                    });
                }

                PayerMixEntry {
                    payer_id,
                    payer_name: payer_name(index, payer_id),
                    claims: totals.claims,
                    billed: totals.billed.round_dp(2),
                    paid: totals.paid.round_dp(2),
                    reimbursement_rate: reimbursement_rate.round_dp(2),
                    denial_rate: denial_rate.round_dp(2),
                    avg_days_to_payment: days.round_dp(1),
                    volume_share: share.round_dp(2),
                    priority: signals.iter().map(|s| s.priority).max().unwrap_or(Priority::Low),
                    signals,
                }
            })
            .collect();
        entries.sort_by(|a, b| b.billed.cmp(&a.billed).then_with(|| a.payer_id.cmp(&b.payer_id)));
        entries
    }

    // =========================================================================
    // Provider time
    // =========================================================================

    fn provider_utilization(&self, index: &SnapshotIndex<'_>, range: DateRange) -> Vec<ProviderUtilization> {
        let capacity_minutes = self.config.provider_capacity_hours_per_month * range.months() * dec!(60);

        let mut per_provider: BTreeMap<Uuid, (Decimal, Decimal, BTreeSet<Uuid>)> = BTreeMap::new();
        for charge in &index.snapshot.charges {
            let entry = per_provider.entry(charge.provider_id).or_default();
            entry.0 += Decimal::from(charge.units) * self.tables.minutes_for(&charge.code);
            entry.1 += charge.billed();
            if let Some(encounter_id) = charge.encounter_id {
                entry.2.insert(encounter_id);
            }
        }

        per_provider
            .into_iter()
            .map(|(provider_id, (minutes, revenue, encounters))| {
                let encounter_count = Decimal::from(encounters.len());
                let hours = minutes / dec!(60);
                let revenue_per_hour = ratio(revenue, hours);
                let utilization = percent(minutes, capacity_minutes);

                let mut priority = Priority::Low;
                let mut notes = Vec::new();
                if revenue_per_hour < dec!(150) {
                    priority = priority.max(Priority::High);
                    notes.push(format!(
                        "Revenue of ${}/hour is below the $150 efficiency floor",
                        revenue_per_hour.round_dp(2)
                    ));
                }
                if utilization < dec!(50) {
                    priority = priority.max(Priority::Medium);
                    notes.push(format!("Utilization {}%; grow patient volume", utilization.round_dp(1)));
                }
                if utilization > dec!(90) {
                    priority = priority.max(Priority::Medium);
                    notes.push(format!("Utilization {}%; add capacity", utilization.round_dp(1)));
                }
                if revenue_per_hour > dec!(300) {
                    notes.push("Revenue per hour is a best-practice model for the practice".to_string());
                }

                ProviderUtilization {
                    provider_id,
                    provider_name: provider_name(index, provider_id),
                    encounters: encounters.len() as u64,
                    minutes,
                    revenue: revenue.round_dp(2),
                    revenue_per_hour: revenue_per_hour.round_dp(2),
                    avg_minutes_per_encounter: ratio(minutes, encounter_count).round_dp(1),
                    avg_revenue_per_encounter: ratio(revenue, encounter_count).round_dp(2),
                    utilization_percent: utilization.round_dp(2),
                    priority,
                    notes,
                }
            })
            .collect()
    }

    // =========================================================================
    // Capacity recommendations
    // =========================================================================

    fn capacity_recommendations(
        &self,
        organization_id: Uuid,
        categories: &[CategoryProfitability],
        payer_mix: &[PayerMixEntry],
        providers: &[ProviderUtilization],
        now: DateTime<Utc>,
    ) -> Vec<RevenueOpportunity> {
        let mut out = Vec::new();

        if let Some(top) = categories
            .iter()
            .filter(|c| c.profitability == Profitability::HighMargin)
            .max_by(|a, b| a.reimbursement.cmp(&b.reimbursement))
        {
            out.push(self.opportunity(
                organization_id,
                "expand_service",
                format!("Expand {}", top.label),
                format!(
                    "{} earns ${}/minute at a {}% reimbursement rate",
                    top.label, top.revenue_per_minute, top.reimbursement_rate
                ),
                money(top.reimbursement * dec!(0.25)),
                70,
                Some(top.label.clone()),
                vec![
                    "Add schedule blocks for this service".to_string(),
                    "Train staff to identify eligible patients".to_string(),
                ],
                now,
            ));
        }

        for category in categories.iter().filter(|c| c.profitability == Profitability::Unprofitable) {
            let unpaid_share = Decimal::ONE - category.reimbursement_rate / dec!(100);
            out.push(self.opportunity(
                organization_id,
                "review_service",
                format!("Review {}", category.label),
                format!(
                    "{} returns ${}/minute at a {}% reimbursement rate",
                    category.label, category.revenue_per_minute, category.reimbursement_rate
                ),
                money(category.revenue * unpaid_share.max(Decimal::ZERO) * dec!(0.5)),
                65,
                Some(category.label.clone()),
                vec![
                    "Verify coverage and documentation for this service".to_string(),
                    "Consider bundling or reducing low-yield time".to_string(),
                ],
                now,
            ));
        }

        let low_payers: Vec<&PayerMixEntry> = payer_mix
            .iter()
            .filter(|p| p.reimbursement_rate < dec!(50))
            .collect();
        let low_share: Decimal = low_payers.iter().map(|p| p.volume_share).sum();
        if low_share > dec!(5) {
            let gap: Decimal = low_payers.iter().map(|p| (p.billed - p.paid).max(Decimal::ZERO)).sum();
            out.push(self.opportunity(
                organization_id,
                "rebalance_payer_mix",
                "Rebalance payer mix".to_string(),
                format!(
                    "{} payers reimbursing under 50% make up {}% of billed volume",
                    low_payers.len(),
                    low_share.round_dp(1)
                ),
                money(gap * dec!(0.30)),
                60,
                Some("payer_mix".to_string()),
                vec![
                    "Renegotiate or limit new patients from low-paying payers".to_string(),
                    "Market to better-paying payer populations".to_string(),
                ],
                now,
            ));
        }

        for provider in providers.iter().filter(|p| p.utilization_percent < dec!(60)) {
            let gap = (dec!(70) - provider.utilization_percent) / dec!(100);
            out.push(self.opportunity(
                organization_id,
                "increase_utilization",
                format!("Raise utilization for {}", provider.provider_name),
                format!(
                    "{} is at {}% of capacity against a 70% target",
                    provider.provider_name, provider.utilization_percent
                ),
                money(provider.revenue * gap),
                65,
                Some(provider.provider_id.to_string()),
                vec![
                    "Open recall and reactivation outreach".to_string(),
                    "Fill schedule gaps with waitlist patients".to_string(),
                ],
                now,
            ));
        }

        out.retain(|o| o.estimated_value >= self.config.opportunity_floor);
        out.sort_by(|a, b| {
            rank_key(a.priority, a.estimated_value)
                .cmp(&rank_key(b.priority, b.estimated_value))
                .then_with(|| a.opportunity_type.cmp(&b.opportunity_type))
        });
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn opportunity(
        &self,
        organization_id: Uuid,
        opportunity_type: &str,
        title: String,
        description: String,
        estimated_value: Decimal,
        confidence: u8,
        related_entity: Option<String>,
        action_items: Vec<String>,
        now: DateTime<Utc>,
    ) -> RevenueOpportunity {
        RevenueOpportunity {
            id: Uuid::new_v4(),
            organization_id,
            category: OpportunityCategory::ServiceMix,
            opportunity_type: opportunity_type.to_string(),
            title,
            description,
            estimated_value,
            confidence,
            priority: PriorityThresholds::LEAKAGE.classify(estimated_value),
            related_entity,
            action_items,
            status: OpportunityStatus::Identified,
            captured_value: None,
            notes: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

fn classify_category(revenue_per_minute: Decimal, reimbursement_rate: Decimal) -> Profitability {
    if revenue_per_minute > dec!(3.00) && reimbursement_rate > dec!(60) {
        Profitability::HighMargin
    } else if revenue_per_minute < dec!(1.50) || reimbursement_rate < dec!(30) {
        Profitability::Unprofitable
    } else {
        Profitability::Standard
    }
}

fn category_recommendation(
    category: ServiceCategory,
    profitability: Profitability,
    reimbursement_rate: Decimal,
) -> (Priority, String) {
    match profitability {
        Profitability::HighMargin => (
            Priority::Medium,
            match category {
                ServiceCategory::Manipulation => "Core service performing well; protect visit volume".to_string(),
                ServiceCategory::NewPatientVisit | ServiceCategory::EstablishedPatientVisit => {
                    "Well-documented visits pay well; keep E&M documentation thorough".to_string()
                }
                _ => format!("Strong margin; offer {} to more eligible patients", category.label().to_lowercase()),
            },
        ),
        Profitability::Unprofitable => (
            Priority::High,
            if reimbursement_rate < dec!(30) {
                format!(
                    "Only {}% of billed {} is collected; check coverage and denials",
                    reimbursement_rate.round_dp(1),
                    category.label().to_lowercase()
                )
            } else {
                match category {
                    ServiceCategory::UnattendedModalities | ServiceCategory::Supplies => {
                        "Low revenue per minute; delegate to staff or bundle into visits".to_string()
                    }
                    _ => "Low revenue per minute of provider time; review scheduling and pricing".to_string(),
                }
            },
        ),
        Profitability::Standard => (
            Priority::Low,
            "Performing within expected range; monitor".to_string(),
        ),
    }
}

fn payer_name(index: &SnapshotIndex<'_>, payer_id: Uuid) -> String {
    index
        .payer(payer_id)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| payer_id.to_string())
}

fn provider_name(index: &SnapshotIndex<'_>, provider_id: Uuid) -> String {
    index
        .snapshot
        .providers
        .iter()
        .find(|p| p.id == provider_id)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| provider_id.to_string())
}
