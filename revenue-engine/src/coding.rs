//! Coding optimization
//!
//! Compares E&M level distribution, modifier usage and bundling patterns
//! with the benchmark tables, practice-wide and per provider. Overcoding is
//! reported as compliance exposure, never as revenue.

use crate::aggregation::{DateRange, RevenueSnapshot, SnapshotIndex};
use crate::benchmarks::{weighted_level, BenchmarkTables, EmFamily};
use crate::config::EngineConfig;
use crate::error::RevenueResult;
use crate::findings::{OpportunityCategory, RevenueOpportunity};
use crate::lifecycle::OpportunityStatus;
use crate::models::*;
use crate::scoring::{money, percent, rank_key, ratio, ComplianceRisk, Priority, PriorityThresholds};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

const UNDERCODING_VARIANCE: Decimal = dec!(-0.3);
const OVERCODING_VARIANCE: Decimal = dec!(0.5);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodingRequest {
    pub organization_id: Uuid,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub provider_id: Option<Uuid>,
    /// Minimum occurrences before a pattern is reported, default 3
    pub min_volume: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodingStatus {
    Undercoding,
    Aligned,
    Overcoding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmLevelAnalysis {
    /// `new_patient` or `established_patient`
    pub family: String,
    pub visits: u64,
    pub level_counts: Vec<u64>,
    pub actual_distribution: Vec<Decimal>,
    pub benchmark_distribution: Vec<Decimal>,
    pub actual_average_level: Decimal,
    pub benchmark_average_level: Decimal,
    pub variance: Decimal,
    pub status: CodingStatus,
    /// Annualized; zero unless undercoding
    pub potential_revenue: Decimal,
    pub compliance_risk: ComplianceRisk,
    pub priority: Priority,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierFinding {
    pub modifier: String,
    pub description: String,
    pub eligible: u64,
    pub with_modifier: u64,
    pub missing: u64,
    pub usage_rate: Decimal,
    /// Annualized
    pub potential_revenue: Decimal,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundlingFinding {
    pub primary_code: String,
    pub secondary_code: String,
    pub reason: String,
    pub occurrences: u64,
    /// Annualized secondary-code revenue exposed to denial
    pub revenue_at_risk: Decimal,
    pub priority: Priority,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnderUnitFinding {
    pub code: String,
    pub single_unit_charges: u64,
    pub avg_fee: Decimal,
    /// Annualized
    pub potential_revenue: Decimal,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCodingProfile {
    pub provider_id: Uuid,
    pub provider_name: String,
    pub em_visits: u64,
    pub em_variance: Decimal,
    pub modifier_usage_rate: Decimal,
    pub compliance_score: u8,
    pub needs_attention: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentationIssue {
    MissingNote,
    InsufficientDiagnoses,
    HighLevelThinDocumentation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentationFinding {
    pub issue: DocumentationIssue,
    pub occurrences: u64,
    pub risk_amount: Decimal,
    pub priority: Priority,
    pub recommendation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodingSummary {
    pub em_visits: u64,
    pub undercoded_families: usize,
    pub overcoded_families: usize,
    pub missed_modifier_cases: u64,
    pub bundling_risks: usize,
    pub providers_needing_attention: usize,
    pub documentation_issues: u64,
    pub documentation_risk: Decimal,
    pub opportunity_value: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodingReport {
    pub range: DateRange,
    pub summary: CodingSummary,
    pub em_analysis: Vec<EmLevelAnalysis>,
    pub modifiers: Vec<ModifierFinding>,
    pub bundling: Vec<BundlingFinding>,
    pub under_units: Vec<UnderUnitFinding>,
    pub providers: Vec<ProviderCodingProfile>,
    pub documentation: Vec<DocumentationFinding>,
    pub opportunities: Vec<RevenueOpportunity>,
    pub generated_at: DateTime<Utc>,
}

pub struct CodingOptimizer {
    config: Arc<EngineConfig>,
    tables: Arc<BenchmarkTables>,
}

impl CodingOptimizer {
    pub fn new(config: Arc<EngineConfig>, tables: Arc<BenchmarkTables>) -> Self {
        Self { config, tables }
    }

    pub fn resolve_range(&self, request: &CodingRequest, as_of: NaiveDate) -> RevenueResult<DateRange> {
        let end = request.end_date.unwrap_or(as_of);
        let start = request
            .start_date
            .unwrap_or_else(|| DateRange::last_months(end, self.config.coding_window_months).start);
        DateRange::new(start, end)
    }

    pub fn analyze(
        &self,
        snapshot: &RevenueSnapshot,
        request: &CodingRequest,
        range: DateRange,
        now: DateTime<Utc>,
    ) -> CodingReport {
        let index = snapshot.index();
        let factor = range.annualization_factor();
        let min_volume = request.min_volume.unwrap_or(3);
        let all: Vec<&Charge> = snapshot.charges.iter().collect();

        let em_analysis = self.em_analysis(&all, factor);
        let modifiers = self.modifier_analysis(&index, &all, factor);
        let bundling = self.bundling_analysis(&index, min_volume, factor);
        let under_units = self.under_unit_analysis(&all, min_volume, factor);
        let providers = self.provider_comparison(&index);
        let documentation = self.documentation_quality(&index);
        let opportunities = self.revenue_opportunities(
            snapshot.organization_id,
            &em_analysis,
            &modifiers,
            &under_units,
            now,
        );

        let summary = CodingSummary {
            em_visits: em_analysis.iter().map(|e| e.visits).sum(),
            undercoded_families: em_analysis
                .iter()
                .filter(|e| e.status == CodingStatus::Undercoding)
                .count(),
            overcoded_families: em_analysis
                .iter()
                .filter(|e| e.status == CodingStatus::Overcoding)
                .count(),
            missed_modifier_cases: modifiers.iter().map(|m| m.missing).sum(),
            bundling_risks: bundling.len(),
            providers_needing_attention: providers.iter().filter(|p| p.needs_attention).count(),
            documentation_issues: documentation.iter().map(|d| d.occurrences).sum(),
            documentation_risk: documentation.iter().map(|d| d.risk_amount).sum(),
            opportunity_value: opportunities.iter().map(|o| o.estimated_value).sum(),
        };

        CodingReport {
            range,
            summary,
            em_analysis,
            modifiers,
            bundling,
            under_units,
            providers,
            documentation,
            opportunities,
            generated_at: now,
        }
    }

    // =========================================================================
    // E&M level distribution
    // =========================================================================

    fn em_analysis(&self, charges: &[&Charge], factor: Decimal) -> Vec<EmLevelAnalysis> {
        [
            ("new_patient", &self.tables.em_new),
            ("established_patient", &self.tables.em_established),
        ]
        .into_iter()
        .filter_map(|(label, family)| self.em_family_analysis(label, family, charges, factor))
        .collect()
    }

    fn em_family_analysis(
        &self,
        label: &str,
        family: &EmFamily,
        charges: &[&Charge],
        factor: Decimal,
    ) -> Option<EmLevelAnalysis> {
        let counts = level_counts(family, charges);
        let visits: u64 = counts.iter().sum();
        if visits == 0 {
            return None;
        }

        let total = Decimal::from(visits);
        let actual_distribution: Vec<Decimal> = counts
            .iter()
            .map(|c| percent(Decimal::from(*c), total).round_dp(1))
            .collect();
        let actual = weighted_level(counts.iter().map(|c| Decimal::from(*c)));
        let benchmark = family.benchmark_average_level();
        let variance = (actual - benchmark).round_dp(2);

        let (status, potential, risk, priority, recommendation) = if variance < UNDERCODING_VARIANCE {
            let potential = money(variance.abs() * self.config.em_level_value * total * factor);
            (
                CodingStatus::Undercoding,
                potential,
                ComplianceRisk::Low,
                PriorityThresholds::LEAKAGE.classify(potential),
                "Visits are coded below benchmark; audit documentation for higher supported levels".to_string(),
            )
        } else if variance > OVERCODING_VARIANCE {
            (
                CodingStatus::Overcoding,
                Decimal::ZERO,
                ComplianceRisk::High,
                Priority::Critical,
                "Visits are coded above benchmark; conduct a compliance audit before billing further".to_string(),
            )
        } else {
            (
                CodingStatus::Aligned,
                Decimal::ZERO,
                ComplianceRisk::None,
                Priority::Low,
                "Level distribution is in line with benchmark".to_string(),
            )
        };

        Some(EmLevelAnalysis {
            family: label.to_string(),
            visits,
            level_counts: counts,
            actual_distribution,
            benchmark_distribution: family.benchmark_distribution.clone(),
            actual_average_level: actual.round_dp(2),
            benchmark_average_level: benchmark.round_dp(2),
            variance,
            status,
            potential_revenue: potential,
            compliance_risk: risk,
            priority,
            recommendation,
        })
    }

    /// Visit-weighted E&M variance across both families.
    fn combined_variance(&self, charges: &[&Charge]) -> (u64, Decimal) {
        let mut visits = 0u64;
        let mut weighted = Decimal::ZERO;
        for family in [&self.tables.em_new, &self.tables.em_established] {
            let counts = level_counts(family, charges);
            let n: u64 = counts.iter().sum();
            if n == 0 {
                continue;
            }
            let actual = weighted_level(counts.iter().map(|c| Decimal::from(*c)));
            visits += n;
            weighted += (actual - family.benchmark_average_level()) * Decimal::from(n);
        }
        (visits, ratio(weighted, Decimal::from(visits)).round_dp(2))
    }

    // =========================================================================
    // Modifiers
    // =========================================================================

    fn modifier_analysis(&self, index: &SnapshotIndex<'_>, charges: &[&Charge], factor: Decimal) -> Vec<ModifierFinding> {
        let mut findings = Vec::new();

        let (eligible, with_modifier, missed_value) = self.separate_service_usage(index, charges);
        if eligible > 0 {
            let missing = eligible - with_modifier;
            let potential = money(missed_value * factor);
            findings.push(ModifierFinding {
                modifier: self.tables.modifiers.separate_service.clone(),
                description: "E&M billed on the same visit as manipulation".to_string(),
                eligible,
                with_modifier,
                missing,
                usage_rate: percent(Decimal::from(with_modifier), Decimal::from(eligible)).round_dp(1),
                potential_revenue: potential,
                priority: PriorityThresholds::LEAKAGE.classify(potential),
            });
        }

        for rule in &self.tables.modifiers.payer_rules {
            let mut eligible = 0u64;
            let mut with_modifier = 0u64;
            let mut missed_value = Decimal::ZERO;
            for charge in charges.iter().filter(|c| {
                rule.codes.contains(&c.code) && index.payer_category(c.payer_id) == Some(rule.payer_category)
            }) {
                eligible += 1;
                if charge.has_modifier(&rule.modifier) {
                    with_modifier += 1;
                } else {
                    missed_value += self.tables.benchmark_rate(&charge.code).unwrap_or_default();
                }
            }
            if eligible == 0 {
                continue;
            }
            let potential = money(missed_value * factor);
            findings.push(ModifierFinding {
                modifier: rule.modifier.clone(),
                description: rule.reason.clone(),
                eligible,
                with_modifier,
                missing: eligible - with_modifier,
                usage_rate: percent(Decimal::from(with_modifier), Decimal::from(eligible)).round_dp(1),
                potential_revenue: potential,
                priority: PriorityThresholds::LEAKAGE.classify(potential),
            });
        }
        findings
    }

    /// (eligible E&M charges, those carrying the modifier, value of the misses)
    fn separate_service_usage(&self, index: &SnapshotIndex<'_>, charges: &[&Charge]) -> (u64, u64, Decimal) {
        let separate = &self.tables.modifiers.separate_service;
        let mut eligible = 0u64;
        let mut with_modifier = 0u64;
        let mut missed_value = Decimal::ZERO;
        for charge in charges.iter().filter(|c| self.tables.is_em(&c.code)) {
            let Some(encounter_id) = charge.encounter_id else {
                continue;
            };
            let same_visit_manipulation = index
                .charges_for_encounter(encounter_id)
                .iter()
                .any(|c| self.tables.is_manipulation(&c.code));
            if !same_visit_manipulation {
                continue;
            }
            eligible += 1;
            if charge.has_modifier(separate) {
                with_modifier += 1;
            } else {
                missed_value += charge.billed() * dec!(0.5);
            }
        }
        (eligible, with_modifier, missed_value)
    }

    // =========================================================================
    // Bundling
    // =========================================================================

    fn bundling_analysis(&self, index: &SnapshotIndex<'_>, min_volume: u64, factor: Decimal) -> Vec<BundlingFinding> {
        let distinct = &self.tables.modifiers.distinct_procedure;
        let mut findings = Vec::new();
        for rule in &self.tables.bundling_rules {
            let mut occurrences = 0u64;
            let mut exposed = Decimal::ZERO;
            for encounter in &index.snapshot.encounters {
                let charges = index.charges_for_encounter(encounter.id);
                if !charges.iter().any(|c| c.code == rule.primary_code) {
                    continue;
                }
                for secondary in charges
                    .iter()
                    .filter(|c| c.code == rule.secondary_code && !c.has_any_modifier(distinct))
                {
                    occurrences += 1;
                    exposed += secondary.billed();
                }
            }
            if occurrences == 0 || occurrences < min_volume {
                continue;
            }
            let at_risk = money(exposed * factor);
            findings.push(BundlingFinding {
                primary_code: rule.primary_code.clone(),
                secondary_code: rule.secondary_code.clone(),
                reason: rule.reason.clone(),
                occurrences,
                revenue_at_risk: at_risk,
                priority: PriorityThresholds::LEAKAGE.classify(at_risk),
                recommendation: format!(
                    "Document a distinct region or session and append {} when billing {} with {}",
                    distinct.iter().cloned().collect::<Vec<_>>().join("/"),
                    rule.secondary_code,
                    rule.primary_code
                ),
            });
        }
        findings.sort_by(|a, b| rank_key(a.priority, a.revenue_at_risk).cmp(&rank_key(b.priority, b.revenue_at_risk)));
        findings
    }

    fn under_unit_analysis(&self, charges: &[&Charge], min_volume: u64, factor: Decimal) -> Vec<UnderUnitFinding> {
        let mut per_code: BTreeMap<&str, (u64, bool, Decimal)> = BTreeMap::new();
        for charge in charges
            .iter()
            .filter(|c| self.tables.timed_therapy_codes.contains(&c.code))
        {
            let entry = per_code.entry(charge.code.as_str()).or_insert((0, true, Decimal::ZERO));
            entry.0 += 1;
            entry.1 &= charge.units <= 1;
            entry.2 += charge.fee;
        }

        per_code
            .into_iter()
            .filter(|(_, (count, all_single, _))| *all_single && *count >= min_volume)
            .map(|(code, (count, _, fees))| {
                let avg_fee = ratio(fees, Decimal::from(count));
                let potential = money(
                    Decimal::from(count) * self.config.under_unit_capture_rate * avg_fee * factor,
                );
                UnderUnitFinding {
                    code: code.to_string(),
                    single_unit_charges: count,
                    avg_fee: avg_fee.round_dp(2),
                    potential_revenue: potential,
                    priority: PriorityThresholds::LEAKAGE.classify(potential),
                }
            })
            .collect()
    }

    // =========================================================================
    // Providers
    // =========================================================================

    fn provider_comparison(&self, index: &SnapshotIndex<'_>) -> Vec<ProviderCodingProfile> {
        let mut by_provider: BTreeMap<Uuid, Vec<&Charge>> = BTreeMap::new();
        for charge in &index.snapshot.charges {
            by_provider.entry(charge.provider_id).or_default().push(charge);
        }

        let mut profiles: Vec<ProviderCodingProfile> = by_provider
            .into_iter()
            .filter_map(|(provider_id, charges)| {
                let (em_visits, variance) = self.combined_variance(&charges);
                if em_visits == 0 {
                    return None;
                }
                let (eligible, with_modifier, _) = self.separate_service_usage(index, &charges);
                let usage = if eligible == 0 {
                    dec!(100)
                } else {
                    percent(Decimal::from(with_modifier), Decimal::from(eligible)).round_dp(1)
                };
                let (score, issues) = compliance_score(variance, usage, self.config.low_modifier_usage_percent);
                Some(ProviderCodingProfile {
                    provider_id,
                    provider_name: index
                        .snapshot
                        .providers
                        .iter()
                        .find(|p| p.id == provider_id)
                        .map(|p| p.name.clone())
                        .unwrap_or_else(|| provider_id.to_string()),
                    em_visits,
                    em_variance: variance,
                    modifier_usage_rate: usage,
                    compliance_score: score,
                    needs_attention: score < 80,
                    issues,
                })
            })
            .collect();
        profiles.sort_by(|a, b| {
            a.compliance_score
                .cmp(&b.compliance_score)
                .then_with(|| a.provider_id.cmp(&b.provider_id))
        });
        profiles
    }

    // =========================================================================
    // Documentation quality
    // =========================================================================

    fn documentation_quality(&self, index: &SnapshotIndex<'_>) -> Vec<DocumentationFinding> {
        let risk = &self.config.documentation_risk;
        let mut counts: BTreeMap<DocumentationIssue, u64> = BTreeMap::new();

        for encounter in index.snapshot.encounters.iter().filter(|e| e.is_completed()) {
            if !encounter.has_note() {
                *counts.entry(DocumentationIssue::MissingNote).or_default() += 1;
            }
            if encounter.diagnosis_codes.len() < 2 {
                *counts.entry(DocumentationIssue::InsufficientDiagnoses).or_default() += 1;
            }
            let note_chars = encounter.note.as_deref().map_or(0, |n| n.trim().chars().count());
            let high_level = index
                .charges_for_encounter(encounter.id)
                .iter()
                .any(|c| self.tables.em_level(&c.code).is_some_and(|level| level >= 4));
            if high_level && note_chars < risk.thin_note_chars {
                *counts.entry(DocumentationIssue::HighLevelThinDocumentation).or_default() += 1;
            }
        }

        counts
            .into_iter()
            .map(|(issue, occurrences)| {
                let (per_case, recommendation) = match issue {
                    DocumentationIssue::MissingNote => (
                        risk.missing_note,
                        "Complete and sign a note for every billed visit",
                    ),
                    DocumentationIssue::InsufficientDiagnoses => (
                        risk.insufficient_diagnoses,
                        "Record all diagnoses supporting medical necessity",
                    ),
                    DocumentationIssue::HighLevelThinDocumentation => (
                        risk.high_level_thin_documentation,
                        "High-level E&M visits need documentation that supports the level billed",
                    ),
                };
                let risk_amount = money(per_case * Decimal::from(occurrences));
                DocumentationFinding {
                    issue,
                    occurrences,
                    risk_amount,
                    priority: PriorityThresholds::LEAKAGE.classify(risk_amount),
                    recommendation: recommendation.to_string(),
                }
            })
            .collect()
    }

    // =========================================================================
    // Revenue opportunities
    // =========================================================================

    /// Bundling pairs are compliance exposure and stay in `bundling` only.
    fn revenue_opportunities(
        &self,
        organization_id: Uuid,
        em: &[EmLevelAnalysis],
        modifiers: &[ModifierFinding],
        under_units: &[UnderUnitFinding],
        now: DateTime<Utc>,
    ) -> Vec<RevenueOpportunity> {
        let mut drafts: Vec<OpportunityDraft> = Vec::new();

        for analysis in em.iter().filter(|a| a.status == CodingStatus::Undercoding) {
            drafts.push(OpportunityDraft {
                opportunity_type: "em_undercoding".to_string(),
                title: format!("Correct {} E&M undercoding", analysis.family.replace('_', " ")),
                description: format!(
                    "Average level {} against a benchmark of {} across {} visits",
                    analysis.actual_average_level, analysis.benchmark_average_level, analysis.visits
                ),
                value: analysis.potential_revenue,
                risk: analysis.compliance_risk,
                related_entity: Some(analysis.family.clone()),
                action_items: vec![
                    "Audit a sample of level 2 visits against documentation".to_string(),
                    "Train providers on E&M level selection".to_string(),
                    "Re-audit after 90 days".to_string(),
                ],
            });
        }

        for finding in modifiers.iter().filter(|m| m.missing > 0) {
            drafts.push(OpportunityDraft {
                opportunity_type: format!("modifier_{}", finding.modifier.to_lowercase()),
                title: format!("Apply modifier {} consistently", finding.modifier),
                description: format!(
                    "{}: {} of {} eligible charges lack the modifier",
                    finding.description, finding.missing, finding.eligible
                ),
                value: finding.potential_revenue,
                risk: ComplianceRisk::Low,
                related_entity: Some(finding.modifier.clone()),
                action_items: vec![
                    format!("Add a charge-entry prompt for modifier {}", finding.modifier),
                    "Confirm documentation supports the modifier".to_string(),
                ],
            });
        }

        for finding in under_units {
            drafts.push(OpportunityDraft {
                opportunity_type: "under_unit_billing".to_string(),
                title: format!("Bill time-based units for {}", finding.code),
                description: format!(
                    "{} charges of {} were all billed as a single unit",
                    finding.single_unit_charges, finding.code
                ),
                value: finding.potential_revenue,
                risk: ComplianceRisk::Low,
                related_entity: Some(finding.code.clone()),
                action_items: vec![
                    "Record treatment minutes for timed codes".to_string(),
                    "Bill units according to total timed minutes".to_string(),
                ],
            });
        }

        let mut opportunities: Vec<RevenueOpportunity> = drafts
            .into_iter()
            .filter(|d| d.value > Decimal::ZERO)
            .map(|d| RevenueOpportunity {
                id: Uuid::new_v4(),
                organization_id,
                category: OpportunityCategory::Coding,
                opportunity_type: d.opportunity_type,
                title: d.title,
                description: d.description,
                estimated_value: d.value,
                confidence: d.risk.confidence(),
                priority: PriorityThresholds::LEAKAGE.classify(d.value),
                related_entity: d.related_entity,
                action_items: d.action_items,
                status: OpportunityStatus::Identified,
                captured_value: None,
                notes: None,
                created_at: now,
                updated_at: now,
                completed_at: None,
            })
            .collect();
        opportunities.sort_by(|a, b| rank_key(a.priority, a.estimated_value).cmp(&rank_key(b.priority, b.estimated_value)));
        opportunities
    }
}

struct OpportunityDraft {
    opportunity_type: String,
    title: String,
    description: String,
    value: Decimal,
    risk: ComplianceRisk,
    related_entity: Option<String>,
    action_items: Vec<String>,
}

/// Visits per level (index 0 is level 1) for one E&M family.
fn level_counts(family: &EmFamily, charges: &[&Charge]) -> Vec<u64> {
    let mut counts = vec![0u64; family.codes.len()];
    for charge in charges {
        if let Some(slot) = family
            .level_of(&charge.code)
            .and_then(|level| counts.get_mut(usize::from(level) - 1))
        {
            *slot += 1;
        }
    }
    counts
}

/// 0-100 score; lower means the provider needs coding attention.
pub fn compliance_score(variance: Decimal, modifier_usage: Decimal, low_usage_threshold: Decimal) -> (u8, Vec<String>) {
    let mut score: i32 = 100;
    let mut issues = Vec::new();
    if variance.abs() > dec!(1.0) {
        score -= 30;
        issues.push(format!("E&M variance {} is far from benchmark", variance));
    } else if variance.abs() > dec!(0.5) {
        score -= 15;
        issues.push(format!("E&M variance {} departs from benchmark", variance));
    }
    if modifier_usage < low_usage_threshold {
        score -= 10;
        issues.push(format!("Separate-service modifier used on {}% of eligible visits", modifier_usage));
    }
    if variance > OVERCODING_VARIANCE {
        score -= 20;
        issues.push("Coding above benchmark carries audit risk".to_string());
    }
    (u8::try_from(score.clamp(0, 100)).unwrap_or(0), issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn optimizer() -> CodingOptimizer {
        CodingOptimizer::new(
            Arc::new(EngineConfig::default()),
            Arc::new(BenchmarkTables::standard()),
        )
    }

    fn visit(snapshot: &mut RevenueSnapshot, provider: Uuid, codes: &[(&str, Option<&str>)]) -> Uuid {
        let encounter = Encounter {
            id: Uuid::new_v4(),
            organization_id: snapshot.organization_id,
            patient_id: Uuid::new_v4(),
            provider_id: provider,
            date: date(1),
            encounter_type: EncounterType::FollowUp,
            status: EncounterStatus::Completed,
            diagnosis_codes: vec!["M54.5".to_string(), "M99.03".to_string()],
            note: Some("x".repeat(300)),
        };
        for (code, modifier) in codes {
            snapshot.charges.push(Charge {
                id: Uuid::new_v4(),
                organization_id: snapshot.organization_id,
                encounter_id: Some(encounter.id),
                patient_id: encounter.patient_id,
                provider_id: provider,
                payer_id: None,
                code: (*code).to_string(),
                service_date: encounter.date,
                fee: dec!(80),
                units: 1,
                modifiers: modifier.iter().map(|m| (*m).to_string()).collect::<BTreeSet<_>>(),
                adjustment: Decimal::ZERO,
                balance: Decimal::ZERO,
                status: ChargeStatus::Billed,
            });
        }
        let id = encounter.id;
        snapshot.encounters.push(encounter);
        id
    }

    fn run(snapshot: &RevenueSnapshot) -> CodingReport {
        let optimizer = optimizer();
        let request = CodingRequest::default();
        let range = DateRange::new(date(1), date(31)).unwrap();
        optimizer.analyze(snapshot, &request, range, Utc::now())
    }

    #[test]
    fn test_undercoding_detected_for_low_levels() {
        let mut snapshot = RevenueSnapshot::default();
        for _ in 0..10 {
            visit(&mut snapshot, Uuid::nil(), &[("99212", None)]);
        }
        let report = run(&snapshot);
        let established = report
            .em_analysis
            .iter()
            .find(|e| e.family == "established_patient")
            .unwrap();
        assert_eq!(established.actual_average_level, dec!(2));
        assert_eq!(established.variance, dec!(-0.83));
        assert_eq!(established.status, CodingStatus::Undercoding);
        assert!(established.potential_revenue > Decimal::ZERO);
        assert!(report
            .opportunities
            .iter()
            .any(|o| o.opportunity_type == "em_undercoding" && o.confidence == 75));
    }

    #[test]
    fn test_overcoding_is_critical_without_revenue() {
        let mut snapshot = RevenueSnapshot::default();
        for _ in 0..5 {
            visit(&mut snapshot, Uuid::nil(), &[("99215", None)]);
        }
        let report = run(&snapshot);
        let established = &report.em_analysis[0];
        assert_eq!(established.status, CodingStatus::Overcoding);
        assert_eq!(established.priority, Priority::Critical);
        assert_eq!(established.potential_revenue, Decimal::ZERO);
        assert!(report.opportunities.iter().all(|o| o.opportunity_type != "em_undercoding"));
    }

    #[test]
    fn test_separate_service_modifier_usage() {
        let mut snapshot = RevenueSnapshot::default();
        visit(&mut snapshot, Uuid::nil(), &[("98940", None), ("99213", None)]);
        visit(&mut snapshot, Uuid::nil(), &[("98940", None), ("99213", Some("25"))]);
        let report = run(&snapshot);
        let finding = report.modifiers.iter().find(|m| m.modifier == "25").unwrap();
        assert_eq!(finding.eligible, 2);
        assert_eq!(finding.missing, 1);
        assert_eq!(finding.usage_rate, dec!(50));
        assert!(finding.potential_revenue > Decimal::ZERO);
    }

    #[test]
    fn test_bundling_pair_needs_volume() {
        let mut snapshot = RevenueSnapshot::default();
        for _ in 0..2 {
            visit(&mut snapshot, Uuid::nil(), &[("98940", None), ("97140", None)]);
        }
        assert!(run(&snapshot).bundling.is_empty());

        visit(&mut snapshot, Uuid::nil(), &[("98940", None), ("97140", None)]);
        visit(&mut snapshot, Uuid::nil(), &[("98940", None), ("97140", Some("59"))]);
        let report = run(&snapshot);
        assert_eq!(report.bundling.len(), 1);
        assert_eq!(report.bundling[0].occurrences, 3);
    }

    #[test]
    fn test_bundling_risk_is_not_an_opportunity() {
        let mut snapshot = RevenueSnapshot::default();
        for _ in 0..4 {
            visit(&mut snapshot, Uuid::nil(), &[("98940", None), ("97140", None)]);
        }
        let report = run(&snapshot);
        assert_eq!(report.bundling.len(), 1);
        assert!(report.bundling[0].revenue_at_risk > Decimal::ZERO);
        assert_eq!(report.summary.bundling_risks, 1);
        assert!(report
            .opportunities
            .iter()
            .all(|o| !o.opportunity_type.contains("bundling")));
    }

    #[test]
    fn test_under_unit_pattern() {
        let mut snapshot = RevenueSnapshot::default();
        for _ in 0..4 {
            visit(&mut snapshot, Uuid::nil(), &[("97110", None)]);
        }
        let report = run(&snapshot);
        assert_eq!(report.under_units.len(), 1);
        assert_eq!(report.under_units[0].single_unit_charges, 4);
    }

    #[test]
    fn test_compliance_score_deductions() {
        assert_eq!(compliance_score(dec!(0.1), dec!(90), dec!(75)).0, 100);
        assert_eq!(compliance_score(dec!(-0.6), dec!(90), dec!(75)).0, 85);
        assert_eq!(compliance_score(dec!(-1.2), dec!(50), dec!(75)).0, 60);
        // overcoding: -15 for the variance and -20 more for its direction
        assert_eq!(compliance_score(dec!(0.7), dec!(90), dec!(75)).0, 65);
        assert_eq!(compliance_score(dec!(1.5), dec!(10), dec!(75)).0, 40);
    }

    #[test]
    fn test_thin_documentation_on_high_level_visit() {
        let mut snapshot = RevenueSnapshot::default();
        let id = visit(&mut snapshot, Uuid::nil(), &[("99214", None)]);
        if let Some(encounter) = snapshot.encounters.iter_mut().find(|e| e.id == id) {
            encounter.note = Some("Brief".to_string());
            encounter.diagnosis_codes.truncate(1);
        }
        let report = run(&snapshot);
        let issues: Vec<_> = report.documentation.iter().map(|d| d.issue).collect();
        assert_eq!(
            issues,
            vec![
                DocumentationIssue::InsufficientDiagnoses,
                DocumentationIssue::HighLevelThinDocumentation
            ]
        );
        assert_eq!(report.summary.documentation_risk, dec!(65));
    }
}
