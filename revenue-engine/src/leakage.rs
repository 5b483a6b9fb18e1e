//! Revenue leakage detection
//!
//! Six independent rules each scan one aggregation of the snapshot. Every
//! finding is annualized from its frequency and prioritized from the
//! annualized amount alone.

use crate::aggregation::{DateRange, RevenueSnapshot, SnapshotIndex};
use crate::benchmarks::BenchmarkTables;
use crate::config::EngineConfig;
use crate::error::RevenueResult;
use crate::findings::{LeakageType, RevenueLeakage};
use crate::lifecycle::LeakageStatus;
use crate::models::*;
use crate::scoring::{money, rank_key, ratio, Frequency, Priority, PriorityThresholds};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeakageRequest {
    pub organization_id: Uuid,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Restrict to these categories; empty means all six
    #[serde(default)]
    pub categories: Vec<LeakageType>,
    pub provider_id: Option<Uuid>,
    pub payer_id: Option<Uuid>,
    pub min_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub count: usize,
    pub amount: Decimal,
    pub annual_impact: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeakageSummary {
    pub total_findings: usize,
    pub total_amount: Decimal,
    pub total_annual_impact: Decimal,
    pub by_category: BTreeMap<LeakageType, CategorySummary>,
    pub by_priority: BTreeMap<Priority, usize>,
}

impl LeakageSummary {
    fn from_findings(findings: &[RevenueLeakage]) -> Self {
        let mut summary = Self::default();
        for finding in findings {
            summary.total_findings += 1;
            summary.total_amount += finding.amount;
            summary.total_annual_impact += finding.annual_impact;
            let category = summary.by_category.entry(finding.leakage_type).or_default();
            category.count += 1;
            category.amount += finding.amount;
            category.annual_impact += finding.annual_impact;
            *summary.by_priority.entry(finding.priority).or_default() += 1;
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeakageReport {
    pub range: DateRange,
    pub summary: LeakageSummary,
    pub findings: Vec<RevenueLeakage>,
    pub generated_at: DateTime<Utc>,
}

/// Fields shared by one rule's findings before scoring
struct Candidate {
    leakage_type: LeakageType,
    title: String,
    description: String,
    amount: Decimal,
    frequency: Frequency,
    recommendation: String,
    encounter_id: Option<Uuid>,
    charge_id: Option<Uuid>,
    provider_id: Option<Uuid>,
    payer_id: Option<Uuid>,
    occurrences: u64,
}

impl Candidate {
    fn new(leakage_type: LeakageType, amount: Decimal, frequency: Frequency) -> Self {
        Self {
            leakage_type,
            title: String::new(),
            description: String::new(),
            amount,
            frequency,
            recommendation: String::new(),
            encounter_id: None,
            charge_id: None,
            provider_id: None,
            payer_id: None,
            occurrences: 1,
        }
    }

    fn text(mut self, title: String, description: String, recommendation: &str) -> Self {
        self.title = title;
        self.description = description;
        self.recommendation = recommendation.to_string();
        self
    }
}

pub struct LeakageDetector {
    config: Arc<EngineConfig>,
    tables: Arc<BenchmarkTables>,
}

impl LeakageDetector {
    pub fn new(config: Arc<EngineConfig>, tables: Arc<BenchmarkTables>) -> Self {
        Self { config, tables }
    }

    /// Default window: the configured number of days ending on `as_of`.
    pub fn resolve_range(&self, request: &LeakageRequest, as_of: NaiveDate) -> RevenueResult<DateRange> {
        let end = request.end_date.unwrap_or(as_of);
        let start = request
            .start_date
            .unwrap_or_else(|| DateRange::last_days(end, self.config.leakage_window_days).start);
        DateRange::new(start, end)
    }

    /// Run every selected rule over `snapshot`.
    ///
    /// `as_of` anchors receivable aging; `now` stamps the findings.
    pub fn detect(
        &self,
        snapshot: &RevenueSnapshot,
        request: &LeakageRequest,
        range: DateRange,
        as_of: NaiveDate,
        now: DateTime<Utc>,
    ) -> LeakageReport {
        let index = snapshot.index();
        let enabled = |t: LeakageType| request.categories.is_empty() || request.categories.contains(&t);
        let charge_in_scope = |c: &Charge| request.payer_id.map_or(true, |p| c.payer_id == Some(p));

        let mut candidates = Vec::new();
        // Visits carry no payer, so an unbilled visit cannot match a payer filter.
        if enabled(LeakageType::UnbilledService) && request.payer_id.is_none() {
            candidates.extend(self.unbilled_services(&index));
        }
        if enabled(LeakageType::Undercoding) {
            candidates.extend(self.undercoding(snapshot, &charge_in_scope));
        }
        if enabled(LeakageType::MissedModifier) {
            candidates.extend(self.missed_modifiers(&index, &charge_in_scope));
        }
        if enabled(LeakageType::UnbilledSupplies) {
            candidates.extend(self.unbilled_supplies(&index, &charge_in_scope));
        }
        if enabled(LeakageType::WriteOffPattern) {
            candidates.extend(self.write_off_patterns(&index, &charge_in_scope));
        }
        if enabled(LeakageType::CollectionIssue) {
            candidates.extend(self.collection_issues(snapshot, as_of, &charge_in_scope));
        }

        let floor = request.min_amount.unwrap_or(Decimal::ZERO);
        let mut findings: Vec<RevenueLeakage> = candidates
            .into_iter()
            .map(|c| self.score(snapshot.organization_id, c, now))
            .filter(|f| f.amount > Decimal::ZERO && f.amount >= floor)
            .collect();
        findings.sort_by(|a, b| {
            rank_key(a.priority, a.annual_impact)
                .cmp(&rank_key(b.priority, b.annual_impact))
                .then_with(|| a.leakage_type.cmp(&b.leakage_type))
        });

        LeakageReport {
            range,
            summary: LeakageSummary::from_findings(&findings),
            findings,
            generated_at: now,
        }
    }

    fn score(&self, organization_id: Uuid, c: Candidate, now: DateTime<Utc>) -> RevenueLeakage {
        let amount = money(c.amount);
        let annual_impact = money(c.frequency.annualize(amount));
        RevenueLeakage {
            id: Uuid::new_v4(),
            organization_id,
            leakage_type: c.leakage_type,
            title: c.title,
            description: c.description,
            amount,
            frequency: c.frequency,
            annual_impact,
            priority: PriorityThresholds::LEAKAGE.classify(annual_impact),
            effort: c.leakage_type.effort(),
            recommendation: c.recommendation,
            encounter_id: c.encounter_id,
            charge_id: c.charge_id,
            provider_id: c.provider_id,
            payer_id: c.payer_id,
            occurrences: c.occurrences,
            status: LeakageStatus::Identified,
            identified_at: now,
            updated_at: now,
            resolved_at: None,
            resolution_notes: None,
            captured_amount: None,
        }
    }

    // =========================================================================
    // Rules
    // =========================================================================

    fn unbilled_services(&self, index: &SnapshotIndex<'_>) -> Vec<Candidate> {
        index
            .snapshot
            .encounters
            .iter()
            .filter(|e| e.is_completed() && index.charges_for_encounter(e.id).is_empty())
            .map(|e| {
                let estimate = self.config.unbilled_estimates.for_type(e.encounter_type);
                let mut c = Candidate::new(LeakageType::UnbilledService, estimate, Frequency::OneTime).text(
                    format!("Completed visit on {} has no charges", e.date),
                    format!(
                        "Encounter {} was completed but nothing was billed; estimated value ${}",
                        e.id, estimate
                    ),
                    "Review the visit documentation and post the missing charges",
                );
                c.encounter_id = Some(e.id);
                c.provider_id = Some(e.provider_id);
                c
            })
            .collect()
    }

    fn undercoding(&self, snapshot: &RevenueSnapshot, in_scope: &dyn Fn(&Charge) -> bool) -> Vec<Candidate> {
        let encounters: HashMap<Uuid, &Encounter> =
            snapshot.encounters.iter().map(|e| (e.id, e)).collect();

        snapshot
            .charges
            .iter()
            .filter(|c| in_scope(c))
            .filter_map(|charge| {
                let level = self.tables.em_level(&charge.code)?;
                if level > 2 {
                    return None;
                }
                let encounter = encounters.get(&charge.encounter_id?)?;
                if !encounter.has_note() || encounter.diagnosis_codes.len() < 2 {
                    return None;
                }
                let next = self.tables.em_family(&charge.code)?.next_tier(&charge.code)?;
                let gap = self.tables.benchmark_rate(next)? - charge.fee;
                if gap <= Decimal::ZERO {
                    return None;
                }
                let mut c = Candidate::new(LeakageType::Undercoding, gap, Frequency::OneTime).text(
                    format!("Possible undercoding: {} billed where {} may be supported", charge.code, next),
                    format!(
                        "Visit with {} diagnoses and a documentation note was billed at level {}",
                        encounter.diagnosis_codes.len(),
                        level
                    ),
                    "Audit documentation against the next E&M level and educate the provider",
                );
                c.encounter_id = Some(encounter.id);
                c.charge_id = Some(charge.id);
                c.provider_id = Some(charge.provider_id);
                c.payer_id = charge.payer_id;
                Some(c)
            })
            .collect()
    }

    fn missed_modifiers(&self, index: &SnapshotIndex<'_>, in_scope: &dyn Fn(&Charge) -> bool) -> Vec<Candidate> {
        let separate = &self.tables.modifiers.separate_service;
        let mut out = Vec::new();
        for encounter in &index.snapshot.encounters {
            let charges = index.charges_for_encounter(encounter.id);
            let bare_manipulation = charges
                .iter()
                .any(|c| self.tables.is_manipulation(&c.code) && c.modifiers.is_empty());
            if !bare_manipulation {
                continue;
            }
            for em in charges
                .iter()
                .filter(|c| in_scope(c) && self.tables.is_em(&c.code) && !c.has_modifier(separate))
            {
                let amount = em.billed() * self.config.modifier_reduction_rate;
                let mut c = Candidate::new(LeakageType::MissedModifier, amount, Frequency::OneTime).text(
                    format!("Modifier {} missing on {} billed with manipulation", separate, em.code),
                    format!(
                        "E&M {} on {} was billed alongside manipulation without modifier {}",
                        em.code, em.service_date, separate
                    ),
                    "Append the separate-service modifier when the E&M is separately identifiable",
                );
                c.encounter_id = Some(encounter.id);
                c.charge_id = Some(em.id);
                c.provider_id = Some(em.provider_id);
                c.payer_id = em.payer_id;
                out.push(c);
            }
        }
        out
    }

    fn unbilled_supplies(&self, index: &SnapshotIndex<'_>, in_scope: &dyn Fn(&Charge) -> bool) -> Vec<Candidate> {
        let pattern_count = index
            .snapshot
            .encounters
            .iter()
            .filter(|e| e.is_completed())
            .filter(|e| {
                let charges = index.charges_for_encounter(e.id);
                let therapy = charges
                    .iter()
                    .any(|c| in_scope(c) && self.tables.therapy_codes.contains(&c.code));
                let supplies = charges.iter().any(|c| self.tables.supply_codes.contains(&c.code));
                therapy && !supplies
            })
            .count();

        if pattern_count <= self.config.supply_pattern_threshold {
            return Vec::new();
        }
        let amount = self.config.average_supply_charge * Decimal::from(pattern_count);
        let mut c = Candidate::new(LeakageType::UnbilledSupplies, amount, Frequency::Monthly).text(
            format!("{} therapy visits billed without supplies", pattern_count),
            format!(
                "{} completed visits included supply-consuming therapy but no supply charge",
                pattern_count
            ),
            "Add supply capture to the therapy charge workflow",
        );
        c.occurrences = pattern_count as u64;
        vec![c]
    }

    /// Adjusted charges per payer. The volume gate counts distinct claims
    /// billing those charges; charges not yet on a claim add to the totals only.
    fn write_off_patterns(&self, index: &SnapshotIndex<'_>, in_scope: &dyn Fn(&Charge) -> bool) -> Vec<Candidate> {
        let mut by_payer: BTreeMap<Uuid, (BTreeSet<Uuid>, Decimal, Decimal)> = BTreeMap::new();
        for charge in index
            .snapshot
            .charges
            .iter()
            .filter(|c| in_scope(c) && c.adjustment > Decimal::ZERO)
        {
            if let Some(payer_id) = charge.payer_id {
                let entry = by_payer.entry(payer_id).or_default();
                entry.0.extend(index.claims_for_charge(charge.id).iter().copied());
                entry.1 += charge.adjustment;
                entry.2 += charge.billed();
            }
        }

        by_payer
            .into_iter()
            .filter(|(_, (claims, adjusted, billed))| {
                claims.len() > self.config.write_off_min_claims
                    && ratio(*adjusted, *billed) > self.config.write_off_ratio_threshold
            })
            .map(|(payer_id, (claims, adjusted, billed))| {
                let name = index
                    .payer(payer_id)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| payer_id.to_string());
                let mut c = Candidate::new(LeakageType::WriteOffPattern, adjusted, Frequency::Monthly).text(
                    format!("High write-offs for {}", name),
                    format!(
                        "{} claims wrote off ${} of ${} billed ({}%)",
                        claims.len(),
                        adjusted.round_dp(2),
                        billed.round_dp(2),
                        (ratio(adjusted, billed) * Decimal::ONE_HUNDRED).round_dp(1)
                    ),
                    "Review contractual adjustments and appeal write-offs that exceed contract terms",
                );
                c.payer_id = Some(payer_id);
                c.occurrences = claims.len() as u64;
                c
            })
            .collect()
    }

    fn collection_issues(
        &self,
        snapshot: &RevenueSnapshot,
        as_of: NaiveDate,
        in_scope: &dyn Fn(&Charge) -> bool,
    ) -> Vec<Candidate> {
        let rates = &self.config.collectibility;
        let buckets = [
            ("60-89", 60, Some(89), rates.days_60_89),
            ("90-119", 90, Some(119), rates.days_90_119),
            ("120+", 120, None, rates.days_120_plus),
        ];

        let mut totals = [(0u64, Decimal::ZERO); 3];
        for charge in snapshot
            .charges
            .iter()
            .filter(|c| in_scope(c) && c.status != ChargeStatus::Paid && c.balance > Decimal::ZERO)
        {
            let age = (as_of - charge.service_date).num_days();
            let slot = buckets
                .iter()
                .position(|(_, min, max, _)| age >= *min && max.map_or(true, |m| age <= m));
            if let Some(total) = slot.and_then(|idx| totals.get_mut(idx)) {
                total.0 += 1;
                total.1 += charge.balance;
            }
        }

        buckets
            .iter()
            .zip(totals)
            .filter(|(_, (_, balance))| *balance > self.config.collection_bucket_floor)
            .map(|((label, _, _, collectible), (count, balance))| {
                let amount = balance * (Decimal::ONE - *collectible);
                let mut c = Candidate::new(LeakageType::CollectionIssue, amount, Frequency::Monthly).text(
                    format!("${} outstanding {} days", balance.round_dp(2), label),
                    format!(
                        "{} unpaid charges aged {} days carry ${} in balances",
                        count,
                        label,
                        balance.round_dp(2)
                    ),
                    "Prioritize follow-up on aged balances before they become uncollectible",
                );
                c.occurrences = count;
                c
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::BTreeSet;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn detector() -> LeakageDetector {
        LeakageDetector::new(
            Arc::new(EngineConfig::default()),
            Arc::new(BenchmarkTables::standard()),
        )
    }

    fn encounter(org: Uuid, kind: EncounterType, day: NaiveDate) -> Encounter {
        Encounter {
            id: Uuid::new_v4(),
            organization_id: org,
            patient_id: Uuid::new_v4(),
            provider_id: Uuid::nil(),
            date: day,
            encounter_type: kind,
            status: EncounterStatus::Completed,
            diagnosis_codes: vec![],
            note: None,
        }
    }

    fn charge(encounter: &Encounter, code: &str, fee: Decimal) -> Charge {
        Charge {
            id: Uuid::new_v4(),
            organization_id: encounter.organization_id,
            encounter_id: Some(encounter.id),
            patient_id: encounter.patient_id,
            provider_id: encounter.provider_id,
            payer_id: None,
            code: code.to_string(),
            service_date: encounter.date,
            fee,
            units: 1,
            modifiers: BTreeSet::new(),
            adjustment: Decimal::ZERO,
            balance: Decimal::ZERO,
            status: ChargeStatus::Billed,
        }
    }

    fn run(snapshot: &RevenueSnapshot, as_of: NaiveDate) -> LeakageReport {
        let detector = detector();
        let request = LeakageRequest::default();
        let range = detector.resolve_range(&request, as_of).unwrap();
        detector.detect(snapshot, &request, range, as_of, Utc::now())
    }

    #[test]
    fn test_completed_visit_without_charges() {
        let org = Uuid::new_v4();
        let snapshot = RevenueSnapshot {
            organization_id: org,
            encounters: vec![encounter(org, EncounterType::InitialEvaluation, date(2024, 5, 1))],
            ..Default::default()
        };
        let report = run(&snapshot, date(2024, 5, 31));

        assert_eq!(report.findings.len(), 1);
        let finding = &report.findings[0];
        assert_eq!(finding.leakage_type, LeakageType::UnbilledService);
        assert_eq!(finding.amount, dec!(150));
        assert_eq!(finding.frequency, Frequency::OneTime);
        assert_eq!(finding.priority, Priority::Low);
        assert_eq!(report.summary.total_findings, 1);
    }

    #[test]
    fn test_undercoding_requires_note_and_two_diagnoses() {
        let org = Uuid::new_v4();
        let mut documented = encounter(org, EncounterType::FollowUp, date(2024, 5, 1));
        documented.note = Some("Subjective: low back pain".to_string());
        documented.diagnosis_codes = vec!["M54.5".to_string(), "M99.03".to_string()];
        let thin = encounter(org, EncounterType::FollowUp, date(2024, 5, 2));

        let snapshot = RevenueSnapshot {
            organization_id: org,
            charges: vec![
                charge(&documented, "99212", dec!(60)),
                charge(&thin, "99212", dec!(60)),
            ],
            encounters: vec![documented, thin],
            ..Default::default()
        };
        let report = run(&snapshot, date(2024, 5, 31));

        let undercoded: Vec<_> = report
            .findings
            .iter()
            .filter(|f| f.leakage_type == LeakageType::Undercoding)
            .collect();
        assert_eq!(undercoded.len(), 1);
        // 99213 benchmark 90 minus the 60 billed
        assert_eq!(undercoded[0].amount, dec!(30));
        assert_eq!(undercoded[0].effort, crate::scoring::EffortLevel::Moderate);
    }

    #[test]
    fn test_missed_separate_service_modifier() {
        let org = Uuid::new_v4();
        let visit = encounter(org, EncounterType::Treatment, date(2024, 5, 1));
        let snapshot = RevenueSnapshot {
            organization_id: org,
            charges: vec![charge(&visit, "98940", dec!(45)), charge(&visit, "99213", dec!(100))],
            encounters: vec![visit],
            ..Default::default()
        };
        let report = run(&snapshot, date(2024, 5, 31));

        let missed: Vec<_> = report
            .findings
            .iter()
            .filter(|f| f.leakage_type == LeakageType::MissedModifier)
            .collect();
        assert_eq!(missed.len(), 1);
        assert_eq!(missed[0].amount, dec!(25));
    }

    #[test]
    fn test_supply_pattern_needs_more_than_threshold() {
        let org = Uuid::new_v4();
        let build = |n: usize| {
            let mut snapshot = RevenueSnapshot {
                organization_id: org,
                ..Default::default()
            };
            for day in 0..n {
                let visit = encounter(org, EncounterType::Treatment, date(2024, 5, 1 + day as u32));
                snapshot.charges.push(charge(&visit, "97140", dec!(40)));
                snapshot.encounters.push(visit);
            }
            snapshot
        };

        let at_threshold = run(&build(10), date(2024, 5, 31));
        assert!(at_threshold
            .findings
            .iter()
            .all(|f| f.leakage_type != LeakageType::UnbilledSupplies));

        let over = run(&build(11), date(2024, 5, 31));
        let supplies = over
            .findings
            .iter()
            .find(|f| f.leakage_type == LeakageType::UnbilledSupplies)
            .unwrap();
        assert_eq!(supplies.amount, dec!(165));
        assert_eq!(supplies.annual_impact, dec!(1980));
        assert_eq!(supplies.priority, Priority::Medium);
    }

    fn claim_for(org: Uuid, payer_id: Uuid, charges: &[&Charge]) -> Claim {
        let total: Decimal = charges.iter().map(|c| c.billed()).sum();
        Claim {
            id: Uuid::new_v4(),
            organization_id: org,
            payer_id,
            patient_id: Uuid::new_v4(),
            provider_id: Uuid::nil(),
            total_charged: total,
            total_allowed: total,
            total_paid: total,
            status: ClaimStatus::Paid,
            submission_date: None,
            payment_date: None,
            lines: charges
                .iter()
                .map(|c| ClaimLine {
                    id: Uuid::new_v4(),
                    charge_id: Some(c.id),
                    code: c.code.clone(),
                    units: c.units,
                    charged: c.billed(),
                    allowed: c.billed(),
                    paid: c.billed(),
                })
                .collect(),
        }
    }

    fn written_off(org: Uuid, payer: Uuid, day: u32) -> Charge {
        let visit = encounter(org, EncounterType::Treatment, date(2024, 5, day));
        let mut c = charge(&visit, "98941", dec!(100));
        c.payer_id = Some(payer);
        c.adjustment = dec!(40);
        c
    }

    #[test]
    fn test_write_off_pattern_by_payer() {
        let org = Uuid::new_v4();
        let payer = Uuid::new_v4();
        let mut snapshot = RevenueSnapshot {
            organization_id: org,
            ..Default::default()
        };
        for day in 1..=11 {
            let c = written_off(org, payer, day);
            snapshot.claims.push(claim_for(org, payer, &[&c]));
            snapshot.charges.push(c);
        }
        let report = run(&snapshot, date(2024, 5, 31));

        let write_off = report
            .findings
            .iter()
            .find(|f| f.leakage_type == LeakageType::WriteOffPattern)
            .unwrap();
        assert_eq!(write_off.amount, dec!(440));
        assert_eq!(write_off.payer_id, Some(payer));
        assert_eq!(write_off.occurrences, 11);
    }

    #[test]
    fn test_write_off_gate_counts_claims_not_charges() {
        let org = Uuid::new_v4();
        let payer = Uuid::new_v4();
        let mut snapshot = RevenueSnapshot {
            organization_id: org,
            ..Default::default()
        };
        // 20 adjusted charges billed on only two claims
        let charges: Vec<Charge> = (1..=20).map(|day| written_off(org, payer, day)).collect();
        let (first, second) = charges.split_at(10);
        snapshot.claims.push(claim_for(org, payer, &first.iter().collect::<Vec<_>>()));
        snapshot.claims.push(claim_for(org, payer, &second.iter().collect::<Vec<_>>()));
        snapshot.charges = charges;

        let report = run(&snapshot, date(2024, 5, 31));
        assert!(report
            .findings
            .iter()
            .all(|f| f.leakage_type != LeakageType::WriteOffPattern));

        // unclaimed charges never satisfy the claim gate
        snapshot.claims.clear();
        let report = run(&snapshot, date(2024, 5, 31));
        assert!(report
            .findings
            .iter()
            .all(|f| f.leakage_type != LeakageType::WriteOffPattern));
    }

    #[test]
    fn test_collection_buckets_apply_collectibility() {
        let org = Uuid::new_v4();
        let visit = encounter(org, EncounterType::Treatment, date(2024, 3, 20));
        let mut aged = charge(&visit, "98941", dec!(800));
        aged.balance = dec!(800);
        let snapshot = RevenueSnapshot {
            organization_id: org,
            charges: vec![aged],
            encounters: vec![visit],
            ..Default::default()
        };
        // 72 days old on 2024-05-31
        let report = run(&snapshot, date(2024, 5, 31));
        let collection = report
            .findings
            .iter()
            .find(|f| f.leakage_type == LeakageType::CollectionIssue)
            .unwrap();
        assert_eq!(collection.amount, dec!(240));
        assert_eq!(collection.frequency, Frequency::Monthly);
    }

    #[test]
    fn test_min_amount_and_category_filters() {
        let org = Uuid::new_v4();
        let snapshot = RevenueSnapshot {
            organization_id: org,
            encounters: vec![
                encounter(org, EncounterType::InitialEvaluation, date(2024, 5, 1)),
                encounter(org, EncounterType::FollowUp, date(2024, 5, 2)),
            ],
            ..Default::default()
        };
        let detector = detector();
        let request = LeakageRequest {
            organization_id: org,
            min_amount: Some(dec!(100)),
            ..Default::default()
        };
        let range = detector.resolve_range(&request, date(2024, 5, 31)).unwrap();
        let report = detector.detect(&snapshot, &request, range, date(2024, 5, 31), Utc::now());
        assert_eq!(report.findings.len(), 1);

        let request = LeakageRequest {
            organization_id: org,
            categories: vec![LeakageType::CollectionIssue],
            ..Default::default()
        };
        let report = detector.detect(&snapshot, &request, range, date(2024, 5, 31), Utc::now());
        assert!(report.findings.is_empty());
    }
}
