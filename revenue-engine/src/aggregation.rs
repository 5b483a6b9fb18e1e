//! Aggregation layer
//!
//! Every analyzer reads historical data through a [`RevenueSnapshot`] and the
//! group-by primitives below. Aggregation never consults the wall clock; the
//! analysis window is always explicit.

use crate::error::{RevenueError, RevenueResult};
use crate::models::*;
use crate::scoring::{percent, ratio};
use chrono::{Datelike, Duration, Months, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> RevenueResult<Self> {
        if start > end {
            return Err(RevenueError::Validation(format!(
                "Date range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// The `days` days ending on `as_of`.
    pub fn last_days(as_of: NaiveDate, days: i64) -> Self {
        let span = days.max(1) - 1;
        Self {
            start: as_of - Duration::days(span),
            end: as_of,
        }
    }

    /// The `months` calendar months ending on `as_of`.
    pub fn last_months(as_of: NaiveDate, months: u32) -> Self {
        let start = as_of
            .checked_sub_months(Months::new(months))
            .map(|d| d + Duration::days(1))
            .unwrap_or(as_of);
        Self { start, end: as_of }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Multiplier projecting a window total onto a year.
    pub fn annualization_factor(&self) -> Decimal {
        ratio(dec!(365), Decimal::from(self.days()))
    }

    /// Window length in average-length months.
    pub fn months(&self) -> Decimal {
        Decimal::from(self.days()) * dec!(12) / dec!(365)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Calendar month bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn last_day(&self) -> Option<NaiveDate> {
        self.next().first_day().map(|d| d - Duration::days(1))
    }

    pub fn range(&self) -> Option<DateRange> {
        Some(DateRange {
            start: self.first_day()?,
            end: self.last_day()?,
        })
    }

    pub fn next(&self) -> Self {
        self.plus(1)
    }

    pub fn previous(&self) -> Self {
        let index = self.index() - 1;
        Self::from_index(index)
    }

    pub fn plus(&self, months: u32) -> Self {
        Self::from_index(self.index() + i64::from(months))
    }

    fn index(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }

    fn from_index(index: i64) -> Self {
        let year = index.div_euclid(12);
        let month = index.rem_euclid(12) + 1;
        Self {
            year: i32::try_from(year).unwrap_or(i32::MAX),
            month: u32::try_from(month).unwrap_or(1),
        }
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// What to pull from storage for one analyzer invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotQuery {
    pub organization_id: Uuid,
    pub range: DateRange,
    pub provider_id: Option<Uuid>,
    pub payer_id: Option<Uuid>,
    /// Scheduled appointments to include, for pipeline estimation
    pub appointment_range: Option<DateRange>,
}

impl SnapshotQuery {
    pub fn new(organization_id: Uuid, range: DateRange) -> Self {
        Self {
            organization_id,
            range,
            provider_id: None,
            payer_id: None,
            appointment_range: None,
        }
    }

    pub fn with_provider(mut self, provider_id: Option<Uuid>) -> Self {
        self.provider_id = provider_id;
        self
    }

    pub fn with_payer(mut self, payer_id: Option<Uuid>) -> Self {
        self.payer_id = payer_id;
        self
    }

    pub fn with_appointments(mut self, range: DateRange) -> Self {
        self.appointment_range = Some(range);
        self
    }
}

/// Read-consistent view of one organization's records for a window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevenueSnapshot {
    pub organization_id: Uuid,
    pub range: Option<DateRange>,
    #[serde(default)]
    pub charges: Vec<Charge>,
    #[serde(default)]
    pub encounters: Vec<Encounter>,
    #[serde(default)]
    pub claims: Vec<Claim>,
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub payers: Vec<Payer>,
    #[serde(default)]
    pub appointments: Vec<Appointment>,
}

impl RevenueSnapshot {
    pub fn index(&self) -> SnapshotIndex<'_> {
        SnapshotIndex::build(self)
    }
}

/// Sums of claim-line adjudication for one charge
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LineTotals {
    pub lines: u64,
    pub units: Decimal,
    pub charged: Decimal,
    pub allowed: Decimal,
    pub paid: Decimal,
}

impl LineTotals {
    pub fn add(&mut self, line: &ClaimLine) {
        self.lines += 1;
        self.units += Decimal::from(line.units.max(1));
        self.charged += line.charged;
        self.allowed += line.allowed;
        self.paid += line.paid;
    }

    pub fn merge(&mut self, other: &LineTotals) {
        self.lines += other.lines;
        self.units += other.units;
        self.charged += other.charged;
        self.allowed += other.allowed;
        self.paid += other.paid;
    }

    pub fn avg_paid_per_unit(&self) -> Decimal {
        ratio(self.paid, self.units)
    }

    pub fn avg_allowed_per_unit(&self) -> Decimal {
        ratio(self.allowed, self.units)
    }
}

/// Lookup tables derived once per snapshot
pub struct SnapshotIndex<'a> {
    pub snapshot: &'a RevenueSnapshot,
    charges_by_encounter: HashMap<Uuid, Vec<&'a Charge>>,
    lines_by_charge: HashMap<Uuid, LineTotals>,
    claims_by_charge: HashMap<Uuid, Vec<Uuid>>,
    payers: HashMap<Uuid, &'a Payer>,
}

impl<'a> SnapshotIndex<'a> {
    fn build(snapshot: &'a RevenueSnapshot) -> Self {
        let mut charges_by_encounter: HashMap<Uuid, Vec<&'a Charge>> = HashMap::new();
        for charge in &snapshot.charges {
            if let Some(encounter_id) = charge.encounter_id {
                charges_by_encounter.entry(encounter_id).or_default().push(charge);
            }
        }

        let mut lines_by_charge: HashMap<Uuid, LineTotals> = HashMap::new();
        let mut claims_by_charge: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for claim in &snapshot.claims {
            for line in &claim.lines {
                if let Some(charge_id) = line.charge_id {
                    lines_by_charge.entry(charge_id).or_default().add(line);
                    claims_by_charge.entry(charge_id).or_default().push(claim.id);
                }
            }
        }

        let payers = snapshot.payers.iter().map(|p| (p.id, p)).collect();

        Self {
            snapshot,
            charges_by_encounter,
            lines_by_charge,
            claims_by_charge,
            payers,
        }
    }

    pub fn charges_for_encounter(&self, encounter_id: Uuid) -> &[&'a Charge] {
        self.charges_by_encounter
            .get(&encounter_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn line_totals(&self, charge_id: Uuid) -> LineTotals {
        self.lines_by_charge.get(&charge_id).copied().unwrap_or_default()
    }

    /// Claims carrying a line for `charge_id`.
    pub fn claims_for_charge(&self, charge_id: Uuid) -> &[Uuid] {
        self.claims_by_charge
            .get(&charge_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn payer(&self, payer_id: Uuid) -> Option<&'a Payer> {
        self.payers.get(&payer_id).copied()
    }

    pub fn payer_category(&self, payer_id: Option<Uuid>) -> Option<PayerCategory> {
        payer_id.and_then(|id| self.payer(id)).map(|p| p.category)
    }

    /// Group charges along one dimension.
    pub fn group_charges(&self, dimension: Dimension) -> BTreeMap<GroupKey, ChargeTotals> {
        self.group_charges_where(dimension, |_| true)
    }

    pub fn group_charges_where<F>(&self, dimension: Dimension, filter: F) -> BTreeMap<GroupKey, ChargeTotals>
    where
        F: Fn(&Charge) -> bool,
    {
        let mut groups: BTreeMap<GroupKey, ChargeTotals> = BTreeMap::new();
        for charge in self.snapshot.charges.iter().filter(|c| filter(c)) {
            let key = GroupKey::of(charge, dimension);
            groups
                .entry(key)
                .or_default()
                .add(charge, &self.line_totals(charge.id));
        }
        groups
    }

    /// Claim-level totals per payer.
    pub fn claims_by_payer(&self) -> BTreeMap<Uuid, ClaimTotals> {
        let mut groups: BTreeMap<Uuid, ClaimTotals> = BTreeMap::new();
        for claim in &self.snapshot.claims {
            groups.entry(claim.payer_id).or_default().add(claim);
        }
        groups
    }

    /// Claim-line totals per (payer, code).
    pub fn lines_by_payer_and_code(&self) -> BTreeMap<(Uuid, String), LineTotals> {
        let mut groups: BTreeMap<(Uuid, String), LineTotals> = BTreeMap::new();
        for claim in &self.snapshot.claims {
            for line in &claim.lines {
                groups
                    .entry((claim.payer_id, line.code.clone()))
                    .or_default()
                    .add(line);
            }
        }
        groups
    }

    /// Claim-line totals per code across every payer.
    pub fn lines_by_code(&self) -> BTreeMap<String, LineTotals> {
        let mut groups: BTreeMap<String, LineTotals> = BTreeMap::new();
        for ((_, code), totals) in self.lines_by_payer_and_code() {
            groups.entry(code).or_default().merge(&totals);
        }
        groups
    }
}

/// Aggregation dimension for charges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Code,
    Payer,
    Provider,
    Month,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    Code(String),
    Payer(Option<Uuid>),
    Provider(Uuid),
    Month(MonthKey),
}

impl GroupKey {
    fn of(charge: &Charge, dimension: Dimension) -> Self {
        match dimension {
            Dimension::Code => GroupKey::Code(charge.code.clone()),
            Dimension::Payer => GroupKey::Payer(charge.payer_id),
            Dimension::Provider => GroupKey::Provider(charge.provider_id),
            Dimension::Month => GroupKey::Month(MonthKey::from_date(charge.service_date)),
        }
    }
}

/// Sum/count/average over a group of charges
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargeTotals {
    pub count: u64,
    pub units: Decimal,
    pub billed: Decimal,
    pub allowed: Decimal,
    pub paid: Decimal,
    pub adjustments: Decimal,
    pub balance: Decimal,
}

impl ChargeTotals {
    pub fn add(&mut self, charge: &Charge, lines: &LineTotals) {
        self.count += 1;
        self.units += Decimal::from(charge.units);
        self.billed += charge.billed();
        self.allowed += lines.allowed;
        self.paid += lines.paid;
        self.adjustments += charge.adjustment;
        self.balance += charge.balance;
    }

    pub fn avg_billed(&self) -> Decimal {
        ratio(self.billed, Decimal::from(self.count))
    }

    pub fn avg_fee_per_unit(&self) -> Decimal {
        ratio(self.billed, self.units)
    }

    pub fn avg_paid_per_unit(&self) -> Decimal {
        ratio(self.paid, self.units)
    }

    /// Paid ÷ billed, in percent.
    pub fn reimbursement_rate(&self) -> Decimal {
        percent(self.paid, self.billed)
    }
}

/// Claim-level totals for one payer
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimTotals {
    pub claims: u64,
    pub denied: u64,
    pub billed: Decimal,
    pub allowed: Decimal,
    pub paid: Decimal,
    pub days_to_payment_total: i64,
    pub paid_claims_with_dates: u64,
}

impl ClaimTotals {
    pub fn add(&mut self, claim: &Claim) {
        self.claims += 1;
        if claim.is_denied() {
            self.denied += 1;
        }
        self.billed += claim.total_charged;
        self.allowed += claim.total_allowed;
        self.paid += claim.total_paid;
        if let Some(days) = claim.days_to_payment() {
            self.days_to_payment_total += days;
            self.paid_claims_with_dates += 1;
        }
    }

    pub fn reimbursement_rate(&self) -> Decimal {
        percent(self.paid, self.billed)
    }

    pub fn denial_rate(&self) -> Decimal {
        percent(Decimal::from(self.denied), Decimal::from(self.claims))
    }

    pub fn avg_days_to_payment(&self) -> Decimal {
        ratio(
            Decimal::from(self.days_to_payment_total),
            Decimal::from(self.paid_claims_with_dates),
        )
    }
}

/// Running count and sum for ad hoc groupings
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub count: u64,
    pub sum: Decimal,
}

impl Measure {
    pub fn add(&mut self, value: Decimal) {
        self.count += 1;
        self.sum += value;
    }

    pub fn avg(&self) -> Decimal {
        ratio(self.sum, Decimal::from(self.count))
    }
}

/// Group arbitrary items by key into count/sum measures.
pub fn group_measure<'a, T, K, KF, VF>(
    items: impl IntoIterator<Item = &'a T>,
    key: KF,
    value: VF,
) -> BTreeMap<K, Measure>
where
    T: 'a,
    K: Ord,
    KF: Fn(&T) -> Option<K>,
    VF: Fn(&T) -> Decimal,
{
    let mut groups: BTreeMap<K, Measure> = BTreeMap::new();
    for item in items {
        if let Some(k) = key(item) {
            groups.entry(k).or_default().add(value(item));
        }
    }
    groups
}
