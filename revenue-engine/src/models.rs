use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Billed line item produced by charge capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charge {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub encounter_id: Option<Uuid>,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    /// Primary payer billed for this line, `None` for self-pay
    pub payer_id: Option<Uuid>,
    pub code: String,
    pub service_date: NaiveDate,
    /// Fee per unit
    pub fee: Decimal,
    pub units: u32,
    #[serde(default)]
    pub modifiers: BTreeSet<String>,
    #[serde(default)]
    pub adjustment: Decimal,
    /// Outstanding balance still owed on the line
    #[serde(default)]
    pub balance: Decimal,
    pub status: ChargeStatus,
}

impl Charge {
    /// Billed amount for the line (fee × units).
    pub fn billed(&self) -> Decimal {
        self.fee * Decimal::from(self.units)
    }

    pub fn has_modifier(&self, modifier: &str) -> bool {
        self.modifiers.contains(modifier)
    }

    pub fn has_any_modifier<'a>(&self, modifiers: impl IntoIterator<Item = &'a String>) -> bool {
        modifiers.into_iter().any(|m| self.modifiers.contains(m))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Billed,
    Paid,
}

/// One patient visit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encounter {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub encounter_type: EncounterType,
    pub status: EncounterStatus,
    #[serde(default)]
    pub diagnosis_codes: Vec<String>,
    /// Documentation note body
    #[serde(default)]
    pub note: Option<String>,
}

impl Encounter {
    pub fn is_completed(&self) -> bool {
        self.status == EncounterStatus::Completed
    }

    pub fn has_note(&self) -> bool {
        self.note.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncounterType {
    InitialEvaluation,
    Reevaluation,
    FollowUp,
    Treatment,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncounterStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

/// Submission to a payer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub payer_id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub total_charged: Decimal,
    pub total_allowed: Decimal,
    pub total_paid: Decimal,
    pub status: ClaimStatus,
    pub submission_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    #[serde(default)]
    pub lines: Vec<ClaimLine>,
}

impl Claim {
    pub fn is_denied(&self) -> bool {
        self.status == ClaimStatus::Denied
    }

    /// Days between submission and payment, when both are known.
    pub fn days_to_payment(&self) -> Option<i64> {
        match (self.submission_date, self.payment_date) {
            (Some(submitted), Some(paid)) if paid >= submitted => {
                Some((paid - submitted).num_days())
            }
            _ => None,
        }
    }

    /// Date used to place the claim in an analysis window.
    pub fn reference_date(&self) -> Option<NaiveDate> {
        self.submission_date.or(self.payment_date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Submitted,
    Paid,
    Denied,
}

/// Payer-specific adjudication of a single charge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimLine {
    pub id: Uuid,
    pub charge_id: Option<Uuid>,
    pub code: String,
    pub units: u32,
    pub charged: Decimal,
    pub allowed: Decimal,
    pub paid: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payer {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub category: PayerCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayerCategory {
    Commercial,
    Medicare,
    Medicaid,
    WorkersCompensation,
    PersonalInjury,
    SelfPay,
    Other,
}

/// The practice's price list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub items: Vec<FeeScheduleItem>,
}

impl FeeSchedule {
    pub fn item(&self, code: &str) -> Option<&FeeScheduleItem> {
        self.items.iter().find(|item| item.code == code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeScheduleItem {
    pub id: Uuid,
    pub fee_schedule_id: Uuid,
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
    pub fee: Decimal,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub scheduled_date: NaiveDate,
    pub status: AppointmentStatus,
}

impl Appointment {
    /// Still expected to turn into a visit.
    pub fn is_pending(&self) -> bool {
        matches!(
            self.status,
            AppointmentStatus::Scheduled | AppointmentStatus::Confirmed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

/// Revenue target for a period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueGoal {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub period: GoalPeriod,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub target_amount: Decimal,
    #[serde(default)]
    pub actual_amount: Decimal,
    #[serde(default)]
    pub variance: Decimal,
    #[serde(default)]
    pub percent_achieved: Decimal,
    /// Target already met for the window
    #[serde(default)]
    pub on_track: bool,
    /// Billed at or above the pro-rated target for the elapsed window
    #[serde(default)]
    pub pace_on_track: bool,
    #[serde(default = "default_true")]
    pub active: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalPeriod {
    Monthly,
    Quarterly,
    Annual,
}

fn default_true() -> bool {
    true
}
