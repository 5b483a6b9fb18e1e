//! Persisted finding records written to the opportunity ledger.

use crate::lifecycle::{FeeAnalysisStatus, LeakageStatus, Lifecycle, OpportunityStatus};
use crate::scoring::{EffortLevel, Frequency, Priority};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which ledger a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityKind {
    Leakage,
    FeeAnalysis,
    Opportunity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeakageType {
    UnbilledService,
    Undercoding,
    MissedModifier,
    UnbilledSupplies,
    WriteOffPattern,
    CollectionIssue,
}

impl LeakageType {
    pub const ALL: [LeakageType; 6] = [
        LeakageType::UnbilledService,
        LeakageType::Undercoding,
        LeakageType::MissedModifier,
        LeakageType::UnbilledSupplies,
        LeakageType::WriteOffPattern,
        LeakageType::CollectionIssue,
    ];

    /// Fixed effort needed to close this kind of gap
    pub fn effort(self) -> EffortLevel {
        match self {
            LeakageType::UnbilledService
            | LeakageType::MissedModifier
            | LeakageType::UnbilledSupplies => EffortLevel::Easy,
            LeakageType::Undercoding => EffortLevel::Moderate,
            LeakageType::WriteOffPattern | LeakageType::CollectionIssue => EffortLevel::Complex,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LeakageType::UnbilledService => "unbilled_service",
            LeakageType::Undercoding => "undercoding",
            LeakageType::MissedModifier => "missed_modifier",
            LeakageType::UnbilledSupplies => "unbilled_supplies",
            LeakageType::WriteOffPattern => "write_off_pattern",
            LeakageType::CollectionIssue => "collection_issue",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueLeakage {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub leakage_type: LeakageType,
    pub title: String,
    pub description: String,
    pub amount: Decimal,
    pub frequency: Frequency,
    pub annual_impact: Decimal,
    pub priority: Priority,
    pub effort: EffortLevel,
    pub recommendation: String,
    pub encounter_id: Option<Uuid>,
    pub charge_id: Option<Uuid>,
    pub provider_id: Option<Uuid>,
    pub payer_id: Option<Uuid>,
    /// Number of occurrences rolled into a pattern finding
    pub occurrences: u64,
    pub status: LeakageStatus,
    pub identified_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub captured_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeScheduleAnalysis {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub fee_schedule_id: Uuid,
    pub code: String,
    pub code_name: Option<String>,
    pub current_fee: Decimal,
    pub recommended_fee: Decimal,
    pub fee_change: Decimal,
    pub benchmark_rate: Option<Decimal>,
    pub regional_rate: Option<Decimal>,
    pub avg_reimbursement: Decimal,
    pub avg_allowed: Decimal,
    pub best_payer_rate: Option<Decimal>,
    pub best_payer_id: Option<Uuid>,
    /// Units billed in the analysis window
    pub utilization: u64,
    pub projected_annual_impact: Decimal,
    pub priority: Priority,
    pub confidence: u8,
    pub reasoning: Vec<String>,
    pub status: FeeAnalysisStatus,
    pub effective_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reviewed_by: Option<Uuid>,
    pub review_notes: Option<String>,
    pub implemented_at: Option<DateTime<Utc>>,
}

impl FeeScheduleAnalysis {
    pub fn recommends_change(&self) -> bool {
        self.recommended_fee > self.current_fee
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityCategory {
    ServiceMix,
    Coding,
    Contract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueOpportunity {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub category: OpportunityCategory,
    /// Machine-readable recommendation type, e.g. `renegotiate_contract`
    pub opportunity_type: String,
    pub title: String,
    pub description: String,
    /// Annualized estimate
    pub estimated_value: Decimal,
    pub confidence: u8,
    pub priority: Priority,
    /// Payer, provider, code or category the opportunity is about
    pub related_entity: Option<String>,
    pub action_items: Vec<String>,
    pub status: OpportunityStatus,
    pub captured_value: Option<Decimal>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Audit record of a completed optimization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationAction {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub source_kind: OpportunityKind,
    pub source_id: Uuid,
    pub action_type: String,
    pub description: String,
    pub projected_impact: Decimal,
    pub actual_impact: Option<Decimal>,
    pub completed_by: Option<Uuid>,
    pub completed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Any record the ledger stores
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerRecord {
    Leakage(RevenueLeakage),
    FeeAnalysis(FeeScheduleAnalysis),
    Opportunity(RevenueOpportunity),
}

impl LedgerRecord {
    pub fn kind(&self) -> OpportunityKind {
        match self {
            LedgerRecord::Leakage(_) => OpportunityKind::Leakage,
            LedgerRecord::FeeAnalysis(_) => OpportunityKind::FeeAnalysis,
            LedgerRecord::Opportunity(_) => OpportunityKind::Opportunity,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            LedgerRecord::Leakage(r) => r.id,
            LedgerRecord::FeeAnalysis(r) => r.id,
            LedgerRecord::Opportunity(r) => r.id,
        }
    }

    pub fn organization_id(&self) -> Uuid {
        match self {
            LedgerRecord::Leakage(r) => r.organization_id,
            LedgerRecord::FeeAnalysis(r) => r.organization_id,
            LedgerRecord::Opportunity(r) => r.organization_id,
        }
    }
}

/// Reviewer input accompanying a status transition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub captured_value: Option<Decimal>,
    pub notes: Option<String>,
    pub actor: Option<Uuid>,
    /// Applies to fee approvals
    pub effective_date: Option<NaiveDate>,
}

/// A record type the opportunity ledger can drive through its lifecycle
pub trait LedgerEntry: Clone + Send + Sync + 'static {
    type Status: Lifecycle;

    const KIND: OpportunityKind;
    const ENTITY: &'static str;

    fn id(&self) -> Uuid;
    fn organization_id(&self) -> Uuid;
    fn status(&self) -> Self::Status;
    fn set_status(&mut self, status: Self::Status, at: DateTime<Utc>);
    fn title(&self) -> String;
    fn priority(&self) -> Priority;
    /// Annual value used for ranking and as the projected impact
    fn projected_value(&self) -> Decimal;
    fn action_type(&self) -> String;
    fn record_outcome(&mut self, outcome: &ActionOutcome, at: DateTime<Utc>);
    fn into_record(self) -> LedgerRecord;
    fn from_record(record: LedgerRecord) -> Option<Self>;
}

impl LedgerEntry for RevenueLeakage {
    type Status = LeakageStatus;
    const KIND: OpportunityKind = OpportunityKind::Leakage;
    const ENTITY: &'static str = "Revenue leakage";

    fn id(&self) -> Uuid {
        self.id
    }

    fn organization_id(&self) -> Uuid {
        self.organization_id
    }

    fn status(&self) -> LeakageStatus {
        self.status
    }

    fn set_status(&mut self, status: LeakageStatus, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;
        if status.is_completed() {
            self.resolved_at = Some(at);
        }
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn projected_value(&self) -> Decimal {
        self.annual_impact
    }

    fn action_type(&self) -> String {
        format!("resolve_{}", self.leakage_type.as_str())
    }

    fn record_outcome(&mut self, outcome: &ActionOutcome, _at: DateTime<Utc>) {
        if outcome.captured_value.is_some() {
            self.captured_amount = outcome.captured_value;
        }
        if outcome.notes.is_some() {
            self.resolution_notes = outcome.notes.clone();
        }
    }

    fn into_record(self) -> LedgerRecord {
        LedgerRecord::Leakage(self)
    }

    fn from_record(record: LedgerRecord) -> Option<Self> {
        match record {
            LedgerRecord::Leakage(r) => Some(r),
            _ => None,
        }
    }
}

impl LedgerEntry for FeeScheduleAnalysis {
    type Status = FeeAnalysisStatus;
    const KIND: OpportunityKind = OpportunityKind::FeeAnalysis;
    const ENTITY: &'static str = "Fee schedule analysis";

    fn id(&self) -> Uuid {
        self.id
    }

    fn organization_id(&self) -> Uuid {
        self.organization_id
    }

    fn status(&self) -> FeeAnalysisStatus {
        self.status
    }

    fn set_status(&mut self, status: FeeAnalysisStatus, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;
        if status.is_completed() {
            self.implemented_at = Some(at);
        }
    }

    fn title(&self) -> String {
        format!(
            "Adjust fee for {} from ${} to ${}",
            self.code, self.current_fee, self.recommended_fee
        )
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn projected_value(&self) -> Decimal {
        self.projected_annual_impact
    }

    fn action_type(&self) -> String {
        "fee_schedule_update".to_string()
    }

    fn record_outcome(&mut self, outcome: &ActionOutcome, _at: DateTime<Utc>) {
        if outcome.actor.is_some() {
            self.reviewed_by = outcome.actor;
        }
        if outcome.notes.is_some() {
            self.review_notes = outcome.notes.clone();
        }
        if outcome.effective_date.is_some() {
            self.effective_date = outcome.effective_date;
        }
    }

    fn into_record(self) -> LedgerRecord {
        LedgerRecord::FeeAnalysis(self)
    }

    fn from_record(record: LedgerRecord) -> Option<Self> {
        match record {
            LedgerRecord::FeeAnalysis(r) => Some(r),
            _ => None,
        }
    }
}

impl LedgerEntry for RevenueOpportunity {
    type Status = OpportunityStatus;
    const KIND: OpportunityKind = OpportunityKind::Opportunity;
    const ENTITY: &'static str = "Revenue opportunity";

    fn id(&self) -> Uuid {
        self.id
    }

    fn organization_id(&self) -> Uuid {
        self.organization_id
    }

    fn status(&self) -> OpportunityStatus {
        self.status
    }

    fn set_status(&mut self, status: OpportunityStatus, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;
        if status.is_completed() {
            self.completed_at = Some(at);
        }
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn projected_value(&self) -> Decimal {
        self.estimated_value
    }

    fn action_type(&self) -> String {
        self.opportunity_type.clone()
    }

    fn record_outcome(&mut self, outcome: &ActionOutcome, _at: DateTime<Utc>) {
        if outcome.captured_value.is_some() {
            self.captured_value = outcome.captured_value;
        }
        if outcome.notes.is_some() {
            self.notes = outcome.notes.clone();
        }
    }

    fn into_record(self) -> LedgerRecord {
        LedgerRecord::Opportunity(self)
    }

    fn from_record(record: LedgerRecord) -> Option<Self> {
        match record {
            LedgerRecord::Opportunity(r) => Some(r),
            _ => None,
        }
    }
}
