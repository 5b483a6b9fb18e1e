//! Status lifecycles for persisted findings.
//!
//! Each lifecycle only exposes its legal transitions; any other
//! `(status, action)` pair is rejected with `InvalidTransition`.

use crate::error::{RevenueError, RevenueResult};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

pub trait Lifecycle: Copy + Eq + Debug + Send + Sync + 'static {
    type Action: Copy + Debug + Send + Sync;

    /// Name used in error messages
    const KIND: &'static str;

    fn apply(self, action: Self::Action) -> RevenueResult<Self>;

    /// Terminal state that records an optimization action
    fn is_completed(self) -> bool;

    /// Still awaiting a reviewer
    fn is_open(self) -> bool;
}

fn invalid<S: Debug, A: Debug>(kind: &'static str, from: S, action: A) -> RevenueError {
    RevenueError::InvalidTransition {
        kind,
        from: format!("{:?}", from),
        action: format!("{:?}", action),
    }
}

// =============================================================================
// Revenue leakage
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeakageStatus {
    Identified,
    Investigating,
    Fixing,
    Resolved,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeakageAction {
    Investigate,
    StartFix,
    Resolve,
    Ignore,
}

impl Lifecycle for LeakageStatus {
    type Action = LeakageAction;
    const KIND: &'static str = "revenue leakage";

    fn apply(self, action: LeakageAction) -> RevenueResult<Self> {
        use LeakageAction::*;
        use LeakageStatus::*;
        match (self, action) {
            (Identified, Investigate) => Ok(Investigating),
            (Identified | Investigating, StartFix) => Ok(Fixing),
            (Identified | Investigating | Fixing, Resolve) => Ok(Resolved),
            (Identified | Investigating | Fixing, Ignore) => Ok(Ignored),
            (from, action) => Err(invalid(Self::KIND, from, action)),
        }
    }

    fn is_completed(self) -> bool {
        self == LeakageStatus::Resolved
    }

    fn is_open(self) -> bool {
        matches!(
            self,
            LeakageStatus::Identified | LeakageStatus::Investigating | LeakageStatus::Fixing
        )
    }
}

// =============================================================================
// Fee schedule analysis
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeAnalysisStatus {
    Pending,
    Approved,
    Rejected,
    Implemented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeReviewAction {
    Approve,
    Reject,
    Implement,
}

impl Lifecycle for FeeAnalysisStatus {
    type Action = FeeReviewAction;
    const KIND: &'static str = "fee schedule analysis";

    fn apply(self, action: FeeReviewAction) -> RevenueResult<Self> {
        use FeeAnalysisStatus::*;
        use FeeReviewAction::*;
        match (self, action) {
            (Pending, Approve) => Ok(Approved),
            (Pending, Reject) => Ok(Rejected),
            (Approved, Implement) => Ok(Implemented),
            (from, action) => Err(invalid(Self::KIND, from, action)),
        }
    }

    fn is_completed(self) -> bool {
        self == FeeAnalysisStatus::Implemented
    }

    fn is_open(self) -> bool {
        matches!(self, FeeAnalysisStatus::Pending | FeeAnalysisStatus::Approved)
    }
}

// =============================================================================
// Revenue opportunity
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    Identified,
    InProgress,
    Captured,
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityAction {
    Start,
    Complete,
    Decline,
}

impl Lifecycle for OpportunityStatus {
    type Action = OpportunityAction;
    const KIND: &'static str = "revenue opportunity";

    fn apply(self, action: OpportunityAction) -> RevenueResult<Self> {
        use OpportunityAction::*;
        use OpportunityStatus::*;
        match (self, action) {
            (Identified, Start) => Ok(InProgress),
            (Identified | InProgress, Complete) => Ok(Captured),
            (Identified | InProgress, Decline) => Ok(Declined),
            (from, action) => Err(invalid(Self::KIND, from, action)),
        }
    }

    fn is_completed(self) -> bool {
        self == OpportunityStatus::Captured
    }

    fn is_open(self) -> bool {
        matches!(self, OpportunityStatus::Identified | OpportunityStatus::InProgress)
    }
}
