//! Opportunity ledger
//!
//! One generic component drives every persisted finding through its
//! lifecycle, whatever analyzer produced it. Completing a finding writes an
//! [`OptimizationAction`] to the audit trail.

use crate::error::{RevenueError, RevenueResult};
use crate::findings::*;
use crate::lifecycle::{Lifecycle, OpportunityStatus};
use crate::repository::OpportunityStore;
use crate::scoring::{rank_key, Priority};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of a batch write; individual failures do not abort the batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistReport {
    pub persisted: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl PersistReport {
    pub fn record_success(&mut self) {
        self.persisted += 1;
    }

    pub fn record_failure(&mut self, id: Uuid, error: &RevenueError) {
        self.failed += 1;
        self.errors.push(format!("{}: {}", id, error));
    }

    pub fn merge(&mut self, other: PersistReport) {
        self.persisted += other.persisted;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// One open item across every ledger, for cross-analyzer ranking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenItem {
    pub kind: OpportunityKind,
    pub id: Uuid,
    pub title: String,
    pub priority: Priority,
    pub annual_value: Decimal,
    pub status: String,
}

pub struct OpportunityLedger {
    store: Arc<dyn OpportunityStore>,
}

impl OpportunityLedger {
    pub fn new(store: Arc<dyn OpportunityStore>) -> Self {
        Self { store }
    }

    /// Persist each entry independently.
    pub async fn persist_batch<E: LedgerEntry>(&self, entries: &[E]) -> PersistReport {
        let mut report = PersistReport::default();
        for entry in entries {
            match self.store.insert(entry.clone().into_record()).await {
                Ok(()) => report.record_success(),
                Err(e) => {
                    warn!(kind = ?E::KIND, id = %entry.id(), error = %e, "Failed to persist finding");
                    report.record_failure(entry.id(), &e);
                }
            }
        }
        debug!(
            kind = ?E::KIND,
            persisted = report.persisted,
            failed = report.failed,
            "Persisted findings"
        );
        report
    }

    /// Load an entry owned by `organization_id`.
    pub async fn get<E: LedgerEntry>(&self, organization_id: Uuid, id: Uuid) -> RevenueResult<E> {
        self.store
            .get(E::KIND, id)
            .await?
            .and_then(E::from_record)
            .filter(|entry| entry.organization_id() == organization_id)
            .ok_or_else(|| RevenueError::not_found(E::ENTITY, id))
    }

    /// Entries of one kind, optionally restricted to the given statuses.
    pub async fn list<E: LedgerEntry>(
        &self,
        organization_id: Uuid,
        statuses: &[E::Status],
    ) -> RevenueResult<Vec<E>> {
        let entries = self
            .store
            .list(organization_id, E::KIND)
            .await?
            .into_iter()
            .filter_map(E::from_record)
            .filter(|entry| statuses.is_empty() || statuses.contains(&entry.status()))
            .collect();
        Ok(entries)
    }

    /// Apply a lifecycle action and return the updated entry.
    ///
    /// Reaching the completed state writes an optimization action carrying
    /// the projected value and any captured value from `outcome`. If that
    /// write fails the entry is restored to its previous state, so a
    /// completed entry always has its audit action.
    pub async fn transition<E: LedgerEntry>(
        &self,
        organization_id: Uuid,
        id: Uuid,
        action: <E::Status as Lifecycle>::Action,
        outcome: ActionOutcome,
    ) -> RevenueResult<E> {
        let mut entry: E = self.get(organization_id, id).await?;
        let previous = entry.clone();
        let next = entry.status().apply(action)?;
        let now = Utc::now();

        entry.set_status(next, now);
        entry.record_outcome(&outcome, now);
        self.store.update(entry.clone().into_record()).await?;

        if next.is_completed() {
            let audit = completion_action(&entry, &outcome, now);
            if let Err(e) = self.store.record_action(audit).await {
                warn!(kind = ?E::KIND, %id, error = %e, "Audit write failed, restoring entry");
                self.store.update(previous.into_record()).await?;
                return Err(e);
            }
        }

        info!(
            kind = ?E::KIND,
            %id,
            status = ?next,
            "Ledger entry transitioned"
        );
        Ok(entry)
    }

    /// Open revenue opportunity with the same type and subject, if any.
    pub async fn find_open_opportunity(
        &self,
        organization_id: Uuid,
        opportunity_type: &str,
        related_entity: Option<&str>,
    ) -> RevenueResult<Option<RevenueOpportunity>> {
        let open = self
            .list::<RevenueOpportunity>(
                organization_id,
                &[OpportunityStatus::Identified, OpportunityStatus::InProgress],
            )
            .await?;
        Ok(open.into_iter().find(|o| {
            o.opportunity_type == opportunity_type && o.related_entity.as_deref() == related_entity
        }))
    }

    /// Persist opportunities, skipping any that duplicate an open one.
    pub async fn persist_opportunities(
        &self,
        organization_id: Uuid,
        opportunities: &[RevenueOpportunity],
    ) -> RevenueResult<(PersistReport, usize)> {
        let mut fresh = Vec::with_capacity(opportunities.len());
        let mut skipped = 0;
        for opportunity in opportunities {
            let existing = self
                .find_open_opportunity(
                    organization_id,
                    &opportunity.opportunity_type,
                    opportunity.related_entity.as_deref(),
                )
                .await?;
            if existing.is_some() {
                skipped += 1;
            } else {
                fresh.push(opportunity.clone());
            }
        }
        if skipped > 0 {
            debug!(skipped, "Skipped duplicate open opportunities");
        }
        Ok((self.persist_batch(&fresh).await, skipped))
    }

    /// Every open finding across the three ledgers, most urgent first.
    pub async fn open_items(&self, organization_id: Uuid) -> RevenueResult<Vec<OpenItem>> {
        let mut items = Vec::new();
        items.extend(self.open_of::<RevenueLeakage>(organization_id).await?);
        items.extend(self.open_of::<FeeScheduleAnalysis>(organization_id).await?);
        items.extend(self.open_of::<RevenueOpportunity>(organization_id).await?);
        items.sort_by(|a, b| {
            rank_key(a.priority, a.annual_value)
                .cmp(&rank_key(b.priority, b.annual_value))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(items)
    }

    pub async fn actions(&self, organization_id: Uuid) -> RevenueResult<Vec<OptimizationAction>> {
        self.store.actions(organization_id).await
    }

    async fn open_of<E: LedgerEntry>(&self, organization_id: Uuid) -> RevenueResult<Vec<OpenItem>> {
        let entries = self.list::<E>(organization_id, &[]).await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.status().is_open())
            .map(|e| OpenItem {
                kind: E::KIND,
                id: e.id(),
                title: e.title(),
                priority: e.priority(),
                annual_value: e.projected_value(),
                status: format!("{:?}", e.status()),
            })
            .collect())
    }
}

fn completion_action<E: LedgerEntry>(
    entry: &E,
    outcome: &ActionOutcome,
    at: DateTime<Utc>,
) -> OptimizationAction {
    OptimizationAction {
        id: Uuid::new_v4(),
        organization_id: entry.organization_id(),
        source_kind: E::KIND,
        source_id: entry.id(),
        action_type: entry.action_type(),
        description: entry.title(),
        projected_impact: entry.projected_value(),
        actual_impact: outcome.captured_value,
        completed_by: outcome.actor,
        completed_at: at,
        notes: outcome.notes.clone(),
    }
}
