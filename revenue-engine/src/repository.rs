use crate::aggregation::{RevenueSnapshot, SnapshotQuery};
use crate::error::{RevenueError, RevenueResult};
use crate::findings::{LedgerRecord, OpportunityKind, OptimizationAction};
use crate::models::*;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Read/write access to the practice's factual records
#[async_trait]
pub trait RevenueDataSource: Send + Sync {
    /// Read-consistent view of one organization for the query window
    async fn snapshot(&self, query: &SnapshotQuery) -> RevenueResult<RevenueSnapshot>;

    /// Fee schedule by id, or the organization default when `fee_schedule_id` is `None`.
    /// Schedules owned by another organization are not returned.
    async fn fee_schedule(
        &self,
        organization_id: Uuid,
        fee_schedule_id: Option<Uuid>,
    ) -> RevenueResult<Option<FeeSchedule>>;

    /// Set the live fee for one code, creating the item if the schedule lacks it
    async fn update_fee_item(
        &self,
        organization_id: Uuid,
        fee_schedule_id: Uuid,
        code: &str,
        fee: Decimal,
    ) -> RevenueResult<FeeScheduleItem>;

    async fn goals(&self, organization_id: Uuid) -> RevenueResult<Vec<RevenueGoal>>;

    async fn save_goal(&self, goal: RevenueGoal) -> RevenueResult<()>;
}

/// Persistence for findings and the optimization audit trail
#[async_trait]
pub trait OpportunityStore: Send + Sync {
    async fn insert(&self, record: LedgerRecord) -> RevenueResult<()>;

    /// Replace an existing record
    async fn update(&self, record: LedgerRecord) -> RevenueResult<()>;

    async fn get(&self, kind: OpportunityKind, id: Uuid) -> RevenueResult<Option<LedgerRecord>>;

    async fn list(
        &self,
        organization_id: Uuid,
        kind: OpportunityKind,
    ) -> RevenueResult<Vec<LedgerRecord>>;

    async fn record_action(&self, action: OptimizationAction) -> RevenueResult<()>;

    async fn actions(&self, organization_id: Uuid) -> RevenueResult<Vec<OptimizationAction>>;
}

/// Export of factual records, as loaded by the CLI and fixtures
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RevenueDataset {
    pub charges: Vec<Charge>,
    pub encounters: Vec<Encounter>,
    pub claims: Vec<Claim>,
    pub providers: Vec<Provider>,
    pub payers: Vec<Payer>,
    pub appointments: Vec<Appointment>,
    pub fee_schedules: Vec<FeeSchedule>,
    pub goals: Vec<RevenueGoal>,
}

/// In-memory store for testing and development
pub struct InMemoryRevenueStore {
    organizations: Arc<DashMap<Uuid, RevenueSnapshot>>,
    fee_schedules: Arc<DashMap<Uuid, FeeSchedule>>,
    goals: Arc<DashMap<Uuid, RevenueGoal>>,
    records: Arc<DashMap<(OpportunityKind, Uuid), LedgerRecord>>,
    actions: Arc<DashMap<Uuid, OptimizationAction>>,
}

impl InMemoryRevenueStore {
    pub fn new() -> Self {
        Self {
            organizations: Arc::new(DashMap::new()),
            fee_schedules: Arc::new(DashMap::new()),
            goals: Arc::new(DashMap::new()),
            records: Arc::new(DashMap::new()),
            actions: Arc::new(DashMap::new()),
        }
    }

    pub fn from_dataset(dataset: RevenueDataset) -> Self {
        let store = Self::new();
        store.load(dataset);
        store
    }

    /// Add every record of `dataset`, partitioned by organization.
    pub fn load(&self, dataset: RevenueDataset) {
        for charge in dataset.charges {
            self.org(charge.organization_id).charges.push(charge);
        }
        for encounter in dataset.encounters {
            self.org(encounter.organization_id).encounters.push(encounter);
        }
        for claim in dataset.claims {
            self.org(claim.organization_id).claims.push(claim);
        }
        for provider in dataset.providers {
            self.org(provider.organization_id).providers.push(provider);
        }
        for payer in dataset.payers {
            self.org(payer.organization_id).payers.push(payer);
        }
        for appointment in dataset.appointments {
            self.org(appointment.organization_id).appointments.push(appointment);
        }
        for schedule in dataset.fee_schedules {
            self.fee_schedules.insert(schedule.id, schedule);
        }
        for goal in dataset.goals {
            self.goals.insert(goal.id, goal);
        }
    }

    fn org(&self, organization_id: Uuid) -> dashmap::mapref::one::RefMut<'_, Uuid, RevenueSnapshot> {
        self.organizations
            .entry(organization_id)
            .or_insert_with(|| RevenueSnapshot {
                organization_id,
                ..Default::default()
            })
    }
}

impl Default for InMemoryRevenueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RevenueDataSource for InMemoryRevenueStore {
    async fn snapshot(&self, query: &SnapshotQuery) -> RevenueResult<RevenueSnapshot> {
        let range = query.range;
        let provider_matches = |id: Uuid| query.provider_id.map_or(true, |p| p == id);
        let payer_matches = |id: Option<Uuid>| query.payer_id.map_or(true, |p| Some(p) == id);

        let Some(data) = self.organizations.get(&query.organization_id) else {
            return Ok(RevenueSnapshot {
                organization_id: query.organization_id,
                range: Some(range),
                ..Default::default()
            });
        };

        let charges = data
            .charges
            .iter()
            .filter(|c| range.contains(c.service_date))
            .filter(|c| provider_matches(c.provider_id) && payer_matches(c.payer_id))
            .cloned()
            .collect();
        let encounters = data
            .encounters
            .iter()
            .filter(|e| range.contains(e.date) && provider_matches(e.provider_id))
            .cloned()
            .collect();
        let claims = data
            .claims
            .iter()
            .filter(|c| c.reference_date().is_some_and(|d| range.contains(d)))
            .filter(|c| provider_matches(c.provider_id) && payer_matches(Some(c.payer_id)))
            .cloned()
            .collect();
        let appointments = match query.appointment_range {
            Some(window) => data
                .appointments
                .iter()
                .filter(|a| window.contains(a.scheduled_date) && provider_matches(a.provider_id))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        Ok(RevenueSnapshot {
            organization_id: query.organization_id,
            range: Some(range),
            charges,
            encounters,
            claims,
            providers: data.providers.clone(),
            payers: data.payers.clone(),
            appointments,
        })
    }

    async fn fee_schedule(
        &self,
        organization_id: Uuid,
        fee_schedule_id: Option<Uuid>,
    ) -> RevenueResult<Option<FeeSchedule>> {
        let schedule = match fee_schedule_id {
            Some(id) => self.fee_schedules.get(&id).map(|s| s.value().clone()),
            None => self
                .fee_schedules
                .iter()
                .find(|s| s.organization_id == organization_id && s.is_default)
                .map(|s| s.value().clone()),
        };
        Ok(schedule.filter(|s| s.organization_id == organization_id))
    }

    async fn update_fee_item(
        &self,
        organization_id: Uuid,
        fee_schedule_id: Uuid,
        code: &str,
        fee: Decimal,
    ) -> RevenueResult<FeeScheduleItem> {
        let mut schedule = self
            .fee_schedules
            .get_mut(&fee_schedule_id)
            .filter(|s| s.organization_id == organization_id)
            .ok_or_else(|| RevenueError::not_found("Fee schedule", fee_schedule_id))?;

        let now = Utc::now();
        if let Some(item) = schedule.items.iter_mut().find(|i| i.code == code) {
            item.fee = fee;
            item.updated_at = Some(now);
            return Ok(item.clone());
        }

        let item = FeeScheduleItem {
            id: Uuid::new_v4(),
            fee_schedule_id,
            code: code.to_string(),
            description: None,
            fee,
            updated_at: Some(now),
        };
        schedule.items.push(item.clone());
        Ok(item)
    }

    async fn goals(&self, organization_id: Uuid) -> RevenueResult<Vec<RevenueGoal>> {
        let mut goals: Vec<RevenueGoal> = self
            .goals
            .iter()
            .filter(|g| g.organization_id == organization_id)
            .map(|g| g.value().clone())
            .collect();
        goals.sort_by_key(|g| (g.start_date, g.id));
        Ok(goals)
    }

    async fn save_goal(&self, goal: RevenueGoal) -> RevenueResult<()> {
        self.goals.insert(goal.id, goal);
        Ok(())
    }
}

#[async_trait]
impl OpportunityStore for InMemoryRevenueStore {
    async fn insert(&self, record: LedgerRecord) -> RevenueResult<()> {
        let key = (record.kind(), record.id());
        if self.records.contains_key(&key) {
            return Err(RevenueError::Repository(format!(
                "{:?} record {} already exists",
                key.0, key.1
            )));
        }
        self.records.insert(key, record);
        Ok(())
    }

    async fn update(&self, record: LedgerRecord) -> RevenueResult<()> {
        let key = (record.kind(), record.id());
        match self.records.get_mut(&key) {
            Some(mut existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(RevenueError::Repository(format!(
                "{:?} record {} does not exist",
                key.0, key.1
            ))),
        }
    }

    async fn get(&self, kind: OpportunityKind, id: Uuid) -> RevenueResult<Option<LedgerRecord>> {
        Ok(self.records.get(&(kind, id)).map(|r| r.value().clone()))
    }

    async fn list(
        &self,
        organization_id: Uuid,
        kind: OpportunityKind,
    ) -> RevenueResult<Vec<LedgerRecord>> {
        let mut records: Vec<LedgerRecord> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == kind && entry.value().organization_id() == organization_id)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(LedgerRecord::id);
        Ok(records)
    }

    async fn record_action(&self, action: OptimizationAction) -> RevenueResult<()> {
        self.actions.insert(action.id, action);
        Ok(())
    }

    async fn actions(&self, organization_id: Uuid) -> RevenueResult<Vec<OptimizationAction>> {
        let mut actions: Vec<OptimizationAction> = self
            .actions
            .iter()
            .filter(|a| a.organization_id == organization_id)
            .map(|a| a.value().clone())
            .collect();
        actions.sort_by_key(|a| a.completed_at);
        Ok(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::DateRange;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::collections::BTreeSet;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn charge(org: Uuid, provider: Uuid, day: NaiveDate) -> Charge {
        Charge {
            id: Uuid::new_v4(),
            organization_id: org,
            encounter_id: None,
            patient_id: Uuid::new_v4(),
            provider_id: provider,
            payer_id: None,
            code: "98940".to_string(),
            service_date: day,
            fee: dec!(45),
            units: 1,
            modifiers: BTreeSet::new(),
            adjustment: Decimal::ZERO,
            balance: Decimal::ZERO,
            status: ChargeStatus::Billed,
        }
    }

    #[tokio::test]
    async fn test_snapshot_filters_by_org_range_and_provider() {
        let org = Uuid::new_v4();
        let other_org = Uuid::new_v4();
        let provider = Uuid::new_v4();
        let store = InMemoryRevenueStore::from_dataset(RevenueDataset {
            charges: vec![
                charge(org, provider, date(2024, 3, 1)),
                charge(org, Uuid::new_v4(), date(2024, 3, 2)),
                charge(org, provider, date(2023, 1, 1)),
                charge(other_org, provider, date(2024, 3, 1)),
            ],
            ..Default::default()
        });

        let range = DateRange::new(date(2024, 1, 1), date(2024, 12, 31)).unwrap();
        let all = store.snapshot(&SnapshotQuery::new(org, range)).await.unwrap();
        assert_eq!(all.charges.len(), 2);

        let filtered = store
            .snapshot(&SnapshotQuery::new(org, range).with_provider(Some(provider)))
            .await
            .unwrap();
        assert_eq!(filtered.charges.len(), 1);

        let empty = store
            .snapshot(&SnapshotQuery::new(Uuid::new_v4(), range))
            .await
            .unwrap();
        assert!(empty.charges.is_empty());
    }

    #[tokio::test]
    async fn test_fee_schedule_is_scoped_to_organization() {
        let org = Uuid::new_v4();
        let schedule = FeeSchedule {
            id: Uuid::new_v4(),
            organization_id: org,
            name: "Standard".to_string(),
            is_default: true,
            items: vec![],
        };
        let schedule_id = schedule.id;
        let store = InMemoryRevenueStore::from_dataset(RevenueDataset {
            fee_schedules: vec![schedule],
            ..Default::default()
        });

        assert!(store.fee_schedule(org, None).await.unwrap().is_some());
        assert!(store
            .fee_schedule(Uuid::new_v4(), Some(schedule_id))
            .await
            .unwrap()
            .is_none());

        let item = store
            .update_fee_item(org, schedule_id, "98940", dec!(55))
            .await
            .unwrap();
        assert_eq!(item.fee, dec!(55));
        let reloaded = store.fee_schedule(org, Some(schedule_id)).await.unwrap().unwrap();
        assert_eq!(reloaded.item("98940").map(|i| i.fee), Some(dec!(55)));

        let err = store
            .update_fee_item(Uuid::new_v4(), schedule_id, "98940", dec!(60))
            .await
            .unwrap_err();
        assert!(matches!(err, RevenueError::NotFound { .. }));
    }
}
