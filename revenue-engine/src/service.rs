//! Revenue optimization service
//!
//! Wires the data source and opportunity store to the analyzers. Every
//! analyze call reads one snapshot, scores it, and only then persists the
//! findings, so an abandoned call leaves no partial state behind.

use crate::aggregation::{DateRange, SnapshotQuery};
use crate::benchmarks::BenchmarkTables;
use crate::coding::{CodingOptimizer, CodingReport, CodingRequest};
use crate::config::EngineConfig;
use crate::contracts::{ContractAnalyzer, ContractModel, ContractModelRequest, ContractReport, ContractRequest};
use crate::error::{RevenueError, RevenueResult};
use crate::fee_schedule::{FeeAnalysisReport, FeeAnalysisRequest, FeeEffectiveness, FeeScheduleOptimizer};
use crate::findings::{ActionOutcome, FeeScheduleAnalysis, OptimizationAction, RevenueLeakage, RevenueOpportunity};
use crate::forecast::{ForecastReport, ForecastRequest, RevenueForecaster};
use crate::goals::{GoalRequest, GoalTracker};
use crate::leakage::{LeakageDetector, LeakageReport, LeakageRequest};
use crate::ledger::{OpenItem, OpportunityLedger, PersistReport};
use crate::lifecycle::{
    FeeAnalysisStatus, FeeReviewAction, LeakageAction, LeakageStatus, OpportunityAction, OpportunityStatus,
};
use crate::models::{FeeScheduleItem, RevenueGoal};
use crate::repository::{OpportunityStore, RevenueDataSource};
use crate::service_mix::{ServiceMixAnalyzer, ServiceMixReport, ServiceMixRequest};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// An analysis report together with how its findings were persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome<R> {
    pub report: R,
    pub persistence: PersistReport,
    /// Findings not written because an open duplicate exists
    pub skipped_duplicates: usize,
}

/// Per-analysis result of applying approved fee changes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeeImplementationReport {
    pub implemented: Vec<FeeScheduleAnalysis>,
    pub updated_items: Vec<FeeScheduleItem>,
    /// Requested analyses that were not in `approved` status
    pub skipped: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

impl FeeImplementationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct RevenueOptimizationService {
    data: Arc<dyn RevenueDataSource>,
    ledger: OpportunityLedger,
    leakage: LeakageDetector,
    fees: FeeScheduleOptimizer,
    service_mix: ServiceMixAnalyzer,
    coding: CodingOptimizer,
    contracts: ContractAnalyzer,
    forecaster: RevenueForecaster,
    /// Fixed business date; the current UTC date when unset
    as_of: Option<NaiveDate>,
}

impl RevenueOptimizationService {
    pub fn new(
        data: Arc<dyn RevenueDataSource>,
        store: Arc<dyn OpportunityStore>,
        config: Arc<EngineConfig>,
        tables: Arc<BenchmarkTables>,
    ) -> Self {
        Self {
            data,
            ledger: OpportunityLedger::new(store),
            leakage: LeakageDetector::new(config.clone(), tables.clone()),
            fees: FeeScheduleOptimizer::new(config.clone(), tables.clone()),
            service_mix: ServiceMixAnalyzer::new(config.clone(), tables.clone()),
            coding: CodingOptimizer::new(config.clone(), tables.clone()),
            contracts: ContractAnalyzer::new(config.clone(), tables),
            forecaster: RevenueForecaster::new(config),
            as_of: None,
        }
    }

    /// Pin the business date used for default windows and aging
    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn ledger(&self) -> &OpportunityLedger {
        &self.ledger
    }

    fn today(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Utc::now().date_naive())
    }

    // =========================================================================
    // Analyses
    // =========================================================================

    #[tracing::instrument(skip(self, request), fields(organization_id = %request.organization_id))]
    pub async fn detect_leakage(&self, request: &LeakageRequest) -> RevenueResult<AnalysisOutcome<LeakageReport>> {
        let as_of = self.today();
        let range = self.leakage.resolve_range(request, as_of)?;
        let query = SnapshotQuery::new(request.organization_id, range)
            .with_provider(request.provider_id)
            .with_payer(request.payer_id);
        let snapshot = self.data.snapshot(&query).await?;

        let report = self.leakage.detect(&snapshot, request, range, as_of, Utc::now());
        let persistence = self.ledger.persist_batch(&report.findings).await;
        info!(
            findings = report.summary.total_findings,
            annual_impact = %report.summary.total_annual_impact,
            "Leakage detection complete"
        );
        Ok(AnalysisOutcome {
            report,
            persistence,
            skipped_duplicates: 0,
        })
    }

    #[tracing::instrument(skip(self, request), fields(organization_id = %request.organization_id))]
    pub async fn analyze_fee_schedule(
        &self,
        request: &FeeAnalysisRequest,
    ) -> RevenueResult<AnalysisOutcome<FeeAnalysisReport>> {
        let schedule = self
            .data
            .fee_schedule(request.organization_id, request.fee_schedule_id)
            .await?
            .ok_or_else(|| {
                RevenueError::not_found("Fee schedule", request.fee_schedule_id.unwrap_or(request.organization_id))
            })?;
        let range = self.fees.resolve_range(request, self.today())?;
        let snapshot = self
            .data
            .snapshot(&SnapshotQuery::new(request.organization_id, range))
            .await?;

        let report = self.fees.analyze(&schedule, &snapshot, request, range, Utc::now());
        let persistence = self.ledger.persist_batch(&report.analyses).await;
        info!(
            fee_schedule_id = %schedule.id,
            codes = report.summary.codes_analyzed,
            changes = report.summary.changes_recommended,
            "Fee schedule analysis complete"
        );
        Ok(AnalysisOutcome {
            report,
            persistence,
            skipped_duplicates: 0,
        })
    }

    #[tracing::instrument(skip(self, request), fields(organization_id = %request.organization_id))]
    pub async fn analyze_service_mix(
        &self,
        request: &ServiceMixRequest,
    ) -> RevenueResult<AnalysisOutcome<ServiceMixReport>> {
        let range = self.service_mix.resolve_range(request, self.today())?;
        let query = SnapshotQuery::new(request.organization_id, range).with_provider(request.provider_id);
        let snapshot = self.data.snapshot(&query).await?;

        let report = self.service_mix.analyze(&snapshot, request, range, Utc::now());
        let (persistence, skipped_duplicates) = self
            .ledger
            .persist_opportunities(request.organization_id, &report.recommendations)
            .await?;
        info!(
            categories = report.categories.len(),
            recommendations = report.recommendations.len(),
            "Service mix analysis complete"
        );
        Ok(AnalysisOutcome {
            report,
            persistence,
            skipped_duplicates,
        })
    }

    #[tracing::instrument(skip(self, request), fields(organization_id = %request.organization_id))]
    pub async fn analyze_coding(&self, request: &CodingRequest) -> RevenueResult<AnalysisOutcome<CodingReport>> {
        let range = self.coding.resolve_range(request, self.today())?;
        let query = SnapshotQuery::new(request.organization_id, range).with_provider(request.provider_id);
        let snapshot = self.data.snapshot(&query).await?;

        let report = self.coding.analyze(&snapshot, request, range, Utc::now());
        let (persistence, skipped_duplicates) = self
            .ledger
            .persist_opportunities(request.organization_id, &report.opportunities)
            .await?;
        if report.summary.overcoded_families > 0 {
            warn!(
                families = report.summary.overcoded_families,
                "E&M levels above benchmark, compliance review needed"
            );
        }
        info!(
            em_visits = report.summary.em_visits,
            opportunities = report.opportunities.len(),
            "Coding analysis complete"
        );
        Ok(AnalysisOutcome {
            report,
            persistence,
            skipped_duplicates,
        })
    }

    #[tracing::instrument(skip(self, request), fields(organization_id = %request.organization_id))]
    pub async fn analyze_contracts(&self, request: &ContractRequest) -> RevenueResult<AnalysisOutcome<ContractReport>> {
        let range = self
            .contracts
            .resolve_range(request.start_date, request.end_date, self.today())?;
        let query = SnapshotQuery::new(request.organization_id, range).with_payer(request.payer_id);
        let snapshot = self.data.snapshot(&query).await?;
        if let Some(payer_id) = request.payer_id {
            if !snapshot.payers.iter().any(|p| p.id == payer_id) {
                return Err(RevenueError::not_found("Payer", payer_id));
            }
        }

        let report = self.contracts.analyze(&snapshot, request, range, Utc::now());
        let (persistence, skipped_duplicates) = self
            .ledger
            .persist_opportunities(request.organization_id, &report.opportunities)
            .await?;
        info!(
            payers = report.summary.payers_analyzed,
            renegotiation_candidates = report.summary.renegotiation_candidates,
            "Contract analysis complete"
        );
        Ok(AnalysisOutcome {
            report,
            persistence,
            skipped_duplicates,
        })
    }

    /// What-if projection for proposed payer rates. Nothing is persisted.
    #[tracing::instrument(skip(self, request), fields(organization_id = %request.organization_id, payer_id = %request.payer_id))]
    pub async fn model_contract_change(&self, request: &ContractModelRequest) -> RevenueResult<ContractModel> {
        if request.changes.is_empty() {
            return Err(RevenueError::BadRequest("No rate changes proposed".to_string()));
        }
        let range = self
            .contracts
            .resolve_range(request.start_date, request.end_date, self.today())?;
        let query = SnapshotQuery::new(request.organization_id, range).with_payer(Some(request.payer_id));
        let snapshot = self.data.snapshot(&query).await?;
        let payer = snapshot
            .payers
            .iter()
            .find(|p| p.id == request.payer_id)
            .ok_or_else(|| RevenueError::not_found("Payer", request.payer_id))?;

        Ok(self.contracts.model_change(&snapshot, payer, &request.changes, range))
    }

    #[tracing::instrument(skip(self, request), fields(organization_id = %request.organization_id))]
    pub async fn forecast(&self, request: &ForecastRequest) -> RevenueResult<ForecastReport> {
        let plan = self.forecaster.plan(request, self.today())?;
        let query = SnapshotQuery::new(request.organization_id, plan.history)
            .with_appointments(plan.pipeline_window);
        let snapshot = self.data.snapshot(&query).await?;
        let goals = self.data.goals(request.organization_id).await?;

        let report = self.forecaster.forecast(&plan, &snapshot, &goals, Utc::now());
        info!(
            months_of_data = report.trend.months_of_data,
            horizon = plan.horizon_months,
            goals = report.goals.len(),
            "Forecast complete"
        );
        Ok(report)
    }

    // =========================================================================
    // Fee review and implementation
    // =========================================================================

    /// Approve or reject a pending analysis. Implementation goes through
    /// [`Self::implement_fee_changes`].
    pub async fn review_fee_analysis(
        &self,
        organization_id: Uuid,
        analysis_id: Uuid,
        action: FeeReviewAction,
        outcome: ActionOutcome,
    ) -> RevenueResult<FeeScheduleAnalysis> {
        if action == FeeReviewAction::Implement {
            return Err(RevenueError::BadRequest(
                "Fee changes are implemented through implement_fee_changes".to_string(),
            ));
        }
        self.ledger
            .transition::<FeeScheduleAnalysis>(organization_id, analysis_id, action, outcome)
            .await
    }

    /// Write approved recommendations into the live fee schedule.
    ///
    /// Fails without writing anything when none of `analysis_ids` is approved;
    /// otherwise each change succeeds or fails on its own.
    #[tracing::instrument(skip(self, analysis_ids), fields(requested = analysis_ids.len()))]
    pub async fn implement_fee_changes(
        &self,
        organization_id: Uuid,
        analysis_ids: &[Uuid],
        actor: Option<Uuid>,
    ) -> RevenueResult<FeeImplementationReport> {
        let mut report = FeeImplementationReport::default();
        let mut approved = Vec::new();
        for id in analysis_ids {
            let analysis: FeeScheduleAnalysis = self.ledger.get(organization_id, *id).await?;
            if analysis.status == FeeAnalysisStatus::Approved {
                approved.push(analysis);
            } else {
                report.skipped.push(*id);
            }
        }
        if approved.is_empty() {
            return Err(RevenueError::BadRequest(
                "No approved fee analyses to implement".to_string(),
            ));
        }

        for analysis in approved {
            match self.implement_one(organization_id, &analysis, actor).await {
                Ok((item, implemented)) => {
                    report.updated_items.push(item);
                    report.implemented.push(implemented);
                }
                Err(e) => {
                    warn!(analysis_id = %analysis.id, error = %e, "Fee change failed");
                    report.failed.push((analysis.id, e.to_string()));
                }
            }
        }
        info!(
            implemented = report.implemented.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Fee changes applied"
        );
        Ok(report)
    }

    async fn implement_one(
        &self,
        organization_id: Uuid,
        analysis: &FeeScheduleAnalysis,
        actor: Option<Uuid>,
    ) -> RevenueResult<(FeeScheduleItem, FeeScheduleAnalysis)> {
        let item = self
            .data
            .update_fee_item(
                organization_id,
                analysis.fee_schedule_id,
                &analysis.code,
                analysis.recommended_fee,
            )
            .await?;
        let outcome = ActionOutcome {
            actor,
            effective_date: analysis.effective_date.or(Some(self.today())),
            ..ActionOutcome::default()
        };
        let implemented = self
            .ledger
            .transition::<FeeScheduleAnalysis>(organization_id, analysis.id, FeeReviewAction::Implement, outcome)
            .await?;
        Ok((item, implemented))
    }

    /// Compare billed revenue before and after an implemented change.
    pub async fn fee_effectiveness(&self, organization_id: Uuid, analysis_id: Uuid) -> RevenueResult<FeeEffectiveness> {
        let analysis: FeeScheduleAnalysis = self.ledger.get(organization_id, analysis_id).await?;
        let as_of = self.today();
        let (_, pre, post) = self.fees.effectiveness_windows(&analysis, as_of)?;
        let pre_snapshot = self.data.snapshot(&SnapshotQuery::new(organization_id, pre)).await?;
        let post_snapshot = self.data.snapshot(&SnapshotQuery::new(organization_id, post)).await?;
        self.fees.effectiveness(&analysis, &pre_snapshot, &post_snapshot, as_of)
    }

    // =========================================================================
    // Ledger actions
    // =========================================================================

    pub async fn act_on_leakage(
        &self,
        organization_id: Uuid,
        leakage_id: Uuid,
        action: LeakageAction,
        outcome: ActionOutcome,
    ) -> RevenueResult<RevenueLeakage> {
        self.ledger
            .transition::<RevenueLeakage>(organization_id, leakage_id, action, outcome)
            .await
    }

    /// Start, complete or decline a service-mix, coding or contract opportunity.
    pub async fn act_on_opportunity(
        &self,
        organization_id: Uuid,
        opportunity_id: Uuid,
        action: OpportunityAction,
        outcome: ActionOutcome,
    ) -> RevenueResult<RevenueOpportunity> {
        self.ledger
            .transition::<RevenueOpportunity>(organization_id, opportunity_id, action, outcome)
            .await
    }

    pub async fn leakages(&self, organization_id: Uuid, statuses: &[LeakageStatus]) -> RevenueResult<Vec<RevenueLeakage>> {
        self.ledger.list(organization_id, statuses).await
    }

    pub async fn fee_analyses(
        &self,
        organization_id: Uuid,
        statuses: &[FeeAnalysisStatus],
    ) -> RevenueResult<Vec<FeeScheduleAnalysis>> {
        self.ledger.list(organization_id, statuses).await
    }

    pub async fn opportunities(
        &self,
        organization_id: Uuid,
        statuses: &[OpportunityStatus],
    ) -> RevenueResult<Vec<RevenueOpportunity>> {
        self.ledger.list(organization_id, statuses).await
    }

    pub async fn open_items(&self, organization_id: Uuid) -> RevenueResult<Vec<OpenItem>> {
        self.ledger.open_items(organization_id).await
    }

    pub async fn optimization_actions(&self, organization_id: Uuid) -> RevenueResult<Vec<OptimizationAction>> {
        self.ledger.actions(organization_id).await
    }

    // =========================================================================
    // Goals
    // =========================================================================

    pub async fn upsert_goal(&self, request: &GoalRequest) -> RevenueResult<RevenueGoal> {
        let existing = match request.id {
            Some(id) => Some(
                self.data
                    .goals(request.organization_id)
                    .await?
                    .into_iter()
                    .find(|g| g.id == id)
                    .ok_or_else(|| RevenueError::not_found("Revenue goal", id))?,
            ),
            None => None,
        };
        let goal = GoalTracker::build(request, existing.as_ref(), Utc::now())?;
        let goal = self.refresh_goal(goal).await?;
        info!(goal_id = %goal.id, target = %goal.target_amount, "Goal saved");
        Ok(goal)
    }

    /// Goals with progress recomputed from current charges.
    pub async fn goals(&self, organization_id: Uuid) -> RevenueResult<Vec<RevenueGoal>> {
        let goals = self.data.goals(organization_id).await?;
        let mut refreshed = Vec::with_capacity(goals.len());
        for goal in goals {
            refreshed.push(self.refresh_goal(goal).await?);
        }
        Ok(refreshed)
    }

    async fn refresh_goal(&self, goal: RevenueGoal) -> RevenueResult<RevenueGoal> {
        let through = self.today().min(goal.end_date);
        let goal = match DateRange::new(goal.start_date, through) {
            Ok(range) => {
                let snapshot = self
                    .data
                    .snapshot(&SnapshotQuery::new(goal.organization_id, range))
                    .await?;
                GoalTracker::recompute(&goal, &snapshot.charges, self.today())
            }
            // not started yet
            Err(_) => GoalTracker::recompute(&goal, &[], self.today()),
        };
        self.data.save_goal(goal.clone()).await?;
        Ok(goal)
    }
}
