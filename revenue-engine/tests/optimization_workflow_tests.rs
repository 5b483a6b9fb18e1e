//! End-to-end revenue optimization workflows
//!
//! These tests drive the service against the in-memory store:
//! 1. Unbilled visit found, worked and resolved
//! 2. Fee schedule raise reviewed, approved and written back
//! 3. Underpaying payer flagged for renegotiation, without duplicates
//! 4. Flat history forecast
//! 5. Goal progress recomputed from live charges
//! 6. Organization isolation and missing records

use chrono::NaiveDate;
use revenue_engine::contracts::{ContractModelRequest, ContractRating, ContractRequest, ProposedRate};
use revenue_engine::fee_schedule::FeeAnalysisRequest;
use revenue_engine::forecast::ForecastRequest;
use revenue_engine::goals::GoalRequest;
use revenue_engine::leakage::LeakageRequest;
use revenue_engine::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

fn date(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, d).unwrap()
}

fn as_of() -> NaiveDate {
    date(6, 30)
}

fn create_test_service(dataset: RevenueDataset, tables: BenchmarkTables) -> RevenueOptimizationService {
    let store = Arc::new(InMemoryRevenueStore::from_dataset(dataset));
    RevenueOptimizationService::new(
        store.clone(),
        store,
        Arc::new(EngineConfig::default()),
        Arc::new(tables),
    )
    .with_as_of(as_of())
}

fn charge(org: Uuid, code: &str, day: NaiveDate, fee: Decimal) -> Charge {
    Charge {
        id: Uuid::new_v4(),
        organization_id: org,
        encounter_id: None,
        patient_id: Uuid::new_v4(),
        provider_id: Uuid::nil(),
        payer_id: None,
        code: code.to_string(),
        service_date: day,
        fee,
        units: 1,
        modifiers: BTreeSet::new(),
        adjustment: Decimal::ZERO,
        balance: Decimal::ZERO,
        status: ChargeStatus::Billed,
    }
}

fn paid_claim(org: Uuid, payer_id: Uuid, billed: Decimal, paid: Decimal) -> Claim {
    Claim {
        id: Uuid::new_v4(),
        organization_id: org,
        payer_id,
        patient_id: Uuid::new_v4(),
        provider_id: Uuid::nil(),
        total_charged: billed,
        total_allowed: paid,
        total_paid: paid,
        status: ClaimStatus::Paid,
        submission_date: Some(date(5, 1)),
        payment_date: Some(date(5, 21)),
        lines: Vec::new(),
    }
}

fn underpaying_payer(org: Uuid) -> (Payer, RevenueDataset) {
    let payer = Payer {
        id: Uuid::new_v4(),
        organization_id: org,
        name: "Acme Health".to_string(),
        category: PayerCategory::Commercial,
    };
    let claims = (0..12)
        .map(|_| paid_claim(org, payer.id, dec!(100), dec!(25)))
        .collect();
    let dataset = RevenueDataset {
        payers: vec![payer.clone()],
        claims,
        ..RevenueDataset::default()
    };
    (payer, dataset)
}

// ============================================================================
// TEST 1: Unbilled initial evaluation
// ============================================================================

#[tokio::test]
async fn test_unbilled_visit_is_found_and_resolved() {
    println!("\n🧾 TEST 1: Unbilled initial evaluation");

    let org = Uuid::new_v4();
    let encounter = Encounter {
        id: Uuid::new_v4(),
        organization_id: org,
        patient_id: Uuid::new_v4(),
        provider_id: Uuid::new_v4(),
        date: date(6, 1),
        encounter_type: EncounterType::InitialEvaluation,
        status: EncounterStatus::Completed,
        diagnosis_codes: vec!["M54.5".to_string()],
        note: Some("Initial evaluation of low back pain".to_string()),
    };
    let service = create_test_service(
        RevenueDataset {
            encounters: vec![encounter.clone()],
            ..RevenueDataset::default()
        },
        BenchmarkTables::standard(),
    );

    let outcome = service
        .detect_leakage(&LeakageRequest {
            organization_id: org,
            ..LeakageRequest::default()
        })
        .await
        .unwrap();

    assert_eq!(outcome.report.findings.len(), 1);
    assert_eq!(outcome.persistence.persisted, 1);
    let finding = &outcome.report.findings[0];
    assert_eq!(finding.leakage_type, LeakageType::UnbilledService);
    assert_eq!(finding.amount, dec!(150));
    assert_eq!(finding.frequency, Frequency::OneTime);
    assert_eq!(finding.annual_impact, dec!(150));
    assert_eq!(finding.priority, Priority::Low);
    assert_eq!(finding.encounter_id, Some(encounter.id));

    println!("  ✓ Finding persisted, resolving");
    let resolved = service
        .act_on_leakage(
            org,
            finding.id,
            LeakageAction::Resolve,
            ActionOutcome {
                captured_value: Some(dec!(150)),
                notes: Some("Charge posted".to_string()),
                ..ActionOutcome::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, LeakageStatus::Resolved);
    assert!(resolved.resolved_at.is_some());

    let actions = service.optimization_actions(org).await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].source_id, finding.id);
    assert_eq!(actions[0].actual_impact, Some(dec!(150)));

    // terminal: a second resolve is rejected
    let again = service
        .act_on_leakage(org, finding.id, LeakageAction::Resolve, ActionOutcome::default())
        .await;
    assert!(matches!(again, Err(RevenueError::InvalidTransition { .. })));
    assert!(service.open_items(org).await.unwrap().is_empty());
}

// ============================================================================
// TEST 2: Fee schedule review and implementation
// ============================================================================

#[tokio::test]
async fn test_fee_raise_is_approved_and_implemented() {
    println!("\n💲 TEST 2: Fee schedule review and implementation");

    let org = Uuid::new_v4();
    let schedule_id = Uuid::new_v4();
    let schedule = FeeSchedule {
        id: schedule_id,
        organization_id: org,
        name: "Standard".to_string(),
        is_default: true,
        items: vec![FeeScheduleItem {
            id: Uuid::new_v4(),
            fee_schedule_id: schedule_id,
            code: "97140".to_string(),
            description: None,
            fee: dec!(60),
            updated_at: None,
        }],
    };
    let mut tables = BenchmarkTables::standard();
    if let Some(benchmark) = tables.fee_benchmarks.get_mut("97140") {
        benchmark.rate = dec!(40);
    }
    let service = create_test_service(
        RevenueDataset {
            fee_schedules: vec![schedule],
            charges: vec![charge(org, "97140", date(6, 3), dec!(60))],
            ..RevenueDataset::default()
        },
        tables,
    );

    let outcome = service
        .analyze_fee_schedule(&FeeAnalysisRequest {
            organization_id: org,
            ..FeeAnalysisRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(outcome.report.fee_schedule_id, schedule_id);
    assert_eq!(outcome.report.analyses.len(), 1);
    let analysis = outcome.report.analyses[0].clone();
    assert_eq!(analysis.current_fee, dec!(60));
    assert_eq!(analysis.recommended_fee, dec!(70));
    assert_eq!(analysis.status, FeeAnalysisStatus::Pending);

    println!("  ✓ Nothing approved yet, implementation refused");
    let premature = service.implement_fee_changes(org, &[analysis.id], None).await;
    assert!(matches!(premature, Err(RevenueError::BadRequest(_))));

    let shortcut = service
        .review_fee_analysis(org, analysis.id, FeeReviewAction::Implement, ActionOutcome::default())
        .await;
    assert!(matches!(shortcut, Err(RevenueError::BadRequest(_))));

    let reviewer = Uuid::new_v4();
    let approved = service
        .review_fee_analysis(
            org,
            analysis.id,
            FeeReviewAction::Approve,
            ActionOutcome {
                actor: Some(reviewer),
                notes: Some("In line with the regional market".to_string()),
                ..ActionOutcome::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(approved.status, FeeAnalysisStatus::Approved);
    assert_eq!(approved.reviewed_by, Some(reviewer));

    println!("  ✓ Approved, writing the new fee");
    let report = service
        .implement_fee_changes(org, &[analysis.id], Some(reviewer))
        .await
        .unwrap();
    assert!(report.is_complete());
    assert!(report.skipped.is_empty());
    assert_eq!(report.updated_items.len(), 1);
    assert_eq!(report.updated_items[0].code, "97140");
    assert_eq!(report.updated_items[0].fee, dec!(70));
    assert_eq!(report.implemented[0].status, FeeAnalysisStatus::Implemented);
    assert!(report.implemented[0].implemented_at.is_some());

    let implemented = service
        .fee_analyses(org, &[FeeAnalysisStatus::Implemented])
        .await
        .unwrap();
    assert_eq!(implemented.len(), 1);

    // re-analysis reads the written fee: 70 is already at 175% of 40
    let rerun = service
        .analyze_fee_schedule(&FeeAnalysisRequest {
            organization_id: org,
            ..FeeAnalysisRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(rerun.report.analyses[0].current_fee, dec!(70));
    assert_eq!(rerun.report.summary.changes_recommended, 0);
}

#[tokio::test]
async fn test_fee_analysis_without_schedule_is_not_found() {
    let service = create_test_service(RevenueDataset::default(), BenchmarkTables::standard());
    let result = service
        .analyze_fee_schedule(&FeeAnalysisRequest {
            organization_id: Uuid::new_v4(),
            ..FeeAnalysisRequest::default()
        })
        .await;
    assert!(matches!(
        result,
        Err(RevenueError::NotFound { entity: "Fee schedule", .. })
    ));
}

// ============================================================================
// TEST 3: Contract renegotiation
// ============================================================================

#[tokio::test]
async fn test_underpaying_payer_is_flagged_once() {
    println!("\n🤝 TEST 3: Contract renegotiation");

    let org = Uuid::new_v4();
    let (payer, dataset) = underpaying_payer(org);
    let service = create_test_service(dataset, BenchmarkTables::standard());
    let request = ContractRequest {
        organization_id: org,
        ..ContractRequest::default()
    };

    let outcome = service.analyze_contracts(&request).await.unwrap();
    let card = &outcome.report.scorecards[0];
    assert_eq!(card.billed, dec!(1200));
    assert_eq!(card.paid, dec!(300));
    assert_eq!(card.reimbursement_rate, dec!(25));
    assert_eq!(card.rating, ContractRating::Poor);
    assert_eq!(card.priority, Priority::Critical);
    assert_eq!(outcome.persistence.persisted, 1);
    assert_eq!(outcome.skipped_duplicates, 0);

    println!("  ✓ Re-running does not duplicate the open opportunity");
    let rerun = service.analyze_contracts(&request).await.unwrap();
    assert_eq!(rerun.skipped_duplicates, 1);
    assert_eq!(rerun.persistence.persisted, 0);

    let open = service
        .opportunities(org, &[OpportunityStatus::Identified])
        .await
        .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].related_entity, Some(payer.id.to_string()));

    let started = service
        .act_on_opportunity(org, open[0].id, OpportunityAction::Start, ActionOutcome::default())
        .await
        .unwrap();
    assert_eq!(started.status, OpportunityStatus::InProgress);
    let captured = service
        .act_on_opportunity(
            org,
            open[0].id,
            OpportunityAction::Complete,
            ActionOutcome {
                captured_value: Some(dec!(2500)),
                ..ActionOutcome::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(captured.status, OpportunityStatus::Captured);
    assert!(captured.completed_at.is_some());
    assert_eq!(service.optimization_actions(org).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_contract_model_requires_changes_and_known_payer() {
    let org = Uuid::new_v4();
    let (_, dataset) = underpaying_payer(org);
    let service = create_test_service(dataset, BenchmarkTables::standard());

    let empty = service
        .model_contract_change(&ContractModelRequest {
            organization_id: org,
            payer_id: Uuid::new_v4(),
            ..ContractModelRequest::default()
        })
        .await;
    assert!(matches!(empty, Err(RevenueError::BadRequest(_))));

    let unknown = service
        .model_contract_change(&ContractModelRequest {
            organization_id: org,
            payer_id: Uuid::new_v4(),
            changes: vec![ProposedRate {
                code: "98940".to_string(),
                rate: dec!(40),
            }],
            ..ContractModelRequest::default()
        })
        .await;
    assert!(matches!(unknown, Err(RevenueError::NotFound { entity: "Payer", .. })));
}

#[tokio::test]
async fn test_contract_analysis_rejects_unknown_payer() {
    let org = Uuid::new_v4();
    let (payer, dataset) = underpaying_payer(org);
    let service = create_test_service(dataset, BenchmarkTables::standard());

    let unknown = service
        .analyze_contracts(&ContractRequest {
            organization_id: org,
            payer_id: Some(Uuid::new_v4()),
            ..ContractRequest::default()
        })
        .await;
    assert!(matches!(unknown, Err(RevenueError::NotFound { entity: "Payer", .. })));
    assert!(service
        .opportunities(org, &[OpportunityStatus::Identified])
        .await
        .unwrap()
        .is_empty());

    let known = service
        .analyze_contracts(&ContractRequest {
            organization_id: org,
            payer_id: Some(payer.id),
            ..ContractRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(known.report.scorecards.len(), 1);
    assert_eq!(known.report.scorecards[0].payer_id, payer.id);
}

// ============================================================================
// TEST 4: Forecast
// ============================================================================

#[tokio::test]
async fn test_flat_history_forecast() {
    println!("\n📈 TEST 4: Flat history forecast");

    let org = Uuid::new_v4();
    let charges = (1..=6).map(|m| charge(org, "98940", date(m, 10), dec!(10000))).collect();
    let store = Arc::new(InMemoryRevenueStore::from_dataset(RevenueDataset {
        charges,
        ..RevenueDataset::default()
    }));
    let service = RevenueOptimizationService::new(
        store.clone(),
        store,
        Arc::new(EngineConfig::default()),
        Arc::new(BenchmarkTables::standard()),
    )
    .with_as_of(date(7, 1));

    let report = service
        .forecast(&ForecastRequest {
            organization_id: org,
            include_seasonality: false,
            include_pipeline: false,
            ..ForecastRequest::default()
        })
        .await
        .unwrap();

    assert_eq!(report.history.len(), 6);
    assert_eq!(report.trend.monthly_growth_rate, Decimal::ZERO);
    assert!(report.pipeline.is_none());
    for scenario in &report.scenarios {
        assert_eq!(scenario.months.len(), 12);
        assert_eq!(scenario.total_revenue, dec!(120000));
    }

    let too_long = service
        .forecast(&ForecastRequest {
            organization_id: org,
            horizon_months: 30,
            ..ForecastRequest::default()
        })
        .await;
    assert!(matches!(too_long, Err(RevenueError::BadRequest(_))));
}

// ============================================================================
// TEST 5: Goals
// ============================================================================

#[tokio::test]
async fn test_goal_progress_tracks_charges() {
    println!("\n🎯 TEST 5: Goal progress");

    let org = Uuid::new_v4();
    let service = create_test_service(
        RevenueDataset {
            charges: vec![
                charge(org, "98940", date(6, 5), dec!(10000)),
                charge(org, "98940", date(6, 12), dec!(8000)),
                charge(org, "98940", date(5, 31), dec!(9999)),
            ],
            ..RevenueDataset::default()
        },
        BenchmarkTables::standard(),
    );

    let goal = service
        .upsert_goal(&GoalRequest {
            organization_id: org,
            id: None,
            name: "June collections".to_string(),
            period: GoalPeriod::Monthly,
            start_date: date(6, 1),
            end_date: None,
            target_amount: dec!(20000),
            active: true,
        })
        .await
        .unwrap();

    assert_eq!(goal.end_date, date(6, 30));
    assert_eq!(goal.actual_amount, dec!(18000));
    assert_eq!(goal.variance, dec!(-2000));
    assert_eq!(goal.percent_achieved, dec!(90.0));
    assert!(!goal.on_track);
    assert!(!goal.pace_on_track);

    let raised = service
        .upsert_goal(&GoalRequest {
            organization_id: org,
            id: Some(goal.id),
            name: "June collections".to_string(),
            period: GoalPeriod::Monthly,
            start_date: date(6, 1),
            end_date: None,
            target_amount: dec!(15000),
            active: true,
        })
        .await
        .unwrap();
    assert_eq!(raised.id, goal.id);
    assert!(raised.on_track);
    assert!(raised.pace_on_track);

    let goals = service.goals(org).await.unwrap();
    assert_eq!(goals.len(), 1);
    assert_eq!(goals[0].target_amount, dec!(15000));

    let missing = service
        .upsert_goal(&GoalRequest {
            organization_id: org,
            id: Some(Uuid::new_v4()),
            name: "Ghost".to_string(),
            period: GoalPeriod::Monthly,
            start_date: date(6, 1),
            end_date: None,
            target_amount: dec!(100),
            active: true,
        })
        .await;
    assert!(matches!(missing, Err(RevenueError::NotFound { .. })));
}

// ============================================================================
// TEST 6: Isolation and ranking
// ============================================================================

#[tokio::test]
async fn test_other_organization_cannot_act_on_findings() {
    println!("\n🔒 TEST 6: Organization isolation");

    let org = Uuid::new_v4();
    let (_, dataset) = underpaying_payer(org);
    let service = create_test_service(dataset, BenchmarkTables::standard());
    let outcome = service
        .analyze_contracts(&ContractRequest {
            organization_id: org,
            ..ContractRequest::default()
        })
        .await
        .unwrap();
    let opportunity_id = outcome.report.opportunities[0].id;

    let intruder = Uuid::new_v4();
    let result = service
        .act_on_opportunity(intruder, opportunity_id, OpportunityAction::Start, ActionOutcome::default())
        .await;
    assert!(matches!(result, Err(RevenueError::NotFound { .. })));
    assert!(service.open_items(intruder).await.unwrap().is_empty());

    let unknown = service
        .act_on_leakage(org, Uuid::new_v4(), LeakageAction::Investigate, ActionOutcome::default())
        .await;
    assert!(matches!(unknown, Err(RevenueError::NotFound { .. })));
}

#[tokio::test]
async fn test_open_items_rank_by_priority_then_value() {
    let org = Uuid::new_v4();
    let (_, mut dataset) = underpaying_payer(org);
    dataset.encounters.push(Encounter {
        id: Uuid::new_v4(),
        organization_id: org,
        patient_id: Uuid::new_v4(),
        provider_id: Uuid::new_v4(),
        date: date(6, 10),
        encounter_type: EncounterType::FollowUp,
        status: EncounterStatus::Completed,
        diagnosis_codes: Vec::new(),
        note: None,
    });
    let service = create_test_service(dataset, BenchmarkTables::standard());

    service
        .detect_leakage(&LeakageRequest {
            organization_id: org,
            categories: vec![LeakageType::UnbilledService],
            ..LeakageRequest::default()
        })
        .await
        .unwrap();
    service
        .analyze_contracts(&ContractRequest {
            organization_id: org,
            ..ContractRequest::default()
        })
        .await
        .unwrap();

    let items = service.open_items(org).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].kind, OpportunityKind::Opportunity);
    assert_eq!(items[0].priority, Priority::Critical);
    assert_eq!(items[1].kind, OpportunityKind::Leakage);
    assert_eq!(items[1].annual_value, dec!(75));
    assert!(items.windows(2).all(|w| w[0].priority >= w[1].priority));
}
