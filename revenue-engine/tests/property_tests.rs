//! Property tests over generated billing data
//!
//! Whatever the input, findings never carry negative money and derived goal
//! fields stay consistent with the charges they came from.

use chrono::{Duration, NaiveDate, Utc};
use proptest::prelude::*;
use revenue_engine::contracts::{ContractAnalyzer, ContractRequest};
use revenue_engine::goals::GoalTracker;
use revenue_engine::leakage::{LeakageDetector, LeakageRequest};
use revenue_engine::*;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

const CODES: [&str; 6] = ["98940", "98941", "99213", "97140", "97110", "97014"];

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn range() -> DateRange {
    DateRange::new(start(), NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()).unwrap()
}

fn arb_charge() -> impl Strategy<Value = Charge> {
    (0usize..CODES.len(), 0i64..90, 0i64..50_000, 0i64..100, 1u32..4).prop_map(
        |(code, day, cents, adjustment_pct, units)| {
            let fee = Decimal::new(cents, 2);
            Charge {
                id: Uuid::new_v4(),
                organization_id: Uuid::nil(),
                encounter_id: None,
                patient_id: Uuid::new_v4(),
                provider_id: Uuid::nil(),
                payer_id: None,
                code: CODES.get(code).copied().unwrap_or("98940").to_string(),
                service_date: start() + Duration::days(day),
                fee,
                units,
                modifiers: BTreeSet::new(),
                adjustment: (fee * Decimal::new(adjustment_pct, 2)).round_dp(2),
                balance: Decimal::ZERO,
                status: ChargeStatus::Billed,
            }
        },
    )
}

fn arb_claim(payer_id: Uuid) -> impl Strategy<Value = Claim> {
    (1i64..100_000, 0i64..=100, 0i64..90, any::<bool>()).prop_map(move |(cents, paid_pct, day, denied)| {
        let billed = Decimal::new(cents, 2);
        let paid = if denied {
            Decimal::ZERO
        } else {
            (billed * Decimal::new(paid_pct, 2)).round_dp(2)
        };
        Claim {
            id: Uuid::new_v4(),
            organization_id: Uuid::nil(),
            payer_id,
            patient_id: Uuid::new_v4(),
            provider_id: Uuid::nil(),
            total_charged: billed,
            total_allowed: paid,
            total_paid: paid,
            status: if denied { ClaimStatus::Denied } else { ClaimStatus::Paid },
            submission_date: Some(start() + Duration::days(day)),
            payment_date: None,
            lines: Vec::new(),
        }
    })
}

proptest! {
    #[test]
    fn prop_leakage_amounts_are_never_negative(charges in prop::collection::vec(arb_charge(), 0..60)) {
        let detector = LeakageDetector::new(
            Arc::new(EngineConfig::default()),
            Arc::new(BenchmarkTables::standard()),
        );
        let snapshot = RevenueSnapshot { charges, ..RevenueSnapshot::default() };
        let as_of = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let report = detector.detect(&snapshot, &LeakageRequest::default(), range(), as_of, Utc::now());

        for finding in &report.findings {
            prop_assert!(finding.amount >= Decimal::ZERO);
            prop_assert!(finding.annual_impact >= finding.amount);
        }
        prop_assert_eq!(report.summary.total_findings, report.findings.len());
    }

    #[test]
    fn prop_contract_opportunities_are_non_negative(
        claims in prop::collection::vec(arb_claim(Uuid::from_u128(7)), 10..40),
    ) {
        let analyzer = ContractAnalyzer::new(
            Arc::new(EngineConfig::default()),
            Arc::new(BenchmarkTables::standard()),
        );
        let snapshot = RevenueSnapshot { claims, ..RevenueSnapshot::default() };
        let report = analyzer.analyze(&snapshot, &ContractRequest::default(), range(), Utc::now());

        for card in &report.scorecards {
            prop_assert!(card.reimbursement_rate >= Decimal::ZERO);
            prop_assert!(card.reimbursement_rate <= Decimal::ONE_HUNDRED);
            prop_assert!(card.opportunity_value >= Decimal::ZERO);
        }
        for opportunity in &report.opportunities {
            prop_assert!(opportunity.estimated_value >= Decimal::ZERO);
        }
    }

    #[test]
    fn prop_goal_variance_reconciles(
        charges in prop::collection::vec(arb_charge(), 0..40),
        target_cents in 1i64..10_000_000,
        day in 0i64..120,
    ) {
        let goal = RevenueGoal {
            id: Uuid::new_v4(),
            organization_id: Uuid::nil(),
            name: "Q1".to_string(),
            period: GoalPeriod::Quarterly,
            start_date: start(),
            end_date: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            target_amount: Decimal::new(target_cents, 2),
            actual_amount: Decimal::ZERO,
            variance: Decimal::ZERO,
            percent_achieved: Decimal::ZERO,
            on_track: false,
            pace_on_track: false,
            active: true,
            updated_at: None,
        };
        let progress = GoalTracker::recompute(&goal, &charges, start() + Duration::days(day));

        prop_assert!(progress.actual_amount >= Decimal::ZERO);
        prop_assert_eq!(progress.variance, progress.actual_amount - progress.target_amount);
        prop_assert_eq!(progress.on_track, progress.variance >= Decimal::ZERO);
        prop_assert_eq!(progress.on_track, progress.actual_amount >= progress.target_amount);
    }
}
