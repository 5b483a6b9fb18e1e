//! Revenue Optimization Engine for Healthcare Practices
//!
//! Analyzes a practice's historical billing data and produces prioritized,
//! dollar-quantified recommendations:
//! - Revenue leakage detection (unbilled visits, undercoding, missed modifiers,
//!   supplies, write-offs, aged receivables)
//! - Fee schedule optimization against benchmark and payer rates
//! - Service mix, payer mix and provider utilization analysis
//! - E&M coding, modifier, bundling and documentation review
//! - Payer contract scorecards and what-if rate modeling
//! - Revenue forecasting with seasonality, pipeline and goal variance
//!
//! Findings are persisted through the [`OpportunityLedger`], which drives
//! every finding kind through its review lifecycle.

pub mod aggregation;
pub mod benchmarks;
pub mod coding;
pub mod config;
pub mod contracts;
pub mod error;
pub mod fee_schedule;
pub mod findings;
pub mod forecast;
pub mod goals;
pub mod leakage;
pub mod ledger;
pub mod lifecycle;
pub mod models;
pub mod repository;
pub mod scoring;
pub mod service;
pub mod service_mix;

pub use aggregation::{DateRange, MonthKey, RevenueSnapshot, SnapshotQuery};
pub use benchmarks::BenchmarkTables;
pub use config::EngineConfig;
pub use error::{RevenueError, RevenueResult};
pub use findings::*;
pub use ledger::{OpenItem, OpportunityLedger, PersistReport};
pub use lifecycle::*;
pub use models::*;
pub use repository::{InMemoryRevenueStore, OpportunityStore, RevenueDataSource, RevenueDataset};
pub use scoring::{ComplianceRisk, EffortLevel, Frequency, Priority};
pub use service::*;
