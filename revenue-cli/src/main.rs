//! Revenue optimization CLI
//!
//! Loads a JSON data export into the in-memory store and runs one analysis
//! or ledger action against it, printing the JSON response on stdout.
//!
//! Usage:
//!   revenue --data export.json --org <ORG_ID> leakage --min-amount 100
//!   revenue --data export.json --org <ORG_ID> --as-of 2024-06-30 forecast --horizon 6
//!   revenue --data export.json --org <ORG_ID> model-contract --payer <PAYER_ID> --rate 98940=42.50

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use revenue_engine::coding::CodingRequest;
use revenue_engine::contracts::{ContractModelRequest, ContractRequest, ProposedRate};
use revenue_engine::fee_schedule::FeeAnalysisRequest;
use revenue_engine::forecast::{ForecastRequest, Scenario};
use revenue_engine::leakage::LeakageRequest;
use revenue_engine::service_mix::ServiceMixRequest;
use revenue_engine::{
    ActionOutcome, BenchmarkTables, EngineConfig, FeeReviewAction, InMemoryRevenueStore, LeakageType,
    RevenueDataset, RevenueError, RevenueOptimizationService,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "revenue")]
#[command(about = "Revenue leakage, fee schedule, coding, contract and forecast analysis")]
struct Args {
    /// JSON data export (charges, encounters, claims, payers, fee schedules, goals)
    #[arg(long, env = "REVENUE_DATA")]
    data: PathBuf,

    /// YAML engine configuration; defaults apply when absent
    #[arg(long, env = "REVENUE_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// YAML benchmark tables replacing the shipped reference data
    #[arg(long)]
    benchmarks: Option<PathBuf>,

    /// Organization to analyze
    #[arg(long, env = "REVENUE_ORG")]
    org: Uuid,

    /// Business date for default windows (YYYY-MM-DD); today when absent
    #[arg(long)]
    as_of: Option<NaiveDate>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect revenue leakage
    Leakage {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Restrict to categories, e.g. unbilled_service,missed_modifier
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
        #[arg(long)]
        provider: Option<Uuid>,
        #[arg(long)]
        payer: Option<Uuid>,
        #[arg(long)]
        min_amount: Option<Decimal>,
    },
    /// Analyze a fee schedule against benchmarks and reimbursement
    Fees {
        /// Fee schedule id; the organization default when absent
        #[arg(long)]
        schedule: Option<Uuid>,
        #[arg(long, value_delimiter = ',')]
        codes: Vec<String>,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long)]
        min_utilization: Option<u64>,
    },
    /// Analyze, approve every recommended change and write it to the fee schedule
    ImplementFees {
        #[arg(long)]
        schedule: Option<Uuid>,
        #[arg(long, value_delimiter = ',')]
        codes: Vec<String>,
        /// Reviewer recorded on the approval and the optimization action
        #[arg(long)]
        actor: Option<Uuid>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Service-line profitability and mix recommendations
    ServiceMix {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long)]
        provider: Option<Uuid>,
        #[arg(long)]
        min_volume: Option<u64>,
    },
    /// E&M distribution, modifier, bundling and documentation review
    Coding {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long)]
        provider: Option<Uuid>,
        #[arg(long)]
        min_volume: Option<u64>,
    },
    /// Payer contract scorecards
    Contracts {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long)]
        payer: Option<Uuid>,
        #[arg(long)]
        min_claims: Option<u64>,
    },
    /// Project the impact of proposed payer rates
    ModelContract {
        #[arg(long)]
        payer: Uuid,
        /// CODE=RATE, repeatable
        #[arg(long = "rate", value_parser = parse_rate)]
        rates: Vec<ProposedRate>,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Multi-scenario revenue forecast with goal variance
    Forecast {
        #[arg(long, default_value = "12")]
        horizon: u32,
        #[arg(long, default_value = "12")]
        lookback: u32,
        #[arg(long)]
        no_seasonality: bool,
        #[arg(long)]
        no_pipeline: bool,
        /// conservative, baseline, optimistic; all when empty
        #[arg(long, value_delimiter = ',')]
        scenarios: Vec<String>,
    },
    /// Run every analyzer and list open items ranked by priority and value
    OpenItems,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs)?;

    let service = build_service(&args)?;
    let org = args.org;

    match args.command {
        Command::Leakage {
            start,
            end,
            categories,
            provider,
            payer,
            min_amount,
        } => {
            let request = LeakageRequest {
                organization_id: org,
                start_date: start,
                end_date: end,
                categories: parse_labels::<LeakageType>(&categories)?,
                provider_id: provider,
                payer_id: payer,
                min_amount,
            };
            print_json(&service.detect_leakage(&request).await?)
        }
        Command::Fees {
            schedule,
            codes,
            start,
            end,
            min_utilization,
        } => {
            let request = FeeAnalysisRequest {
                organization_id: org,
                fee_schedule_id: schedule,
                codes,
                start_date: start,
                end_date: end,
                min_utilization,
            };
            print_json(&service.analyze_fee_schedule(&request).await?)
        }
        Command::ImplementFees {
            schedule,
            codes,
            actor,
            notes,
        } => {
            let request = FeeAnalysisRequest {
                organization_id: org,
                fee_schedule_id: schedule,
                codes,
                ..FeeAnalysisRequest::default()
            };
            let outcome = service.analyze_fee_schedule(&request).await?;
            let ids: Vec<Uuid> = outcome
                .report
                .analyses
                .iter()
                .filter(|a| a.recommends_change())
                .map(|a| a.id)
                .collect();
            if ids.is_empty() {
                bail!("No fee changes recommended for this schedule");
            }
            for id in &ids {
                let review = ActionOutcome {
                    actor,
                    notes: notes.clone(),
                    ..ActionOutcome::default()
                };
                service
                    .review_fee_analysis(org, *id, FeeReviewAction::Approve, review)
                    .await
                    .with_context(|| format!("Approving fee analysis {}", id))?;
            }
            let report = service.implement_fee_changes(org, &ids, actor).await?;
            if !report.is_complete() {
                warn!(failed = report.failed.len(), "Some fee changes were not applied");
            }
            print_json(&report)
        }
        Command::ServiceMix {
            start,
            end,
            provider,
            min_volume,
        } => {
            let request = ServiceMixRequest {
                organization_id: org,
                start_date: start,
                end_date: end,
                provider_id: provider,
                min_volume,
            };
            print_json(&service.analyze_service_mix(&request).await?)
        }
        Command::Coding {
            start,
            end,
            provider,
            min_volume,
        } => {
            let request = CodingRequest {
                organization_id: org,
                start_date: start,
                end_date: end,
                provider_id: provider,
                min_volume,
            };
            print_json(&service.analyze_coding(&request).await?)
        }
        Command::Contracts {
            start,
            end,
            payer,
            min_claims,
        } => {
            let request = ContractRequest {
                organization_id: org,
                start_date: start,
                end_date: end,
                payer_id: payer,
                min_claims,
            };
            print_json(&service.analyze_contracts(&request).await?)
        }
        Command::ModelContract { payer, rates, start, end } => {
            let request = ContractModelRequest {
                organization_id: org,
                payer_id: payer,
                start_date: start,
                end_date: end,
                changes: rates,
            };
            print_json(&service.model_contract_change(&request).await?)
        }
        Command::Forecast {
            horizon,
            lookback,
            no_seasonality,
            no_pipeline,
            scenarios,
        } => {
            let scenarios = match parse_labels::<Scenario>(&scenarios)? {
                s if s.is_empty() => Scenario::ALL.to_vec(),
                s => s,
            };
            let request = ForecastRequest {
                organization_id: org,
                horizon_months: horizon,
                lookback_months: lookback,
                include_seasonality: !no_seasonality,
                include_pipeline: !no_pipeline,
                scenarios,
            };
            print_json(&service.forecast(&request).await?)
        }
        Command::OpenItems => {
            run_all(&service, org).await?;
            print_json(&service.open_items(org).await?)
        }
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("revenue_engine=info,revenue_cli=info"))
        .context("Invalid log filter")?;

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(!json);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.with_target(false).json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.with_target(true))
            .init();
    }
    Ok(())
}

fn build_service(args: &Args) -> anyhow::Result<RevenueOptimizationService> {
    let dataset: RevenueDataset = read_json(&args.data)?;
    info!(
        charges = dataset.charges.len(),
        claims = dataset.claims.len(),
        encounters = dataset.encounters.len(),
        "Dataset loaded"
    );
    let config = EngineConfig::load(args.config.as_deref()).context("Loading engine configuration")?;
    let tables = match &args.benchmarks {
        Some(path) => read_yaml::<BenchmarkTables>(path)?,
        None => BenchmarkTables::standard(),
    };

    let store = Arc::new(InMemoryRevenueStore::from_dataset(dataset));
    let service = RevenueOptimizationService::new(store.clone(), store, Arc::new(config), Arc::new(tables));
    Ok(match args.as_of {
        Some(as_of) => service.with_as_of(as_of),
        None => service,
    })
}

/// Populate the ledger from every analyzer. A missing fee schedule only skips
/// the fee analysis.
async fn run_all(service: &RevenueOptimizationService, org: Uuid) -> anyhow::Result<()> {
    service
        .detect_leakage(&LeakageRequest {
            organization_id: org,
            ..LeakageRequest::default()
        })
        .await?;

    let fees = FeeAnalysisRequest {
        organization_id: org,
        ..FeeAnalysisRequest::default()
    };
    match service.analyze_fee_schedule(&fees).await {
        Ok(_) => {}
        Err(RevenueError::NotFound { .. }) => warn!("No default fee schedule, skipping fee analysis"),
        Err(e) => return Err(e.into()),
    }

    service
        .analyze_service_mix(&ServiceMixRequest {
            organization_id: org,
            ..ServiceMixRequest::default()
        })
        .await?;
    service
        .analyze_coding(&CodingRequest {
            organization_id: org,
            ..CodingRequest::default()
        })
        .await?;
    service
        .analyze_contracts(&ContractRequest {
            organization_id: org,
            ..ContractRequest::default()
        })
        .await?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Parsing {}", path.display()))
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("Parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse snake_case labels into an engine enum through its serde names.
fn parse_labels<T: DeserializeOwned>(labels: &[String]) -> anyhow::Result<Vec<T>> {
    labels
        .iter()
        .map(|label| {
            serde_json::from_value(serde_json::Value::String(label.trim().to_string()))
                .with_context(|| format!("Unknown value '{}'", label))
        })
        .collect()
}

fn parse_rate(raw: &str) -> Result<ProposedRate, String> {
    let (code, rate) = raw
        .split_once('=')
        .ok_or_else(|| format!("Expected CODE=RATE, got '{}'", raw))?;
    let rate: Decimal = rate
        .trim()
        .parse()
        .map_err(|e| format!("Invalid rate '{}': {}", rate, e))?;
    if rate < Decimal::ZERO {
        return Err(format!("Rate for {} must not be negative", code));
    }
    Ok(ProposedRate {
        code: code.trim().to_string(),
        rate,
    })
}
