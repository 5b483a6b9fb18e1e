//! Engine configuration
//!
//! Every practice- or region-specific constant used by the analyzers lives
//! here. Values come from `Default`, then an optional YAML document, then
//! `REVENUE_ENGINE_*` environment variables.

use crate::error::{RevenueError, RevenueResult};
use crate::models::EncounterType;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

const ENV_PREFIX: &str = "REVENUE_ENGINE_";

/// Estimated billable value of a completed visit with no charges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnbilledEstimates {
    pub initial_evaluation: Decimal,
    pub reevaluation: Decimal,
    pub follow_up: Decimal,
    pub treatment: Decimal,
    pub other: Decimal,
}

impl Default for UnbilledEstimates {
    fn default() -> Self {
        Self {
            initial_evaluation: dec!(150),
            reevaluation: dec!(100),
            follow_up: dec!(75),
            treatment: dec!(75),
            other: dec!(65),
        }
    }
}

impl UnbilledEstimates {
    pub fn for_type(&self, encounter_type: EncounterType) -> Decimal {
        match encounter_type {
            EncounterType::InitialEvaluation => self.initial_evaluation,
            EncounterType::Reevaluation => self.reevaluation,
            EncounterType::FollowUp => self.follow_up,
            EncounterType::Treatment => self.treatment,
            EncounterType::Other => self.other,
        }
    }
}

/// Share of an aged balance expected to still be collected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectibilityRates {
    pub days_60_89: Decimal,
    pub days_90_119: Decimal,
    pub days_120_plus: Decimal,
}

impl Default for CollectibilityRates {
    fn default() -> Self {
        Self {
            days_60_89: dec!(0.7),
            days_90_119: dec!(0.5),
            days_120_plus: dec!(0.3),
        }
    }
}

/// Growth-rate multipliers applied per forecast scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioMultipliers {
    pub conservative: Decimal,
    pub baseline: Decimal,
    pub optimistic: Decimal,
}

impl Default for ScenarioMultipliers {
    fn default() -> Self {
        Self {
            conservative: dec!(0.9),
            baseline: Decimal::ONE,
            optimistic: dec!(1.15),
        }
    }
}

/// Per-occurrence risk amounts for documentation findings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentationRisk {
    pub missing_note: Decimal,
    pub insufficient_diagnoses: Decimal,
    pub high_level_thin_documentation: Decimal,
    /// Notes shorter than this many characters count as thin
    pub thin_note_chars: usize,
}

impl Default for DocumentationRisk {
    fn default() -> Self {
        Self {
            missing_note: dec!(25),
            insufficient_diagnoses: dec!(15),
            high_level_thin_documentation: dec!(50),
            thin_note_chars: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // === Leakage detection ===
    pub leakage_window_days: i64,
    pub unbilled_estimates: UnbilledEstimates,
    /// Payer reduction applied when the separate-service modifier is absent
    pub modifier_reduction_rate: Decimal,
    pub average_supply_charge: Decimal,
    /// Pattern count that must be exceeded before unbilled supplies are reported
    pub supply_pattern_threshold: usize,
    pub write_off_ratio_threshold: Decimal,
    pub write_off_min_claims: usize,
    pub collection_bucket_floor: Decimal,
    pub collectibility: CollectibilityRates,

    // === Fee schedule ===
    pub fee_window_months: u32,
    pub regional_multiplier: Decimal,
    /// Share of volume whose revenue moves with the fee schedule
    pub cash_volume_share: Decimal,
    pub fee_confidence_base: u8,
    pub minimum_fee_change: Decimal,

    // === Service mix ===
    pub service_mix_window_months: u32,
    pub overhead_rate: Decimal,
    pub provider_capacity_hours_per_month: Decimal,
    /// Smallest annual value persisted as an opportunity
    pub opportunity_floor: Decimal,

    // === Coding ===
    pub coding_window_months: u32,
    /// Revenue per E&M level point per visit
    pub em_level_value: Decimal,
    /// Modifier usage below this percent counts as low
    pub low_modifier_usage_percent: Decimal,
    /// Share of single-unit timed visits assumed to support a second unit
    pub under_unit_capture_rate: Decimal,
    pub documentation_risk: DocumentationRisk,

    // === Contracts ===
    pub contract_window_months: u32,

    // === Forecasting ===
    pub pipeline_conversion_rate: Decimal,
    pub pipeline_horizon_days: i64,
    pub scenario_multipliers: ScenarioMultipliers,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            leakage_window_days: 90,
            unbilled_estimates: UnbilledEstimates::default(),
            modifier_reduction_rate: dec!(0.25),
            average_supply_charge: dec!(15),
            supply_pattern_threshold: 10,
            write_off_ratio_threshold: dec!(0.30),
            write_off_min_claims: 10,
            collection_bucket_floor: dec!(500),
            collectibility: CollectibilityRates::default(),
            fee_window_months: 12,
            regional_multiplier: Decimal::ONE,
            cash_volume_share: dec!(0.30),
            fee_confidence_base: 50,
            minimum_fee_change: dec!(5),
            service_mix_window_months: 12,
            overhead_rate: dec!(0.40),
            provider_capacity_hours_per_month: dec!(160),
            opportunity_floor: dec!(1000),
            coding_window_months: 6,
            em_level_value: dec!(35),
            low_modifier_usage_percent: dec!(75),
            under_unit_capture_rate: dec!(0.30),
            documentation_risk: DocumentationRisk::default(),
            contract_window_months: 12,
            pipeline_conversion_rate: dec!(0.85),
            pipeline_horizon_days: 90,
            scenario_multipliers: ScenarioMultipliers::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults, overlaid by an optional YAML file, overlaid by the environment.
    pub fn load(path: Option<&Path>) -> RevenueResult<Self> {
        let base = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    RevenueError::Config(format!("Cannot read {}: {}", path.display(), e))
                })?;
                Self::from_yaml_str(&raw)?
            }
            None => Self::default(),
        };
        let config = base.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> RevenueResult<Self> {
        serde_yaml::from_str(raw)
            .map_err(|e| RevenueError::Config(format!("Invalid engine configuration: {}", e)))
    }

    /// Create a configuration from defaults and environment variables
    pub fn from_env() -> RevenueResult<Self> {
        let config = Self::default().with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn with_env_overrides(mut self) -> RevenueResult<Self> {
        if let Some(v) = env_decimal("REGIONAL_MULTIPLIER")? {
            self.regional_multiplier = v;
        }
        if let Some(v) = env_decimal("CASH_VOLUME_SHARE")? {
            self.cash_volume_share = v;
        }
        if let Some(v) = env_decimal("OVERHEAD_RATE")? {
            self.overhead_rate = v;
        }
        if let Some(v) = env_decimal("PROVIDER_CAPACITY_HOURS")? {
            self.provider_capacity_hours_per_month = v;
        }
        if let Some(v) = env_decimal("AVERAGE_SUPPLY_CHARGE")? {
            self.average_supply_charge = v;
        }
        if let Some(v) = env_decimal("OPPORTUNITY_FLOOR")? {
            self.opportunity_floor = v;
        }
        if let Some(v) = env_decimal("PIPELINE_CONVERSION_RATE")? {
            self.pipeline_conversion_rate = v;
        }
        if let Some(v) = env_decimal("EM_LEVEL_VALUE")? {
            self.em_level_value = v;
        }
        Ok(self)
    }

    pub fn validate(&self) -> RevenueResult<()> {
        let unit_rates = [
            ("modifier_reduction_rate", self.modifier_reduction_rate),
            ("write_off_ratio_threshold", self.write_off_ratio_threshold),
            ("collectibility.days_60_89", self.collectibility.days_60_89),
            ("collectibility.days_90_119", self.collectibility.days_90_119),
            ("collectibility.days_120_plus", self.collectibility.days_120_plus),
            ("cash_volume_share", self.cash_volume_share),
            ("overhead_rate", self.overhead_rate),
            ("under_unit_capture_rate", self.under_unit_capture_rate),
            ("pipeline_conversion_rate", self.pipeline_conversion_rate),
        ];
        for (name, value) in unit_rates {
            if value < Decimal::ZERO || value > Decimal::ONE {
                return Err(RevenueError::Config(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }
        if self.regional_multiplier <= Decimal::ZERO {
            return Err(RevenueError::Config(
                "regional_multiplier must be positive".to_string(),
            ));
        }
        if self.provider_capacity_hours_per_month <= Decimal::ZERO {
            return Err(RevenueError::Config(
                "provider_capacity_hours_per_month must be positive".to_string(),
            ));
        }
        if self.leakage_window_days <= 0 || self.pipeline_horizon_days <= 0 {
            return Err(RevenueError::Config(
                "analysis windows must be at least one day".to_string(),
            ));
        }
        if self.fee_window_months == 0
            || self.service_mix_window_months == 0
            || self.coding_window_months == 0
            || self.contract_window_months == 0
        {
            return Err(RevenueError::Config(
                "default analysis windows must be at least one month".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_decimal(key: &str) -> RevenueResult<Option<Decimal>> {
    let name = format!("{}{}", ENV_PREFIX, key);
    match std::env::var(&name) {
        Ok(raw) => Decimal::from_str(raw.trim())
            .map(Some)
            .map_err(|e| RevenueError::Config(format!("{} is not a decimal: {}", name, e))),
        Err(_) => Ok(None),
    }
}
