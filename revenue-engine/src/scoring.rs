//! Scoring conventions shared by every analyzer: annualization, priority
//! tiers, effort levels, confidence capping and zero-safe ratios.
//!
//! All analyzers score with these helpers so that their findings can be
//! merged and ranked together by the opportunity ledger.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How often a finding recurs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    OneTime,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

impl Frequency {
    /// Occurrences per year. Daily counts business days.
    pub fn annual_multiplier(self) -> Decimal {
        match self {
            Frequency::Daily => dec!(260),
            Frequency::Weekly => dec!(52),
            Frequency::Monthly => dec!(12),
            Frequency::Quarterly => dec!(4),
            Frequency::OneTime => Decimal::ONE,
        }
    }

    pub fn annualize(self, amount: Decimal) -> Decimal {
        amount * self.annual_multiplier()
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "one_time" | "onetime" | "once" => Some(Frequency::OneTime),
            "daily" => Some(Frequency::Daily),
            "weekly" => Some(Frequency::Weekly),
            "monthly" => Some(Frequency::Monthly),
            "quarterly" => Some(Frequency::Quarterly),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::OneTime => "one_time",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
        }
    }
}

/// Annualize an amount whose frequency arrives as free text.
/// Unrecognized labels are treated as monthly.
pub fn annualize_label(amount: Decimal, label: &str) -> Decimal {
    let multiplier = Frequency::parse(label)
        .map(Frequency::annual_multiplier)
        .unwrap_or(dec!(12));
    amount * multiplier
}

/// Ordered low to critical so that `Ord` ranks urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// One tier more urgent, saturating at critical.
    pub fn escalate(self) -> Self {
        match self {
            Priority::Low => Priority::Medium,
            Priority::Medium => Priority::High,
            Priority::High | Priority::Critical => Priority::Critical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive lower bounds for each tier above `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityThresholds {
    pub critical: Decimal,
    pub high: Decimal,
    pub medium: Decimal,
}

impl PriorityThresholds {
    /// Leakage findings, keyed on annualized impact.
    pub const LEAKAGE: Self = Self {
        critical: dec!(10000),
        high: dec!(5000),
        medium: dec!(1000),
    };

    /// Fee recommendations, keyed on projected annual impact.
    pub const FEE_SCHEDULE: Self = Self {
        critical: dec!(5000),
        high: dec!(2000),
        medium: dec!(500),
    };

    pub fn classify(&self, annual_impact: Decimal) -> Priority {
        if annual_impact >= self.critical {
            Priority::Critical
        } else if annual_impact >= self.high {
            Priority::High
        } else if annual_impact >= self.medium {
            Priority::Medium
        } else {
            Priority::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffortLevel {
    Easy,
    Moderate,
    Complex,
}

/// Regulatory exposure of acting on a coding recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceRisk {
    None,
    Low,
    Medium,
    High,
}

impl ComplianceRisk {
    /// Confidence assigned to a coding opportunity carrying this risk.
    pub fn confidence(self) -> u8 {
        match self {
            ComplianceRisk::None => 85,
            ComplianceRisk::Low => 75,
            ComplianceRisk::Medium | ComplianceRisk::High => 60,
        }
    }
}

pub const MAX_CONFIDENCE: u8 = 95;

/// Accumulates confidence points, never exceeding `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confidence {
    value: u8,
    cap: u8,
}

impl Confidence {
    pub fn new(base: u8, cap: u8) -> Self {
        Self {
            value: base.min(cap),
            cap,
        }
    }

    pub fn add(&mut self, points: u8) {
        self.value = self.value.saturating_add(points).min(self.cap);
    }

    pub fn subtract(&mut self, points: u8) {
        self.value = self.value.saturating_sub(points);
    }

    pub fn value(self) -> u8 {
        self.value
    }
}

/// `numerator / denominator`, or zero when the denominator is zero.
pub fn ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// `numerator / denominator * 100`, or zero when the denominator is zero.
pub fn percent(numerator: Decimal, denominator: Decimal) -> Decimal {
    ratio(numerator, denominator) * dec!(100)
}

/// Clamp to zero and round to cents.
pub fn money(amount: Decimal) -> Decimal {
    amount.max(Decimal::ZERO).round_dp(2)
}

/// Sort key placing higher priority first, then larger value first.
pub fn rank_key(priority: Priority, value: Decimal) -> (std::cmp::Reverse<Priority>, std::cmp::Reverse<Decimal>) {
    (std::cmp::Reverse(priority), std::cmp::Reverse(value))
}
