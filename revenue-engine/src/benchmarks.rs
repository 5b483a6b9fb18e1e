//! Static reference data consumed by the analyzers.
//!
//! Tables are plain data: analyzers receive an `Arc<BenchmarkTables>` at
//! construction so tests can inject synthetic tables and benchmark data can
//! be versioned independently of code.

use crate::models::PayerCategory;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Reference reimbursement for a procedure code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeBenchmark {
    pub code: String,
    pub name: String,
    pub rate: Decimal,
}

/// Clinical service grouping used by the service-mix analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Manipulation,
    NewPatientVisit,
    EstablishedPatientVisit,
    ManualTherapy,
    TherapeuticExercise,
    NeuromuscularReeducation,
    AttendedModalities,
    UnattendedModalities,
    Evaluation,
    Imaging,
    Acupuncture,
    Supplies,
}

impl ServiceCategory {
    pub fn label(self) -> &'static str {
        match self {
            ServiceCategory::Manipulation => "Chiropractic manipulation",
            ServiceCategory::NewPatientVisit => "New patient E&M",
            ServiceCategory::EstablishedPatientVisit => "Established patient E&M",
            ServiceCategory::ManualTherapy => "Manual therapy",
            ServiceCategory::TherapeuticExercise => "Therapeutic exercise",
            ServiceCategory::NeuromuscularReeducation => "Neuromuscular re-education",
            ServiceCategory::AttendedModalities => "Attended modalities",
            ServiceCategory::UnattendedModalities => "Unattended modalities",
            ServiceCategory::Evaluation => "Therapy evaluation",
            ServiceCategory::Imaging => "Imaging",
            ServiceCategory::Acupuncture => "Acupuncture",
            ServiceCategory::Supplies => "Supplies",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDefinition {
    pub category: ServiceCategory,
    /// Provider minutes consumed per billed unit
    pub minutes_per_unit: Decimal,
    pub codes: BTreeSet<String>,
}

/// One E&M code family (new or established), ordered level 1 to 5
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmFamily {
    pub codes: Vec<String>,
    /// Expected share of visits at each level, in percent
    pub benchmark_distribution: Vec<Decimal>,
}

impl EmFamily {
    /// Level 1..=5 of `code` within this family.
    pub fn level_of(&self, code: &str) -> Option<u8> {
        self.codes
            .iter()
            .position(|c| c == code)
            .and_then(|idx| u8::try_from(idx + 1).ok())
    }

    pub fn code_for_level(&self, level: u8) -> Option<&str> {
        usize::from(level)
            .checked_sub(1)
            .and_then(|idx| self.codes.get(idx))
            .map(String::as_str)
    }

    pub fn next_tier(&self, code: &str) -> Option<&str> {
        self.level_of(code)
            .and_then(|level| self.code_for_level(level.saturating_add(1)))
            .filter(|next| *next != code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.level_of(code).is_some()
    }

    /// Weighted average level of the benchmark distribution.
    pub fn benchmark_average_level(&self) -> Decimal {
        weighted_level(self.benchmark_distribution.iter().copied())
    }
}

/// Weighted average level (1-based) of a per-level share sequence.
pub fn weighted_level(shares: impl Iterator<Item = Decimal>) -> Decimal {
    let mut weighted = Decimal::ZERO;
    let mut total = Decimal::ZERO;
    for (idx, share) in shares.enumerate() {
        weighted += Decimal::from(idx + 1) * share;
        total += share;
    }
    crate::scoring::ratio(weighted, total)
}

/// Code pair that risks denial when billed together without justification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundlingRule {
    pub primary_code: String,
    pub secondary_code: String,
    pub reason: String,
}

/// Modifier a payer category requires on specific codes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayerModifierRule {
    pub payer_category: PayerCategory,
    pub modifier: String,
    pub codes: BTreeSet<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierGuidance {
    /// Marks an E&M as separately identifiable from a same-day procedure
    pub separate_service: String,
    /// Modifiers that justify billing a bundled pair
    pub distinct_procedure: BTreeSet<String>,
    pub payer_rules: Vec<PayerModifierRule>,
}

/// Market reimbursement band relative to the benchmark rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBand {
    pub low: Decimal,
    pub high: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkTables {
    pub fee_benchmarks: BTreeMap<String, FeeBenchmark>,
    pub em_new: EmFamily,
    pub em_established: EmFamily,
    pub manipulation_codes: BTreeSet<String>,
    /// Procedures that normally consume billable supplies
    pub therapy_codes: BTreeSet<String>,
    pub supply_codes: BTreeSet<String>,
    /// Time-based codes that may be billed in multiple units
    pub timed_therapy_codes: BTreeSet<String>,
    pub categories: Vec<CategoryDefinition>,
    pub bundling_rules: Vec<BundlingRule>,
    pub modifiers: ModifierGuidance,
    /// Expected paid-to-benchmark ratio per payer category
    pub payer_market_ratios: BTreeMap<PayerCategory, Decimal>,
    pub market_band: MarketBand,
}

impl BenchmarkTables {
    pub fn benchmark(&self, code: &str) -> Option<&FeeBenchmark> {
        self.fee_benchmarks.get(code)
    }

    pub fn benchmark_rate(&self, code: &str) -> Option<Decimal> {
        self.benchmark(code).map(|b| b.rate)
    }

    pub fn is_em(&self, code: &str) -> bool {
        self.em_new.contains(code) || self.em_established.contains(code)
    }

    /// The E&M family a code belongs to.
    pub fn em_family(&self, code: &str) -> Option<&EmFamily> {
        if self.em_new.contains(code) {
            Some(&self.em_new)
        } else if self.em_established.contains(code) {
            Some(&self.em_established)
        } else {
            None
        }
    }

    pub fn em_level(&self, code: &str) -> Option<u8> {
        self.em_family(code).and_then(|family| family.level_of(code))
    }

    pub fn is_manipulation(&self, code: &str) -> bool {
        self.manipulation_codes.contains(code)
    }

    pub fn category_of(&self, code: &str) -> Option<&CategoryDefinition> {
        self.categories.iter().find(|def| def.codes.contains(code))
    }

    pub fn minutes_for(&self, code: &str) -> Decimal {
        self.category_of(code)
            .map(|def| def.minutes_per_unit)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn market_ratio(&self, category: PayerCategory) -> Decimal {
        self.payer_market_ratios
            .get(&category)
            .copied()
            .unwrap_or(Decimal::ONE)
    }

    /// Reference tables for a chiropractic / physical-medicine practice.
    pub fn standard() -> Self {
        let fee_benchmarks = [
            ("98940", "Chiropractic manipulative treatment, 1-2 regions", dec!(28.50)),
            ("98941", "Chiropractic manipulative treatment, 3-4 regions", dec!(41.00)),
            ("98942", "Chiropractic manipulative treatment, 5 regions", dec!(55.00)),
            ("98943", "Extraspinal manipulative treatment", dec!(26.00)),
            ("99201", "New patient visit, level 1", dec!(45.00)),
            ("99202", "New patient visit, level 2", dec!(75.00)),
            ("99203", "New patient visit, level 3", dec!(110.00)),
            ("99204", "New patient visit, level 4", dec!(165.00)),
            ("99205", "New patient visit, level 5", dec!(215.00)),
            ("99211", "Established patient visit, level 1", dec!(25.00)),
            ("99212", "Established patient visit, level 2", dec!(55.00)),
            ("99213", "Established patient visit, level 3", dec!(90.00)),
            ("99214", "Established patient visit, level 4", dec!(128.00)),
            ("99215", "Established patient visit, level 5", dec!(180.00)),
            ("97110", "Therapeutic exercise, each 15 minutes", dec!(31.00)),
            ("97112", "Neuromuscular re-education, each 15 minutes", dec!(35.00)),
            ("97140", "Manual therapy techniques, each 15 minutes", dec!(29.00)),
            ("97530", "Therapeutic activities, each 15 minutes", dec!(36.00)),
            ("97032", "Electrical stimulation, attended", dec!(19.00)),
            ("97035", "Ultrasound therapy", dec!(15.00)),
            ("97010", "Hot or cold packs", dec!(5.00)),
            ("97014", "Electrical stimulation, unattended", dec!(12.00)),
            ("G0283", "Electrical stimulation, unattended, other than wound care", dec!(12.00)),
            ("97161", "Physical therapy evaluation, low complexity", dec!(100.00)),
            ("97162", "Physical therapy evaluation, moderate complexity", dec!(100.00)),
            ("97163", "Physical therapy evaluation, high complexity", dec!(100.00)),
            ("72040", "X-ray cervical spine, 2-3 views", dec!(32.00)),
            ("72100", "X-ray lumbosacral spine, 2-3 views", dec!(35.00)),
            ("97810", "Acupuncture, initial 15 minutes", dec!(28.00)),
            ("97811", "Acupuncture, each additional 15 minutes", dec!(21.00)),
            ("99070", "Supplies and materials", dec!(12.00)),
            ("A4556", "Electrodes, per pair", dec!(14.00)),
        ]
        .into_iter()
        .map(|(code, name, rate)| {
            (
                code.to_string(),
                FeeBenchmark {
                    code: code.to_string(),
                    name: name.to_string(),
                    rate,
                },
            )
        })
        .collect();

        let em_new = EmFamily {
            codes: ordered(&["99201", "99202", "99203", "99204", "99205"]),
            benchmark_distribution: vec![dec!(5), dec!(25), dec!(45), dec!(20), dec!(5)],
        };
        let em_established = EmFamily {
            codes: ordered(&["99211", "99212", "99213", "99214", "99215"]),
            benchmark_distribution: vec![dec!(5), dec!(30), dec!(45), dec!(17), dec!(3)],
        };

        let categories = vec![
            category(ServiceCategory::Manipulation, dec!(15), &["98940", "98941", "98942", "98943"]),
            category(
                ServiceCategory::NewPatientVisit,
                dec!(45),
                &["99201", "99202", "99203", "99204", "99205"],
            ),
            category(
                ServiceCategory::EstablishedPatientVisit,
                dec!(20),
                &["99211", "99212", "99213", "99214", "99215"],
            ),
            category(ServiceCategory::ManualTherapy, dec!(15), &["97140"]),
            category(ServiceCategory::TherapeuticExercise, dec!(15), &["97110", "97530"]),
            category(ServiceCategory::NeuromuscularReeducation, dec!(15), &["97112"]),
            category(ServiceCategory::AttendedModalities, dec!(15), &["97032", "97035"]),
            category(ServiceCategory::UnattendedModalities, dec!(10), &["97010", "97014", "G0283"]),
            category(ServiceCategory::Evaluation, dec!(45), &["97161", "97162", "97163"]),
            category(ServiceCategory::Imaging, dec!(20), &["72040", "72100"]),
            category(ServiceCategory::Acupuncture, dec!(15), &["97810", "97811"]),
            category(ServiceCategory::Supplies, dec!(2), &["99070", "A4556"]),
        ];

        let bundling_rules = vec![
            bundling("98940", "97140", "Manual therapy on the same region as spinal manipulation"),
            bundling("98941", "97140", "Manual therapy on the same region as spinal manipulation"),
            bundling("98942", "97140", "Manual therapy on the same region as spinal manipulation"),
            bundling("97530", "97112", "Therapeutic activities and neuromuscular re-education in the same interval"),
            bundling("97032", "97014", "Attended and unattended electrical stimulation in one session"),
        ];

        let modifiers = ModifierGuidance {
            separate_service: "25".to_string(),
            distinct_procedure: codes(&["59", "XS", "XU"]),
            payer_rules: vec![PayerModifierRule {
                payer_category: PayerCategory::Medicare,
                modifier: "AT".to_string(),
                codes: codes(&["98940", "98941", "98942"]),
                reason: "Active treatment modifier is required for Medicare manipulation claims".to_string(),
            }],
        };

        let payer_market_ratios = [
            (PayerCategory::Commercial, dec!(1.25)),
            (PayerCategory::Medicare, dec!(1.00)),
            (PayerCategory::Medicaid, dec!(0.75)),
            (PayerCategory::WorkersCompensation, dec!(1.40)),
            (PayerCategory::PersonalInjury, dec!(1.60)),
            (PayerCategory::SelfPay, dec!(1.10)),
            (PayerCategory::Other, dec!(1.00)),
        ]
        .into_iter()
        .collect();

        Self {
            fee_benchmarks,
            em_new,
            em_established,
            manipulation_codes: codes(&["98940", "98941", "98942"]),
            therapy_codes: codes(&["97032", "97014", "G0283", "97035", "97140", "97110", "97112"]),
            supply_codes: codes(&["99070", "A4556"]),
            timed_therapy_codes: codes(&["97110", "97112", "97140", "97530"]),
            categories,
            bundling_rules,
            modifiers,
            payer_market_ratios,
            market_band: MarketBand {
                low: dec!(0.85),
                high: dec!(1.15),
            },
        }
    }
}

impl Default for BenchmarkTables {
    fn default() -> Self {
        Self::standard()
    }
}

fn codes(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|c| (*c).to_string()).collect()
}

fn ordered(list: &[&str]) -> Vec<String> {
    list.iter().map(|c| (*c).to_string()).collect()
}

fn category(category: ServiceCategory, minutes_per_unit: Decimal, list: &[&str]) -> CategoryDefinition {
    CategoryDefinition {
        category,
        minutes_per_unit,
        codes: codes(list),
    }
}

fn bundling(primary: &str, secondary: &str, reason: &str) -> BundlingRule {
    BundlingRule {
        primary_code: primary.to_string(),
        secondary_code: secondary.to_string(),
        reason: reason.to_string(),
    }
}
