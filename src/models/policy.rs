//! Policy parameters fixed at loan origination

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::SettlementError;
use crate::models::report::Provider;

pub const DEFAULT_CONSENSUS_THRESHOLD: f64 = 2.0 / 3.0;

/// Auxiliary metric name for sustained wind speed readings.
pub const WIND_METRIC: &str = "wind_kmh";

/// Product-sheet defaults for the kind-specific triggers.
pub const DEFAULT_MAX_WIND_KMH: f64 = 65.0;
pub const DEFAULT_CROP_FLOOR_RATIO: f64 = 0.70;
pub const DEFAULT_BUSINESS_FLOOR_RATIO: f64 = 0.65;

const MAX_DEDUCTIBLE_BPS: u16 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsuranceKind {
    Weather,
    Crop,
    Business,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PremiumSchedule {
    Monthly,
    LumpSum,
}

/// Kind-specific trigger bounds. The variant is the policy's insurance kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Coverage {
    /// Triggers when rainfall leaves `[min_rain_mm, max_rain_mm]` or the
    /// median wind speed exceeds `max_wind_kmh`.
    Weather {
        min_rain_mm: f64,
        max_rain_mm: f64,
        #[serde(default)]
        max_wind_kmh: Option<f64>,
    },
    /// Triggers when the reported yield falls below `expected_yield * floor_ratio`.
    Crop {
        expected_yield: f64,
        #[serde(default = "default_crop_floor")]
        floor_ratio: f64,
    },
    /// Triggers when reported revenue falls below `expected_revenue * floor_ratio`.
    Business {
        expected_revenue: f64,
        #[serde(default = "default_business_floor")]
        floor_ratio: f64,
    },
}

fn default_crop_floor() -> f64 {
    DEFAULT_CROP_FLOOR_RATIO
}

fn default_business_floor() -> f64 {
    DEFAULT_BUSINESS_FLOOR_RATIO
}

fn default_consensus_threshold() -> f64 {
    DEFAULT_CONSENSUS_THRESHOLD
}

impl Coverage {
    pub fn kind(&self) -> InsuranceKind {
        match self {
            Coverage::Weather { .. } => InsuranceKind::Weather,
            Coverage::Crop { .. } => InsuranceKind::Crop,
            Coverage::Business { .. } => InsuranceKind::Business,
        }
    }

    /// Auxiliary metrics the trigger needs aggregated.
    pub fn referenced_metrics(&self) -> Vec<&'static str> {
        match self {
            Coverage::Weather {
                max_wind_kmh: Some(_),
                ..
            } => vec![WIND_METRIC],
            _ => Vec::new(),
        }
    }

    fn validate(&self) -> Result<(), SettlementError> {
        match *self {
            Coverage::Weather {
                min_rain_mm,
                max_rain_mm,
                max_wind_kmh,
            } => {
                if !(min_rain_mm.is_finite() && max_rain_mm.is_finite()) || min_rain_mm > max_rain_mm {
                    return Err(SettlementError::InvalidPolicy(format!(
                        "rainfall bounds [{min_rain_mm}, {max_rain_mm}] are not a valid range"
                    )));
                }
                if let Some(ceiling) = max_wind_kmh {
                    if !ceiling.is_finite() || ceiling < 0.0 {
                        return Err(SettlementError::InvalidPolicy(format!(
                            "wind ceiling {ceiling} must be a non-negative number"
                        )));
                    }
                }
                Ok(())
            }
            Coverage::Crop {
                expected_yield: baseline,
                floor_ratio,
            }
            | Coverage::Business {
                expected_revenue: baseline,
                floor_ratio,
            } => {
                if !baseline.is_finite() || baseline < 0.0 {
                    return Err(SettlementError::InvalidPolicy(format!(
                        "baseline {baseline} must be a non-negative number"
                    )));
                }
                if !(0.0..=1.0).contains(&floor_ratio) {
                    return Err(SettlementError::InvalidPolicy(format!(
                        "floor ratio {floor_ratio} must lie in [0, 1]"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Contractual parameters of one insurance-linked loan. Read-only after
/// issuance; a renewal supersedes it with a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,
    pub coverage: Coverage,
    /// Monetary ceiling on any payout, in base units.
    pub coverage_cap: u64,
    pub deductible_bps: u16,
    pub measurement_period_days: u16,
    pub premium_schedule: PremiumSchedule,
    /// Providers that must all report. Empty means any provider will do.
    #[serde(default)]
    pub required_providers: BTreeSet<Provider>,
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,
}

impl Policy {
    pub fn kind(&self) -> InsuranceKind {
        self.coverage.kind()
    }

    pub fn deductible_factor(&self) -> f64 {
        f64::from(self.deductible_bps) / f64::from(MAX_DEDUCTIBLE_BPS)
    }

    /// Providers to ask for reports: the required set, or every provider.
    pub fn providers_to_query(&self) -> BTreeSet<Provider> {
        if self.required_providers.is_empty() {
            Provider::ALL.into_iter().collect()
        } else {
            self.required_providers.clone()
        }
    }

    pub fn validate(&self) -> Result<(), SettlementError> {
        if self.policy_id.trim().is_empty() {
            return Err(SettlementError::InvalidPolicy("policy id is empty".to_string()));
        }
        if self.deductible_bps > MAX_DEDUCTIBLE_BPS {
            return Err(SettlementError::InvalidPolicy(format!(
                "deductible {} bps exceeds {MAX_DEDUCTIBLE_BPS}",
                self.deductible_bps
            )));
        }
        if self.measurement_period_days == 0 {
            return Err(SettlementError::InvalidPolicy(
                "measurement period must be at least one day".to_string(),
            ));
        }
        if !(self.consensus_threshold > 0.0 && self.consensus_threshold <= 1.0) {
            return Err(SettlementError::InvalidPolicy(format!(
                "consensus threshold {} must lie in (0, 1]",
                self.consensus_threshold
            )));
        }
        self.coverage.validate()
    }
}
