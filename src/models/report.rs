//! Oracle report data model

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of oracle networks the engine accepts reports from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Pyth,
    Switchboard,
    Chainlink,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Pyth, Provider::Switchboard, Provider::Chainlink];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Pyth => "pyth",
            Provider::Switchboard => "switchboard",
            Provider::Chainlink => "chainlink",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider's verdict on the insured condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Normal,
    Adverse,
}

/// One provider's reading for a measurement window. Never mutated after
/// it leaves the oracle feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderReport {
    pub provider: Provider,
    pub observed_at: DateTime<Utc>,
    pub condition: Condition,
    /// Primary reading, e.g. rainfall in mm.
    pub magnitude: f64,
    /// Secondary readings keyed by metric name, e.g. `wind_kmh`.
    #[serde(default)]
    pub aux_metrics: BTreeMap<String, f64>,
}

impl ProviderReport {
    pub fn new(
        provider: Provider,
        observed_at: DateTime<Utc>,
        condition: Condition,
        magnitude: f64,
    ) -> Self {
        Self {
            provider,
            observed_at,
            condition,
            magnitude,
            aux_metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.aux_metrics.insert(name.into(), value);
        self
    }

    /// Magnitudes must be finite and non-negative.
    pub fn is_well_formed(&self) -> bool {
        self.magnitude.is_finite() && self.magnitude >= 0.0
    }
}

/// Inclusive time range a policy is evaluated over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeasurementWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MeasurementWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

impl fmt::Display for MeasurementWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}
