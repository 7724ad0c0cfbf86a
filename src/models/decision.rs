//! Normalized report sets and the consensus verdict derived from them

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::report::{MeasurementWindow, Provider, ProviderReport};

/// In-window reports, at most one per provider, ordered by provider.
///
/// Only the normalizer constructs a `ReportSet`, so holding one means the
/// window and de-duplication invariants already hold.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSet {
    window: MeasurementWindow,
    reports: Vec<ProviderReport>,
}

impl ReportSet {
    pub(crate) fn from_parts(window: MeasurementWindow, reports: Vec<ProviderReport>) -> Self {
        Self { window, reports }
    }

    pub fn window(&self) -> MeasurementWindow {
        self.window
    }

    pub fn reports(&self) -> &[ProviderReport] {
        &self.reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn providers(&self) -> BTreeSet<Provider> {
        self.reports.iter().map(|r| r.provider).collect()
    }
}

/// The engine's verdict for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub is_adverse: bool,
    /// Median of the report magnitudes.
    pub consensus_magnitude: f64,
    /// Fraction of reports voting adverse.
    pub agreement_ratio: f64,
    pub window: MeasurementWindow,
    pub contributing_providers: BTreeSet<Provider>,
    /// Per-metric medians, only for metrics the policy's trigger references.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aux_medians: BTreeMap<String, f64>,
}
