//! Data models for the settlement core

use serde::{Deserialize, Serialize};

pub mod decision;
pub mod policy;
pub mod report;
pub mod settlement;

pub use decision::{Decision, ReportSet};
pub use policy::{Coverage, InsuranceKind, Policy, PremiumSchedule};
pub use report::{Condition, MeasurementWindow, Provider, ProviderReport};
pub use settlement::{
    AttemptStatus, OutcomeStatus, PipelineStage, SettlementAttempt, SettlementKey,
    SettlementOutcome,
};

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
