//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::services::orchestrator::SettlementOrchestrator;
use crate::services::outcome_sink::BroadcastSink;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SettlementOrchestrator>,
    pub outcomes: BroadcastSink,
}

impl AppState {
    pub fn new(orchestrator: Arc<SettlementOrchestrator>, outcomes: BroadcastSink) -> Self {
        Self {
            orchestrator,
            outcomes,
        }
    }
}

impl FromRef<AppState> for BroadcastSink {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.outcomes.clone()
    }
}

impl FromRef<AppState> for Arc<SettlementOrchestrator> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.orchestrator.clone()
    }
}
