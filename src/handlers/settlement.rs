use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::app_state::AppState;
use crate::handlers::{api_error, settlement_error, validation_error, ApiResult};
use crate::models::{ApiResponse, MeasurementWindow, SettlementAttempt, SettlementOutcome};
use crate::services::registry::AcknowledgeError;

/// Body for settle and cancel.
#[derive(Debug, Deserialize, Validate)]
pub struct SettlementRequest {
    #[validate(length(min = 1, max = 64))]
    pub policy_id: String,
    pub window: MeasurementWindow,
}

impl SettlementRequest {
    fn check(&self) -> Result<(), String> {
        self.validate().map_err(|e| e.to_string())?;
        if self.window.start > self.window.end {
            return Err("window start must not be after window end".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub policy_id: String,
    pub cancelled: bool,
}

/// Evaluate a policy for a window and settle it if it triggers
pub async fn settle(
    State(state): State<AppState>,
    Json(request): Json<SettlementRequest>,
) -> ApiResult<SettlementOutcome> {
    if let Err(e) = request.check() {
        return Err(validation_error(e));
    }

    state
        .orchestrator
        .settle(&request.policy_id, request.window)
        .await
        .map(|outcome| Json(ApiResponse::ok(outcome)))
        .map_err(settlement_error)
}

pub async fn get_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
) -> ApiResult<SettlementAttempt> {
    match state.orchestrator.attempt(attempt_id) {
        Some(attempt) => Ok(Json(ApiResponse::ok(attempt))),
        None => Err(api_error(StatusCode::NOT_FOUND, "Attempt not found")),
    }
}

/// Archive a terminal attempt
pub async fn acknowledge_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
) -> ApiResult<SettlementAttempt> {
    match state.orchestrator.acknowledge(attempt_id) {
        Ok(attempt) => Ok(Json(ApiResponse::ok(attempt))),
        Err(err @ AcknowledgeError::NotFound(_)) => {
            Err(api_error(StatusCode::NOT_FOUND, err.to_string()))
        }
        Err(err @ AcknowledgeError::NotTerminal(..)) => {
            Err(api_error(StatusCode::CONFLICT, err.to_string()))
        }
    }
}

/// Cancel an in-flight settlement; the attempt ends as expired
pub async fn cancel_settlement(
    State(state): State<AppState>,
    Json(request): Json<SettlementRequest>,
) -> ApiResult<CancelResponse> {
    if let Err(e) = request.check() {
        return Err(validation_error(e));
    }

    if state.orchestrator.cancel(&request.policy_id, request.window) {
        Ok(Json(ApiResponse::ok(CancelResponse {
            policy_id: request.policy_id,
            cancelled: true,
        })))
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            "No in-flight settlement for this policy and window",
        ))
    }
}
