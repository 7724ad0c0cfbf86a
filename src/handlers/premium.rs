use axum::{extract::State, Json};
use serde::Deserialize;
use validator::Validate;

use crate::app_state::AppState;
use crate::handlers::{settlement_error, validation_error, ApiResult};
use crate::models::ApiResponse;
use crate::services::pricing::PremiumQuote;

#[derive(Debug, Deserialize, Validate)]
pub struct QuoteRequest {
    #[validate(length(min = 1, max = 64))]
    pub policy_id: String,
    pub loan_amount: u64,
}

/// Quote the premium for a loan under an issued policy
pub async fn quote_premium(
    State(state): State<AppState>,
    Json(request): Json<QuoteRequest>,
) -> ApiResult<PremiumQuote> {
    if let Err(e) = request.validate() {
        return Err(validation_error(e));
    }
    if request.loan_amount == 0 {
        return Err(validation_error("loan_amount must be positive"));
    }

    state
        .orchestrator
        .quote_premium(&request.policy_id, request.loan_amount)
        .await
        .map(|quote| Json(ApiResponse::ok(quote)))
        .map_err(settlement_error)
}
