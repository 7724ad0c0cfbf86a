//! API handlers for the settlement server

use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    Json,
};

use crate::error::SettlementError;
use crate::models::ApiResponse;

pub mod premium;
pub mod settlement;
pub mod ws;

pub use premium::quote_premium;
pub use settlement::{acknowledge_attempt, cancel_settlement, get_attempt, settle};
pub use ws::outcomes_ws;

/// Error half of every JSON handler: status, extra headers, envelope.
pub type ApiError<T> = (StatusCode, HeaderMap, Json<ApiResponse<T>>);

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError<T>>;

pub(crate) fn api_error<T>(status: StatusCode, message: impl Into<String>) -> ApiError<T> {
    (status, HeaderMap::new(), Json(ApiResponse::err(message)))
}

pub(crate) fn validation_error<T>(message: impl std::fmt::Display) -> ApiError<T> {
    api_error(StatusCode::BAD_REQUEST, format!("Validation error: {message}"))
}

pub(crate) fn settlement_error<T>(err: SettlementError) -> ApiError<T> {
    let status = match &err {
        SettlementError::InsufficientData(_) | SettlementError::InvalidPolicy(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        SettlementError::PolicyNotFound(_) => StatusCode::NOT_FOUND,
        SettlementError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        SettlementError::Expired(_) => StatusCode::CONFLICT,
        SettlementError::TransactionRejected(_) | SettlementError::SigningDeclined(_) => {
            StatusCode::BAD_GATEWAY
        }
        SettlementError::ProviderUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        SettlementError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut headers = HeaderMap::new();
    if let SettlementError::RateLimited { retry_after } = &err {
        // Round up so clients never retry early.
        let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        headers.insert(header::RETRY_AFTER, HeaderValue::from(seconds.max(1)));
    }

    (
        status,
        headers,
        Json(ApiResponse::err(format!("{}: {err}", err.code()))),
    )
}
