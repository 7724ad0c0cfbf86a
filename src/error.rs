//! Error taxonomy for the settlement core
//!
//! `SettlementError` is what callers of the orchestrator see. The boundary
//! errors below it belong to the external collaborators (oracle providers,
//! the RPC node, the signing key holder, the policy store) and are folded
//! into the taxonomy with `From` conversions.

use std::time::Duration;

use thiserror::Error;

use crate::models::report::Provider;

/// Errors surfaced by the settlement core.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// Not enough in-window reports, or a required provider is missing.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// The policy parameters are malformed.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    /// The submitter exceeded its sliding-window budget. Back off for at
    /// least `retry_after` before trying again.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Local validation or network simulation refused the transaction.
    #[error("transaction rejected: {0}")]
    TransactionRejected(String),

    #[error("signing declined: {0}")]
    SigningDeclined(String),

    /// A single oracle provider could not be reached. Absorbed by the
    /// normalizer unless it leaves the required provider set unsatisfied.
    #[error("provider {provider} unavailable: {reason}")]
    ProviderUnavailable { provider: Provider, reason: String },

    /// The freshness anchor lapsed, or a network stage timed out, before the
    /// submission landed.
    #[error("expired: {0}")]
    Expired(String),

    #[error("unknown failure: {0:#}")]
    Unknown(#[from] anyhow::Error),
}

impl SettlementError {
    /// Whether the caller may retry the same settlement after a delay or a
    /// fresh anchor. Validation failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettlementError::RateLimited { .. }
                | SettlementError::Expired(_)
                | SettlementError::ProviderUnavailable { .. }
        )
    }

    /// Stable machine-readable code for API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::InsufficientData(_) => "INSUFFICIENT_DATA",
            SettlementError::InvalidPolicy(_) => "INVALID_POLICY",
            SettlementError::PolicyNotFound(_) => "POLICY_NOT_FOUND",
            SettlementError::RateLimited { .. } => "RATE_LIMITED",
            SettlementError::TransactionRejected(_) => "TRANSACTION_REJECTED",
            SettlementError::SigningDeclined(_) => "SIGNING_DECLINED",
            SettlementError::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            SettlementError::Expired(_) => "EXPIRED",
            SettlementError::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Failures from the JSON-RPC node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    /// Preflight simulation refused the transaction.
    #[error("simulation rejected: {0}")]
    SimulationRejected(String),

    /// The node no longer recognises the blockhash the transaction was built on.
    #[error("freshness anchor expired")]
    AnchorExpired,

    #[error("node error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("malformed rpc response: {0}")]
    Malformed(String),
}

impl From<RpcError> for SettlementError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::SimulationRejected(reason) => SettlementError::TransactionRejected(reason),
            RpcError::AnchorExpired => {
                SettlementError::Expired("freshness anchor no longer valid".to_string())
            }
            RpcError::Timeout(operation) => SettlementError::Expired(format!("{operation} timed out")),
            other => SettlementError::Unknown(anyhow::Error::new(other)),
        }
    }
}

/// Failures from a single oracle provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("no endpoint configured")]
    NotConfigured,

    #[error("request failed: {0}")]
    Request(String),

    #[error("timed out")]
    Timeout,

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Failures from the key holder.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignError {
    #[error("declined: {0}")]
    Declined(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

impl From<SignError> for SettlementError {
    fn from(err: SignError) -> Self {
        match err {
            SignError::Declined(reason) => SettlementError::SigningDeclined(reason),
            SignError::InvalidKey(reason) => {
                SettlementError::Unknown(anyhow::anyhow!("invalid signing key: {reason}"))
            }
        }
    }
}

/// Failures from the policy store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("policy {0} not found")]
    NotFound(String),

    #[error("policy store backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for SettlementError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => SettlementError::PolicyNotFound(id),
            StoreError::Backend(reason) => {
                SettlementError::Unknown(anyhow::anyhow!("policy store: {reason}"))
            }
        }
    }
}
