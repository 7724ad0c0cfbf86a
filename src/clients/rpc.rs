//! Network node boundary and its JSON-RPC implementation

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::RpcError;
use crate::services::transaction::{FreshnessAnchor, SignedTransaction};

const BLOCKHASH_NOT_FOUND: &str = "blockhash not found";
const BLOCK_HEIGHT_EXCEEDED: &str = "block height exceeded";
const PREFLIGHT_FAILURE_CODE: i64 = -32002;

/// Options forwarded with every send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    pub skip_preflight: bool,
    pub preflight_commitment: String,
    /// Node-side rebroadcast count. `None` leaves it to the node; the
    /// pipeline keeps its own retry bound either way.
    pub max_retries: Option<u32>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            skip_preflight: false,
            preflight_commitment: "confirmed".to_string(),
            max_retries: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionHandle {
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SubmissionStatus {
    Pending,
    Confirmed,
    Finalized,
    Rejected { reason: String },
}

impl SubmissionStatus {
    /// Confirmed or better durability.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, SubmissionStatus::Confirmed | SubmissionStatus::Finalized)
    }
}

#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn latest_anchor(&self) -> Result<FreshnessAnchor, RpcError>;

    async fn block_height(&self) -> Result<u64, RpcError>;

    async fn send(
        &self,
        transaction: &SignedTransaction,
        options: &SendOptions,
    ) -> Result<SubmissionHandle, RpcError>;

    async fn poll_status(&self, handle: &SubmissionHandle) -> Result<SubmissionStatus, RpcError>;
}

/// JSON-RPC client against a Solana-compatible node.
pub struct HttpRpcClient {
    http: reqwest::Client,
    rpc_url: String,
}

impl HttpRpcClient {
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            rpc_url: rpc_url.into(),
        })
    }

    async fn rpc_call(&self, method: &'static str, params: Value) -> Result<Value, RpcError> {
        let response = self
            .http
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": "seedflow-settlement",
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|err| classify_transport(method, err))?
            .error_for_status()
            .map_err(|err| classify_transport(method, err))?
            .json::<Value>()
            .await
            .map_err(|err| RpcError::Malformed(format!("{method}: {err}")))?;

        if let Some(error) = response.get("error") {
            return Err(classify_node_error(error));
        }
        Ok(response)
    }
}

fn classify_transport(method: &'static str, err: reqwest::Error) -> RpcError {
    if err.is_timeout() {
        RpcError::Timeout(method)
    } else {
        RpcError::Transport(format!("{method}: {err}"))
    }
}

/// Map a JSON-RPC error object onto the boundary taxonomy.
pub(crate) fn classify_node_error(error: &Value) -> RpcError {
    let code = error.pointer("/code").and_then(|v| v.as_i64()).unwrap_or_default();
    let message = error
        .pointer("/message")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown node error")
        .to_string();

    let lowered = message.to_ascii_lowercase();
    let data_err = error
        .pointer("/data/err")
        .map(|v| v.to_string().to_ascii_lowercase())
        .unwrap_or_default();

    if lowered.contains(BLOCKHASH_NOT_FOUND)
        || lowered.contains(BLOCK_HEIGHT_EXCEEDED)
        || data_err.contains("blockhashnotfound")
    {
        RpcError::AnchorExpired
    } else if code == PREFLIGHT_FAILURE_CODE {
        RpcError::SimulationRejected(message)
    } else {
        RpcError::Node { code, message }
    }
}

/// Interpret one entry of a `getSignatureStatuses` result.
pub(crate) fn parse_signature_status(entry: &Value) -> SubmissionStatus {
    if entry.is_null() {
        return SubmissionStatus::Pending;
    }
    if let Some(err) = entry.get("err").filter(|err| !err.is_null()) {
        return SubmissionStatus::Rejected {
            reason: err.to_string(),
        };
    }
    match entry.pointer("/confirmationStatus").and_then(|v| v.as_str()) {
        Some("finalized") => SubmissionStatus::Finalized,
        Some("confirmed") => SubmissionStatus::Confirmed,
        _ => SubmissionStatus::Pending,
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn latest_anchor(&self) -> Result<FreshnessAnchor, RpcError> {
        let response = self
            .rpc_call("getLatestBlockhash", json!([{ "commitment": "confirmed" }]))
            .await?;

        let blockhash = response
            .pointer("/result/value/blockhash")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RpcError::Malformed("missing blockhash".to_string()))?
            .to_string();
        let last_valid_block_height = response
            .pointer("/result/value/lastValidBlockHeight")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RpcError::Malformed("missing lastValidBlockHeight".to_string()))?;

        Ok(FreshnessAnchor {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn block_height(&self) -> Result<u64, RpcError> {
        let response = self
            .rpc_call("getBlockHeight", json!([{ "commitment": "confirmed" }]))
            .await?;

        response
            .pointer("/result")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RpcError::Malformed("missing block height".to_string()))
    }

    async fn send(
        &self,
        transaction: &SignedTransaction,
        options: &SendOptions,
    ) -> Result<SubmissionHandle, RpcError> {
        let mut config = json!({
            "encoding": "base64",
            "skipPreflight": options.skip_preflight,
            "preflightCommitment": options.preflight_commitment,
        });
        if let Some(max_retries) = options.max_retries {
            config["maxRetries"] = json!(max_retries);
        }

        let response = self
            .rpc_call("sendTransaction", json!([transaction.to_base64(), config]))
            .await?;

        let signature = response
            .pointer("/result")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| transaction.signature_hex());
        debug!(%signature, "transaction accepted by node");

        Ok(SubmissionHandle { signature })
    }

    async fn poll_status(&self, handle: &SubmissionHandle) -> Result<SubmissionStatus, RpcError> {
        let response = self
            .rpc_call(
                "getSignatureStatuses",
                json!([[handle.signature], { "searchTransactionHistory": true }]),
            )
            .await?;

        let entry = response
            .pointer("/result/value/0")
            .ok_or_else(|| RpcError::Malformed("missing signature status".to_string()))?;
        Ok(parse_signature_status(entry))
    }
}
