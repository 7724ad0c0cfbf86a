//! Submission pipeline
//!
//! Drives one attempt through `Build -> Validate -> RateLimit -> Sign ->
//! Send -> Confirm`. Every network call runs under its own timeout. Send
//! failures are retried up to `max_send_retries`: the same signed payload is
//! resent while its freshness anchor is still valid, otherwise the attempt
//! goes back to Build for a fresh anchor.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::clients::rpc::{RpcClient, SendOptions, SubmissionHandle, SubmissionStatus};
use crate::clients::signer::KeyProvider;
use crate::error::{RpcError, SettlementError};
use crate::models::PipelineStage;
use crate::services::rate_limiter::SubmissionRateLimiter;
use crate::services::registry::AttemptHandle;
use crate::services::transaction::{
    FreshnessAnchor, SettlementInstruction, SignedTransaction, TransactionDraft,
    DEFAULT_COMPUTE_UNIT_LIMIT,
};

const RETRY_BASE_DELAY_MS: u64 = 250;
const RETRY_MAX_DELAY_MS: u64 = 4_000;
const RETRY_JITTER_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Settlement program the payout instruction targets.
    pub program_id: [u8; 32],
    pub compute_unit_limit: u32,
    pub max_send_retries: u32,
    pub skip_preflight: bool,
    /// Per-call budget for anchor fetch, send, and status polls.
    pub rpc_timeout: Duration,
    /// Upper bound on the Confirm wait, on top of anchor expiry.
    pub confirm_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            program_id: [0u8; 32],
            compute_unit_limit: DEFAULT_COMPUTE_UNIT_LIMIT,
            max_send_retries: 3,
            skip_preflight: false,
            rpc_timeout: Duration::from_secs(10),
            confirm_timeout: Duration::from_secs(90),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// A landed settlement transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub signature: String,
    pub status: SubmissionStatus,
}

pub struct SubmissionPipeline {
    rpc: Arc<dyn RpcClient>,
    signer: Arc<dyn KeyProvider>,
    limiter: Arc<SubmissionRateLimiter>,
    config: PipelineConfig,
}

impl SubmissionPipeline {
    pub fn new(
        rpc: Arc<dyn RpcClient>,
        signer: Arc<dyn KeyProvider>,
        limiter: Arc<SubmissionRateLimiter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            rpc,
            signer,
            limiter,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn send_options(&self) -> SendOptions {
        SendOptions {
            skip_preflight: self.config.skip_preflight,
            ..SendOptions::default()
        }
    }

    /// Run the attempt to confirmation. The caller owns the handle and
    /// settles its terminal stage from the result.
    pub async fn run(&self, handle: &AttemptHandle) -> Result<Confirmation, SettlementError> {
        let fee_payer = self.signer.public_key();
        let submitter = hex::encode(fee_payer);
        let mut retries: u32 = 0;

        'build: loop {
            let anchor = self.fetch_anchor().await?;
            handle.advance(PipelineStage::Built)?;
            let blockhash = anchor.blockhash.clone();
            handle.update(|attempt| attempt.last_blockhash = Some(blockhash));

            let attempt = handle.snapshot().ok_or_else(|| {
                SettlementError::Unknown(anyhow::anyhow!(
                    "attempt {} vanished from the registry",
                    handle.attempt_id()
                ))
            })?;
            let settle = SettlementInstruction::new(
                attempt.attempt_id,
                &attempt.policy_id,
                &attempt.decision,
                attempt.computed_amount,
            )
            .into_instruction(self.config.program_id);
            let draft = TransactionDraft::settlement(
                fee_payer,
                anchor.clone(),
                self.config.compute_unit_limit,
                settle,
            );

            draft.validate()?;
            handle.advance(PipelineStage::Validated)?;

            self.limiter
                .try_acquire(&submitter)
                .map_err(|retry_after| SettlementError::RateLimited { retry_after })?;
            handle.advance(PipelineStage::RateLimitApproved)?;

            let message = draft.message_bytes();
            let signature = match self.signer.sign(&message).await {
                Ok(signature) => signature,
                Err(err) => {
                    self.limiter.refund(&submitter);
                    return Err(err.into());
                }
            };
            let signed = SignedTransaction { message, signature };
            handle.advance(PipelineStage::Signed)?;

            loop {
                handle.advance(PipelineStage::Submitted)?;
                let local_signature = signed.signature_hex();
                handle.update(|attempt| attempt.signature = Some(local_signature));
                info!(
                    attempt_id = %handle.attempt_id(),
                    policy_id = %attempt.policy_id,
                    amount = attempt.computed_amount,
                    retry_count = retries,
                    "submitting settlement transaction"
                );

                let send_result = timeout(
                    self.config.rpc_timeout,
                    self.rpc.send(&signed, &self.send_options()),
                )
                .await
                .unwrap_or(Err(RpcError::Timeout("sendTransaction")));

                match send_result {
                    Ok(submission) => {
                        let node_signature = submission.signature.clone();
                        handle.update(|attempt| attempt.signature = Some(node_signature));
                        return self.confirm(handle, &submission, &anchor).await;
                    }
                    Err(err) => {
                        retries += 1;
                        handle.update(|attempt| attempt.retry_count = retries);
                        if retries > self.config.max_send_retries {
                            warn!(
                                attempt_id = %handle.attempt_id(),
                                error = %err,
                                retry_count = retries - 1,
                                "send retries exhausted"
                            );
                            return Err(err.into());
                        }

                        let rebuild = err == RpcError::AnchorExpired
                            || self.anchor_lapsed(&anchor).await == Some(true);
                        warn!(
                            attempt_id = %handle.attempt_id(),
                            error = %err,
                            retry_count = retries,
                            rebuild,
                            "send failed, retrying"
                        );
                        sleep(retry_delay(retries)).await;

                        if rebuild {
                            continue 'build;
                        }
                    }
                }
            }
        }
    }

    async fn fetch_anchor(&self) -> Result<FreshnessAnchor, SettlementError> {
        let anchor = timeout(self.config.rpc_timeout, self.rpc.latest_anchor())
            .await
            .unwrap_or(Err(RpcError::Timeout("getLatestBlockhash")))?;
        debug!(
            blockhash = %anchor.blockhash,
            last_valid_block_height = anchor.last_valid_block_height,
            "freshness anchor fetched"
        );
        Ok(anchor)
    }

    /// `Some(true)` once the chain is past the anchor's last valid height,
    /// `None` when the height could not be read.
    async fn anchor_lapsed(&self, anchor: &FreshnessAnchor) -> Option<bool> {
        match timeout(self.config.rpc_timeout, self.rpc.block_height()).await {
            Ok(Ok(height)) => Some(height > anchor.last_valid_block_height),
            Ok(Err(err)) => {
                debug!(error = %err, "block height unavailable");
                None
            }
            Err(_) => None,
        }
    }

    async fn poll(&self, submission: &SubmissionHandle) -> Option<SubmissionStatus> {
        match timeout(self.config.rpc_timeout, self.rpc.poll_status(submission)).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                debug!(signature = %submission.signature, error = %err, "status poll failed");
                None
            }
            Err(_) => {
                debug!(signature = %submission.signature, "status poll timed out");
                None
            }
        }
    }

    /// Poll until confirmed or better, rejected, or the anchor lapses.
    async fn confirm(
        &self,
        handle: &AttemptHandle,
        submission: &SubmissionHandle,
        anchor: &FreshnessAnchor,
    ) -> Result<Confirmation, SettlementError> {
        let deadline = Instant::now() + self.config.confirm_timeout;

        loop {
            match self.poll(submission).await {
                Some(status) if status.is_confirmed() => {
                    info!(
                        attempt_id = %handle.attempt_id(),
                        signature = %submission.signature,
                        ?status,
                        "settlement confirmed"
                    );
                    return Ok(Confirmation {
                        signature: submission.signature.clone(),
                        status,
                    });
                }
                Some(SubmissionStatus::Rejected { reason }) => {
                    return Err(SettlementError::TransactionRejected(reason));
                }
                _ => {}
            }

            let lapsed = self.anchor_lapsed(anchor).await == Some(true);
            if lapsed || Instant::now() >= deadline {
                // One last look: the transaction may have landed right at the edge.
                if let Some(status) = self.poll(submission).await.filter(|s| s.is_confirmed()) {
                    return Ok(Confirmation {
                        signature: submission.signature.clone(),
                        status,
                    });
                }
                let reason = if lapsed {
                    format!(
                        "anchor {} lapsed at height {} before confirmation",
                        anchor.blockhash, anchor.last_valid_block_height
                    )
                } else {
                    format!("no confirmation within {:?}", self.config.confirm_timeout)
                };
                return Err(SettlementError::Expired(reason));
            }

            sleep(self.config.poll_interval).await;
        }
    }
}

/// Exponential backoff with a little jitter.
fn retry_delay(retry: u32) -> Duration {
    let exp = RETRY_BASE_DELAY_MS.saturating_mul(1u64 << retry.min(6));
    let jitter = rand::thread_rng().gen_range(0..=RETRY_JITTER_MS);
    Duration::from_millis(exp.min(RETRY_MAX_DELAY_MS) + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_and_caps() {
        let first = retry_delay(1);
        assert!(first >= Duration::from_millis(500));
        assert!(first <= Duration::from_millis(600));

        let capped = retry_delay(20);
        assert!(capped >= Duration::from_millis(RETRY_MAX_DELAY_MS));
        assert!(capped <= Duration::from_millis(RETRY_MAX_DELAY_MS + RETRY_JITTER_MS));
    }

    #[test]
    fn default_config_matches_network_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.compute_unit_limit, 200_000);
        assert_eq!(config.max_send_retries, 3);
        assert!(!config.skip_preflight);
    }
}
