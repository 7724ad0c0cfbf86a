//! Settlement orchestrator
//!
//! Composes fetch, normalize, decide, price and submit into `settle`, and
//! owns the per-`(policy, window)` duplicate-payout guard through the
//! attempt registry.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clients::oracle::{OracleFeed, ProviderFailure};
use crate::clients::policy_store::PolicyStore;
use crate::clients::rpc::RpcClient;
use crate::clients::signer::KeyProvider;
use crate::error::SettlementError;
use crate::models::{
    AttemptStatus, Decision, MeasurementWindow, PipelineStage, Policy, SettlementAttempt,
    SettlementKey, SettlementOutcome,
};
use crate::services::consensus::decide_with_metrics;
use crate::services::normalizer::normalize;
use crate::services::outcome_sink::OutcomeSink;
use crate::services::pipeline::{PipelineConfig, SubmissionPipeline};
use crate::services::pricing::{compute_payout, quote_premium, Payout, PremiumQuote, PricingConfig};
use crate::services::rate_limiter::{RateLimitConfig, SubmissionRateLimiter};
use crate::services::registry::{AcknowledgeError, AttemptRegistry, Claim};

/// Collaborators and tunables threaded into the orchestrator at construction.
pub struct SettlementContext {
    pub oracle: Arc<dyn OracleFeed>,
    pub rpc: Arc<dyn RpcClient>,
    pub signer: Arc<dyn KeyProvider>,
    pub policies: Arc<dyn PolicyStore>,
    pub sink: Arc<dyn OutcomeSink>,
    pub pipeline: PipelineConfig,
    pub rate_limit: RateLimitConfig,
    pub pricing: PricingConfig,
}

/// Everything `settle` derives before deciding whether to submit.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub policy: Policy,
    pub decision: Decision,
    pub payout: Payout,
    pub unavailable: Vec<ProviderFailure>,
}

pub struct SettlementOrchestrator {
    oracle: Arc<dyn OracleFeed>,
    policies: Arc<dyn PolicyStore>,
    sink: Arc<dyn OutcomeSink>,
    pipeline: SubmissionPipeline,
    registry: Arc<AttemptRegistry>,
    pricing: PricingConfig,
}

impl SettlementOrchestrator {
    pub fn new(context: SettlementContext) -> Self {
        let limiter = Arc::new(SubmissionRateLimiter::new(context.rate_limit));
        Self {
            oracle: context.oracle,
            policies: context.policies,
            sink: context.sink,
            pipeline: SubmissionPipeline::new(context.rpc, context.signer, limiter, context.pipeline),
            registry: Arc::new(AttemptRegistry::new()),
            pricing: context.pricing,
        }
    }

    pub fn registry(&self) -> &Arc<AttemptRegistry> {
        &self.registry
    }

    async fn load_policy(&self, policy_id: &str) -> Result<Policy, SettlementError> {
        let policy = self.policies.get_policy(policy_id).await?;
        policy.validate()?;
        Ok(policy)
    }

    /// Fetch, normalize, decide and price. No side effects beyond the reads.
    pub async fn evaluate(
        &self,
        policy_id: &str,
        window: MeasurementWindow,
    ) -> Result<Evaluation, SettlementError> {
        let policy = self.load_policy(policy_id).await?;

        let fetch = self
            .oracle
            .fetch_reports(&policy.providers_to_query(), window)
            .await;
        for failure in &fetch.unavailable {
            warn!(
                policy_id,
                provider = %failure.provider,
                error = %failure.error,
                "oracle provider unavailable"
            );
        }

        let report_set = normalize(fetch.reports, window, &policy.required_providers)?;
        let metrics = policy.coverage.referenced_metrics();
        let decision = decide_with_metrics(&report_set, policy.consensus_threshold, &metrics);

        let principal = self.policies.outstanding_principal(policy_id).await?;
        let payout = compute_payout(&decision, &policy, principal);
        info!(
            policy_id,
            reports = report_set.len(),
            is_adverse = decision.is_adverse,
            magnitude = decision.consensus_magnitude,
            agreement = decision.agreement_ratio,
            amount = payout.amount(),
            "policy evaluated"
        );

        Ok(Evaluation {
            policy,
            decision,
            payout,
            unavailable: fetch.unavailable,
        })
    }

    /// Evaluate the policy for `window` and, if it triggers, drive a payout
    /// to a terminal status.
    ///
    /// Errors before any submission (bad data, bad policy, rate limit, local
    /// validation) are returned as `Err` and leave no attempt behind. Once a
    /// transaction has been sent, the result is always an outcome carrying
    /// the attempt's terminal status.
    pub async fn settle(
        &self,
        policy_id: &str,
        window: MeasurementWindow,
    ) -> Result<SettlementOutcome, SettlementError> {
        let key = SettlementKey::new(policy_id, window);

        if let Some(existing) = self.registry.find(&key) {
            if owns_key(&existing) {
                info!(key = %key, attempt_id = %existing.attempt_id, status = ?existing.status(), "settlement already in progress");
                return Ok(SettlementOutcome::from_attempt(&existing));
            }
        }

        let evaluation = self.evaluate(policy_id, window).await?;
        let amount = evaluation.payout.amount();
        if amount == 0 {
            let outcome = SettlementOutcome::no_action(policy_id, evaluation.decision);
            self.publish(&outcome).await;
            return Ok(outcome);
        }

        let handle = match self.registry.claim(key.clone(), evaluation.decision, amount) {
            Claim::Existing(existing) => {
                info!(key = %key, attempt_id = %existing.attempt_id, "concurrent settlement owns key");
                return Ok(SettlementOutcome::from_attempt(&existing));
            }
            Claim::Started(handle) => handle,
        };
        info!(key = %key, attempt_id = %handle.attempt_id(), amount, "settlement attempt started");

        let signal = handle.cancel_signal();
        let result = tokio::select! {
            result = self.pipeline.run(&handle) => Some(result),
            _ = signal.cancelled() => None,
        };

        let attempt = match result {
            Some(Ok(confirmation)) => {
                info!(key = %key, signature = %confirmation.signature, "settlement confirmed");
                handle.finish(PipelineStage::Confirmed, None)?
            }
            None => {
                warn!(key = %key, attempt_id = %handle.attempt_id(), "settlement cancelled");
                handle.finish(PipelineStage::Expired, Some("settlement cancelled".to_string()))?
            }
            Some(Err(err)) => {
                let sent = handle
                    .snapshot()
                    .map(|attempt| attempt.signature.is_some())
                    .unwrap_or(false);
                if !sent {
                    warn!(key = %key, code = err.code(), error = %err, "settlement aborted before submission");
                    handle.release();
                    return Err(err);
                }
                let stage = match err {
                    SettlementError::Expired(_) | SettlementError::RateLimited { .. } => {
                        PipelineStage::Expired
                    }
                    _ => PipelineStage::Failed,
                };
                error!(key = %key, code = err.code(), error = %err, ?stage, "settlement attempt ended");
                handle.finish(stage, Some(err.to_string()))?
            }
        };

        let outcome = SettlementOutcome::from_attempt(&attempt);
        self.publish(&outcome).await;
        Ok(outcome)
    }

    /// Seed the duplicate-payout guard from outcomes published by an earlier
    /// process. Call before serving requests.
    pub fn restore(&self, outcomes: &[SettlementOutcome]) -> usize {
        let restored = self.registry.restore(outcomes);
        info!(restored, replayed = outcomes.len(), "settlement history restored");
        restored
    }

    /// Cancel the in-flight settlement for `(policy_id, window)`.
    pub fn cancel(&self, policy_id: &str, window: MeasurementWindow) -> bool {
        self.registry.cancel(&SettlementKey::new(policy_id, window))
    }

    pub fn attempt(&self, attempt_id: Uuid) -> Option<SettlementAttempt> {
        self.registry.get(attempt_id)
    }

    pub fn acknowledge(&self, attempt_id: Uuid) -> Result<SettlementAttempt, AcknowledgeError> {
        let attempt = self.registry.acknowledge(attempt_id)?;
        info!(%attempt_id, status = ?attempt.status(), "attempt archived");
        Ok(attempt)
    }

    pub async fn quote_premium(
        &self,
        policy_id: &str,
        loan_amount: u64,
    ) -> Result<PremiumQuote, SettlementError> {
        let policy = self.load_policy(policy_id).await?;
        quote_premium(loan_amount, &policy, &self.pricing)
    }

    async fn publish(&self, outcome: &SettlementOutcome) {
        info!(
            policy_id = %outcome.policy_id,
            status = ?outcome.status,
            amount = outcome.amount,
            attempt_id = ?outcome.attempt_id,
            "settlement outcome"
        );
        if let Err(err) = self.sink.publish(outcome).await {
            error!(policy_id = %outcome.policy_id, error = %err, "failed to publish settlement outcome");
        }
    }
}

/// A live attempt, or a confirmed one, blocks new work for its key.
fn owns_key(attempt: &SettlementAttempt) -> bool {
    !attempt.status().is_terminal() || attempt.status() == AttemptStatus::Confirmed
}
