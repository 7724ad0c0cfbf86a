//! Settlement attempt lifecycle and the outcomes emitted downstream

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::decision::Decision;
use crate::models::report::MeasurementWindow;

/// Idempotency key: at most one confirmed settlement per policy and window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SettlementKey {
    pub policy_id: String,
    pub window: MeasurementWindow,
}

impl SettlementKey {
    pub fn new(policy_id: impl Into<String>, window: MeasurementWindow) -> Self {
        Self {
            policy_id: policy_id.into(),
            window,
        }
    }
}

impl fmt::Display for SettlementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.policy_id, self.window)
    }
}

/// Coarse attempt status exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
    Expired,
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptStatus::Confirmed | AttemptStatus::Failed | AttemptStatus::Expired
        )
    }
}

/// Fine-grained submission pipeline stage.
///
/// `Pending -> Built -> Validated -> RateLimitApproved -> Signed -> Submitted
/// -> {Confirmed | Failed}`. `Submitted -> Submitted` is a resend and
/// `Submitted -> Built` a rebuild on a fresh anchor. Any non-terminal stage
/// may expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Pending,
    Built,
    Validated,
    RateLimitApproved,
    Signed,
    Submitted,
    Confirmed,
    Failed,
    Expired,
}

impl PipelineStage {
    pub fn status(&self) -> AttemptStatus {
        match self {
            PipelineStage::Pending
            | PipelineStage::Built
            | PipelineStage::Validated
            | PipelineStage::RateLimitApproved
            | PipelineStage::Signed => AttemptStatus::Pending,
            PipelineStage::Submitted => AttemptStatus::Submitted,
            PipelineStage::Confirmed => AttemptStatus::Confirmed,
            PipelineStage::Failed => AttemptStatus::Failed,
            PipelineStage::Expired => AttemptStatus::Expired,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn can_transition_to(&self, next: PipelineStage) -> bool {
        use PipelineStage::*;

        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Expired)
                | (_, Failed)
                | (Pending, Built)
                | (Built, Validated)
                | (Validated, RateLimitApproved)
                | (RateLimitApproved, Signed)
                | (Signed, Submitted)
                | (Submitted, Submitted)
                | (Submitted, Built)
                | (Submitted, Confirmed)
        )
    }
}

/// One tracked submission lifecycle, owned by the attempt registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementAttempt {
    pub attempt_id: Uuid,
    pub policy_id: String,
    pub window: MeasurementWindow,
    pub decision: Decision,
    pub computed_amount: u64,
    pub stage: PipelineStage,
    pub last_blockhash: Option<String>,
    pub retry_count: u32,
    pub signature: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementAttempt {
    pub fn new(key: &SettlementKey, decision: Decision, computed_amount: u64) -> Self {
        let now = Utc::now();
        Self {
            attempt_id: Uuid::new_v4(),
            policy_id: key.policy_id.clone(),
            window: key.window,
            decision,
            computed_amount,
            stage: PipelineStage::Pending,
            last_blockhash: None,
            retry_count: 0,
            signature: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> SettlementKey {
        SettlementKey::new(self.policy_id.clone(), self.window)
    }

    pub fn status(&self) -> AttemptStatus {
        self.stage.status()
    }
}

/// Status carried by a published outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Evaluated, nothing to pay.
    NoAction,
    Pending,
    Submitted,
    Confirmed,
    Failed,
    Expired,
}

impl From<AttemptStatus> for OutcomeStatus {
    fn from(status: AttemptStatus) -> Self {
        match status {
            AttemptStatus::Pending => OutcomeStatus::Pending,
            AttemptStatus::Submitted => OutcomeStatus::Submitted,
            AttemptStatus::Confirmed => OutcomeStatus::Confirmed,
            AttemptStatus::Failed => OutcomeStatus::Failed,
            AttemptStatus::Expired => OutcomeStatus::Expired,
        }
    }
}

/// Authoritative result of `settle`, emitted to ledger and notification
/// consumers. UIs subscribe to these rather than tracking state themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementOutcome {
    pub policy_id: String,
    pub window: MeasurementWindow,
    pub decision: Decision,
    pub amount: u64,
    pub status: OutcomeStatus,
    pub attempt_id: Option<Uuid>,
    pub signature: Option<String>,
    pub error: Option<String>,
    pub emitted_at: DateTime<Utc>,
}

impl SettlementOutcome {
    pub fn no_action(policy_id: impl Into<String>, decision: Decision) -> Self {
        Self {
            policy_id: policy_id.into(),
            window: decision.window,
            decision,
            amount: 0,
            status: OutcomeStatus::NoAction,
            attempt_id: None,
            signature: None,
            error: None,
            emitted_at: Utc::now(),
        }
    }

    pub fn from_attempt(attempt: &SettlementAttempt) -> Self {
        Self {
            policy_id: attempt.policy_id.clone(),
            window: attempt.window,
            decision: attempt.decision.clone(),
            amount: attempt.computed_amount,
            status: attempt.status().into(),
            attempt_id: Some(attempt.attempt_id),
            signature: attempt.signature.clone(),
            error: attempt.error.clone(),
            emitted_at: Utc::now(),
        }
    }
}
