//! Attempt registry: the duplicate-payout guard
//!
//! Every `(policy_id, window)` key maps to at most one live attempt. The
//! check-and-insert in [`AttemptRegistry::claim`] happens under one lock, so
//! two concurrent settlements for the same key can never both start.
//!
//! Once an attempt reaches `Submitted`, its decision and amount are pinned
//! to the key; later attempts for the same key reuse them instead of the
//! freshly computed values. A key with a `Confirmed` attempt stays blocked
//! even after that attempt is acknowledged and archived, and across restarts
//! once [`AttemptRegistry::restore`] has replayed the outcome ledger.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SettlementError;
use crate::models::{
    AttemptStatus, Decision, OutcomeStatus, PipelineStage, SettlementAttempt, SettlementKey,
    SettlementOutcome,
};

/// Archived attempts that did not confirm are kept up to this many, oldest
/// evicted first. Confirmed attempts are never evicted.
pub const DEFAULT_ARCHIVE_LIMIT: usize = 1_024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcknowledgeError {
    #[error("attempt {0} not found")]
    NotFound(Uuid),

    #[error("attempt {0} is still {1:?}")]
    NotTerminal(Uuid, AttemptStatus),
}

struct ActiveEntry {
    attempt: SettlementAttempt,
    cancel: watch::Sender<bool>,
}

#[derive(Clone)]
struct Pinned {
    decision: Decision,
    amount: u64,
}

#[derive(Default)]
struct RegistryInner {
    active: HashMap<SettlementKey, ActiveEntry>,
    by_id: HashMap<Uuid, SettlementKey>,
    archived: HashMap<Uuid, SettlementAttempt>,
    evictable: VecDeque<Uuid>,
    archive_limit: usize,
    confirmed: HashMap<SettlementKey, Uuid>,
    pinned: HashMap<SettlementKey, Pinned>,
}

impl RegistryInner {
    fn lookup(&self, attempt_id: Uuid) -> Option<&SettlementAttempt> {
        self.by_id
            .get(&attempt_id)
            .and_then(|key| self.active.get(key))
            .map(|entry| &entry.attempt)
            .filter(|attempt| attempt.attempt_id == attempt_id)
            .or_else(|| self.archived.get(&attempt_id))
    }

    fn live_entry_mut(&mut self, key: &SettlementKey, attempt_id: Uuid) -> Option<&mut ActiveEntry> {
        self.active
            .get_mut(key)
            .filter(|entry| entry.attempt.attempt_id == attempt_id)
    }

    fn archive(&mut self, key: &SettlementKey) {
        if let Some(entry) = self.active.remove(key) {
            let attempt = entry.attempt;
            self.by_id.remove(&attempt.attempt_id);
            if attempt.status() != AttemptStatus::Confirmed {
                self.evictable.push_back(attempt.attempt_id);
            }
            self.archived.insert(attempt.attempt_id, attempt);
            self.evict();
        }
    }

    fn evict(&mut self) {
        while self.evictable.len() > self.archive_limit {
            if let Some(attempt_id) = self.evictable.pop_front() {
                self.archived.remove(&attempt_id);
            }
        }
    }
}

/// Result of claiming a key.
pub enum Claim {
    /// A fresh attempt the caller now drives.
    Started(AttemptHandle),
    /// A live or confirmed attempt already owns the key.
    Existing(SettlementAttempt),
}

pub struct AttemptRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for AttemptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptRegistry {
    pub fn new() -> Self {
        Self::with_archive_limit(DEFAULT_ARCHIVE_LIMIT)
    }

    pub fn with_archive_limit(archive_limit: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                archive_limit,
                ..RegistryInner::default()
            }),
        }
    }

    /// Replay previously published outcomes. Confirmed outcomes block their
    /// key again, and every outcome that reached the network pins its
    /// decision. Returns the number of confirmed keys restored.
    pub fn restore(&self, outcomes: &[SettlementOutcome]) -> usize {
        let mut inner = self.inner.lock();
        let mut restored = 0;

        for outcome in outcomes {
            let Some(attempt_id) = outcome.attempt_id else {
                continue;
            };
            let key = SettlementKey::new(outcome.policy_id.clone(), outcome.window);

            if outcome.status == OutcomeStatus::Confirmed {
                if inner.confirmed.insert(key.clone(), attempt_id).is_none() {
                    restored += 1;
                }
                inner.pinned.remove(&key);
                inner
                    .archived
                    .insert(attempt_id, confirmed_attempt_from(outcome, attempt_id));
            } else if outcome.signature.is_some() && !inner.confirmed.contains_key(&key) {
                inner.pinned.entry(key).or_insert_with(|| Pinned {
                    decision: outcome.decision.clone(),
                    amount: outcome.amount,
                });
            }
        }

        debug!(restored, pinned = inner.pinned.len(), "registry restored from ledger");
        restored
    }

    /// Atomically start a new attempt for `key`, unless one already owns it.
    pub fn claim(self: &Arc<Self>, key: SettlementKey, decision: Decision, amount: u64) -> Claim {
        let mut inner = self.inner.lock();

        if let Some(attempt_id) = inner.confirmed.get(&key).copied() {
            if let Some(attempt) = inner.lookup(attempt_id) {
                return Claim::Existing(attempt.clone());
            }
        }

        if let Some(entry) = inner.active.get(&key) {
            if !entry.attempt.status().is_terminal() {
                return Claim::Existing(entry.attempt.clone());
            }
            inner.archive(&key);
        }

        let (decision, amount) = match inner.pinned.get(&key) {
            Some(pinned) => {
                debug!(key = %key, "reusing decision pinned by an earlier submission");
                (pinned.decision.clone(), pinned.amount)
            }
            None => (decision, amount),
        };

        let attempt = SettlementAttempt::new(&key, decision, amount);
        let attempt_id = attempt.attempt_id;
        let (cancel_tx, cancel_rx) = watch::channel(false);

        inner.by_id.insert(attempt_id, key.clone());
        inner.active.insert(
            key.clone(),
            ActiveEntry {
                attempt,
                cancel: cancel_tx,
            },
        );

        Claim::Started(AttemptHandle {
            registry: Arc::clone(self),
            key,
            attempt_id,
            cancel: cancel_rx,
            finished: false,
        })
    }

    pub fn get(&self, attempt_id: Uuid) -> Option<SettlementAttempt> {
        self.inner.lock().lookup(attempt_id).cloned()
    }

    /// The attempt currently owning `key`: the active one, else the confirmed one.
    pub fn find(&self, key: &SettlementKey) -> Option<SettlementAttempt> {
        let inner = self.inner.lock();
        if let Some(entry) = inner.active.get(key) {
            return Some(entry.attempt.clone());
        }
        inner
            .confirmed
            .get(key)
            .and_then(|attempt_id| inner.lookup(*attempt_id))
            .cloned()
    }

    /// Signal the in-flight attempt for `key` to stop. Returns false when
    /// there is nothing live to cancel.
    pub fn cancel(&self, key: &SettlementKey) -> bool {
        let inner = self.inner.lock();
        match inner.active.get(key) {
            Some(entry) if !entry.attempt.status().is_terminal() => {
                entry.cancel.send_replace(true);
                true
            }
            _ => false,
        }
    }

    /// Archive a terminal attempt. Acknowledging twice is harmless.
    pub fn acknowledge(&self, attempt_id: Uuid) -> Result<SettlementAttempt, AcknowledgeError> {
        let mut inner = self.inner.lock();
        if let Some(archived) = inner.archived.get(&attempt_id) {
            return Ok(archived.clone());
        }

        let key = inner
            .by_id
            .get(&attempt_id)
            .cloned()
            .ok_or(AcknowledgeError::NotFound(attempt_id))?;
        let status = inner
            .active
            .get(&key)
            .map(|entry| entry.attempt.status())
            .ok_or(AcknowledgeError::NotFound(attempt_id))?;
        if !status.is_terminal() {
            return Err(AcknowledgeError::NotTerminal(attempt_id, status));
        }

        inner.archive(&key);
        inner
            .archived
            .get(&attempt_id)
            .cloned()
            .ok_or(AcknowledgeError::NotFound(attempt_id))
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    fn transition(
        &self,
        key: &SettlementKey,
        attempt_id: Uuid,
        next: PipelineStage,
        error: Option<String>,
    ) -> Result<SettlementAttempt, SettlementError> {
        let mut inner = self.inner.lock();
        let entry = inner.live_entry_mut(key, attempt_id).ok_or_else(|| {
            SettlementError::Unknown(anyhow::anyhow!("attempt {attempt_id} is no longer registered"))
        })?;

        let current = entry.attempt.stage;
        if !current.can_transition_to(next) {
            return Err(SettlementError::Unknown(anyhow::anyhow!(
                "illegal stage transition {current:?} -> {next:?} for attempt {attempt_id}"
            )));
        }

        entry.attempt.stage = next;
        entry.attempt.updated_at = Utc::now();
        if error.is_some() {
            entry.attempt.error = error;
        }
        let snapshot = entry.attempt.clone();

        if next == PipelineStage::Submitted {
            inner.pinned.entry(key.clone()).or_insert_with(|| Pinned {
                decision: snapshot.decision.clone(),
                amount: snapshot.computed_amount,
            });
        }
        if next == PipelineStage::Confirmed {
            inner.confirmed.insert(key.clone(), attempt_id);
            inner.pinned.remove(key);
        }
        Ok(snapshot)
    }

    fn update(&self, key: &SettlementKey, attempt_id: Uuid, f: impl FnOnce(&mut SettlementAttempt)) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.live_entry_mut(key, attempt_id) {
            f(&mut entry.attempt);
            entry.attempt.updated_at = Utc::now();
        }
    }

    fn remove(&self, key: &SettlementKey, attempt_id: Uuid) {
        let mut inner = self.inner.lock();
        if inner.live_entry_mut(key, attempt_id).is_some() {
            inner.active.remove(key);
            inner.by_id.remove(&attempt_id);
        }
    }

    fn snapshot(&self, key: &SettlementKey, attempt_id: Uuid) -> Option<SettlementAttempt> {
        let mut inner = self.inner.lock();
        inner
            .live_entry_mut(key, attempt_id)
            .map(|entry| entry.attempt.clone())
    }
}

fn confirmed_attempt_from(outcome: &SettlementOutcome, attempt_id: Uuid) -> SettlementAttempt {
    SettlementAttempt {
        attempt_id,
        policy_id: outcome.policy_id.clone(),
        window: outcome.window,
        decision: outcome.decision.clone(),
        computed_amount: outcome.amount,
        stage: PipelineStage::Confirmed,
        last_blockhash: None,
        retry_count: 0,
        signature: outcome.signature.clone(),
        error: outcome.error.clone(),
        created_at: outcome.emitted_at,
        updated_at: outcome.emitted_at,
    }
}

/// Cancellation signal for one attempt.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Resolves once the attempt is cancelled. Never resolves if the
    /// registry entry goes away without cancelling.
    pub async fn cancelled(mut self) {
        let closed = self.rx.wait_for(|flag| *flag).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Exclusive right to drive one attempt through the pipeline. Dropping it
/// before [`finish`](Self::finish) or [`release`](Self::release) expires the
/// attempt so the registry never holds an orphaned live entry.
pub struct AttemptHandle {
    registry: Arc<AttemptRegistry>,
    key: SettlementKey,
    attempt_id: Uuid,
    cancel: watch::Receiver<bool>,
    finished: bool,
}

impl AttemptHandle {
    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn key(&self) -> &SettlementKey {
        &self.key
    }

    pub fn snapshot(&self) -> Option<SettlementAttempt> {
        self.registry.snapshot(&self.key, self.attempt_id)
    }

    pub fn stage(&self) -> Option<PipelineStage> {
        self.snapshot().map(|attempt| attempt.stage)
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.cancel.clone(),
        }
    }

    pub fn advance(&self, next: PipelineStage) -> Result<SettlementAttempt, SettlementError> {
        let attempt = self.registry.transition(&self.key, self.attempt_id, next, None)?;
        debug!(
            attempt_id = %self.attempt_id,
            policy_id = %self.key.policy_id,
            stage = ?next,
            retry_count = attempt.retry_count,
            "attempt advanced"
        );
        Ok(attempt)
    }

    pub fn update(&self, f: impl FnOnce(&mut SettlementAttempt)) {
        self.registry.update(&self.key, self.attempt_id, f);
    }

    /// Move to a terminal stage and hand the final record back.
    pub fn finish(
        mut self,
        stage: PipelineStage,
        error: Option<String>,
    ) -> Result<SettlementAttempt, SettlementError> {
        self.finished = true;
        self.registry.transition(&self.key, self.attempt_id, stage, error)
    }

    /// Drop an attempt that never reached the network.
    pub fn release(mut self) {
        self.finished = true;
        self.registry.remove(&self.key, self.attempt_id);
    }
}

impl Drop for AttemptHandle {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let result = self.registry.transition(
            &self.key,
            self.attempt_id,
            PipelineStage::Expired,
            Some("settlement abandoned".to_string()),
        );
        if result.is_ok() {
            warn!(attempt_id = %self.attempt_id, key = %self.key, "abandoned attempt expired");
        }
    }
}
