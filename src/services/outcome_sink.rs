//! Settlement outcome sinks
//!
//! Downstream consumers (ledger, notification channel, passive UIs) only
//! ever see outcomes the orchestrator publishes here.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::models::SettlementOutcome;

#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn publish(&self, outcome: &SettlementOutcome) -> anyhow::Result<()>;
}

/// Fan-out to live subscribers. Publishing with nobody listening is not an error.
#[derive(Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<SettlementOutcome>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettlementOutcome> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl OutcomeSink for BroadcastSink {
    async fn publish(&self, outcome: &SettlementOutcome) -> anyhow::Result<()> {
        let receivers = self.sender.send(outcome.clone()).unwrap_or(0);
        debug!(receivers, policy_id = %outcome.policy_id, "outcome broadcast");
        Ok(())
    }
}

/// Appends outcomes to a pretty-printed JSON array on disk.
pub struct JsonLedgerSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLedgerSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn read_all(&self) -> anyhow::Result<Vec<SettlementOutcome>> {
        read_ledger(&self.path).await
    }
}

async fn read_ledger(path: &PathBuf) -> anyhow::Result<Vec<SettlementOutcome>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(Vec::new());
    }
    let content = tokio::fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&content)?)
}

/// Write to a sibling temp file, then rename over the ledger so a crash
/// mid-write never leaves a torn file behind.
async fn persist_ledger(path: &PathBuf, outcomes: &[SettlementOutcome]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_string_pretty(outcomes)?;
    let staging = staging_path(path);
    tokio::fs::write(&staging, payload).await?;
    tokio::fs::rename(&staging, path).await?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[async_trait]
impl OutcomeSink for JsonLedgerSink {
    async fn publish(&self, outcome: &SettlementOutcome) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut outcomes = read_ledger(&self.path).await?;
        outcomes.push(outcome.clone());
        persist_ledger(&self.path, &outcomes).await
    }
}

/// Publishes to every inner sink, attempting all of them before reporting
/// the first failure.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn OutcomeSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl OutcomeSink for FanoutSink {
    async fn publish(&self, outcome: &SettlementOutcome) -> anyhow::Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(err) = sink.publish(outcome).await {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Decision, MeasurementWindow};
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};

    fn outcome(policy_id: &str) -> SettlementOutcome {
        let now = Utc::now();
        SettlementOutcome::no_action(
            policy_id,
            Decision {
                is_adverse: false,
                consensus_magnitude: 90.0,
                agreement_ratio: 0.0,
                window: MeasurementWindow::new(now, now),
                contributing_providers: BTreeSet::new(),
                aux_medians: BTreeMap::new(),
            },
        )
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();

        sink.publish(&outcome("pol-1")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().policy_id, "pol-1");
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_ok() {
        let sink = BroadcastSink::new(8);
        assert!(sink.publish(&outcome("pol-1")).await.is_ok());
    }

    #[tokio::test]
    async fn ledger_appends_outcomes() {
        let path = std::env::temp_dir()
            .join(format!("ledger-{}", uuid::Uuid::new_v4()))
            .join("outcomes.json");
        let sink = JsonLedgerSink::new(&path);

        sink.publish(&outcome("pol-1")).await.unwrap();
        sink.publish(&outcome("pol-2")).await.unwrap();

        let stored = sink.read_all().await.unwrap();
        assert_eq!(
            stored.iter().map(|o| o.policy_id.as_str()).collect::<Vec<_>>(),
            ["pol-1", "pol-2"]
        );
        assert!(!tokio::fs::try_exists(staging_path(&path)).await.unwrap());
        if let Some(parent) = path.parent() {
            tokio::fs::remove_dir_all(parent).await.unwrap();
        }
    }

    #[tokio::test]
    async fn torn_staging_file_does_not_corrupt_the_ledger() {
        let dir = std::env::temp_dir().join(format!("ledger-{}", uuid::Uuid::new_v4()));
        let path = dir.join("outcomes.json");
        let sink = JsonLedgerSink::new(&path);
        sink.publish(&outcome("pol-1")).await.unwrap();

        // A crash mid-write leaves only the staging file half written.
        tokio::fs::write(staging_path(&path), "[{\"policy_id\": \"pol-").await.unwrap();
        assert_eq!(sink.read_all().await.unwrap().len(), 1);

        sink.publish(&outcome("pol-2")).await.unwrap();
        assert_eq!(sink.read_all().await.unwrap().len(), 2);
        tokio::fs::remove_dir_all(dir).await.unwrap();
    }

    #[tokio::test]
    async fn fanout_publishes_to_all() {
        let a = BroadcastSink::new(4);
        let b = BroadcastSink::new(4);
        let mut rx_a = a.subscribe();
        let mut rx_b = b.subscribe();
        let fanout = FanoutSink::new()
            .with(Arc::new(a.clone()))
            .with(Arc::new(b.clone()));

        fanout.publish(&outcome("pol-9")).await.unwrap();
        assert_eq!(rx_a.recv().await.unwrap().policy_id, "pol-9");
        assert_eq!(rx_b.recv().await.unwrap().policy_id, "pol-9");
    }
}
