//! Policy store boundary and the in-memory/JSON-file implementation

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StoreError;
use crate::models::Policy;

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get_policy(&self, policy_id: &str) -> Result<Policy, StoreError>;

    /// Principal still owed on the loan the policy insures.
    async fn outstanding_principal(&self, policy_id: &str) -> Result<u64, StoreError>;
}

/// A policy together with its loan's outstanding principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub policy: Policy,
    pub outstanding_principal: u64,
}

#[derive(Default)]
pub struct InMemoryPolicyStore {
    records: RwLock<HashMap<String, PolicyRecord>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = PolicyRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    pub fn insert(&self, record: PolicyRecord) {
        self.records
            .write()
            .insert(record.policy.policy_id.clone(), record);
    }

    /// Replace a policy on renewal. The previous value is returned, never edited in place.
    pub fn supersede(&self, record: PolicyRecord) -> Option<PolicyRecord> {
        self.records
            .write()
            .insert(record.policy.policy_id.clone(), record)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Load a JSON array of [`PolicyRecord`]s. A missing file yields an empty store.
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?
        {
            info!(path = %path.display(), "policy store file not found, starting empty");
            return Ok(Self::new());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        let records: Vec<PolicyRecord> =
            serde_json::from_str(&content).map_err(|err| StoreError::Backend(err.to_string()))?;

        let store = Self::with_records(records);
        info!(path = %path.display(), policies = store.len(), "policy store loaded");
        Ok(store)
    }

    fn record(&self, policy_id: &str) -> Result<PolicyRecord, StoreError> {
        self.records
            .read()
            .get(policy_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(policy_id.to_string()))
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get_policy(&self, policy_id: &str) -> Result<Policy, StoreError> {
        self.record(policy_id).map(|record| record.policy)
    }

    async fn outstanding_principal(&self, policy_id: &str) -> Result<u64, StoreError> {
        self.record(policy_id)
            .map(|record| record.outstanding_principal)
    }
}
