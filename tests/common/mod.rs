//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use seedflow_settlement::clients::{
    InMemoryPolicyStore, KeyProvider, LocalSigner, OracleFeed, OracleFetch, PolicyRecord,
    ProviderFailure, RpcClient, SendOptions, SubmissionHandle, SubmissionStatus,
};
use seedflow_settlement::error::{OracleError, RpcError, SignError};
use seedflow_settlement::models::{
    Condition, Coverage, MeasurementWindow, Policy, PremiumSchedule, Provider, ProviderReport,
};
use seedflow_settlement::services::outcome_sink::{BroadcastSink, FanoutSink, JsonLedgerSink, OutcomeSink};
use seedflow_settlement::services::pipeline::PipelineConfig;
use seedflow_settlement::services::pricing::PricingConfig;
use seedflow_settlement::services::rate_limiter::RateLimitConfig;
use seedflow_settlement::services::transaction::{FreshnessAnchor, SignedTransaction};
use seedflow_settlement::services::{SettlementContext, SettlementOrchestrator};

pub const WEATHER_POLICY: &str = "pol-weather";
pub const OTHER_WEATHER_POLICY: &str = "pol-weather-2";
pub const REQUIRED_PROVIDERS_POLICY: &str = "pol-required";

/// min(cap 1000, principal 800) less a 5% deductible.
pub const EXPECTED_PAYOUT: u64 = 760;

const ANCHOR_VALIDITY: u64 = 150;

pub fn window() -> MeasurementWindow {
    MeasurementWindow::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2025, 6, 30, 23, 59, 59).unwrap(),
    )
}

pub fn report(provider: Provider, condition: Condition, magnitude: f64) -> ProviderReport {
    ProviderReport::new(
        provider,
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap(),
        condition,
        magnitude,
    )
}

/// Two of three providers see drought: 38, 42 and 45 mm.
pub fn drought_reports() -> Vec<ProviderReport> {
    vec![
        report(Provider::Pyth, Condition::Adverse, 42.0),
        report(Provider::Switchboard, Condition::Adverse, 38.0),
        report(Provider::Chainlink, Condition::Normal, 45.0),
    ]
}

pub fn normal_reports() -> Vec<ProviderReport> {
    vec![
        report(Provider::Pyth, Condition::Normal, 90.0),
        report(Provider::Switchboard, Condition::Normal, 88.0),
        report(Provider::Chainlink, Condition::Adverse, 95.0),
    ]
}

pub fn weather_policy(policy_id: &str, required: &[Provider]) -> PolicyRecord {
    PolicyRecord {
        policy: Policy {
            policy_id: policy_id.to_string(),
            coverage: Coverage::Weather {
                min_rain_mm: 50.0,
                max_rain_mm: 150.0,
                max_wind_kmh: None,
            },
            coverage_cap: 1_000,
            deductible_bps: 500,
            measurement_period_days: 30,
            premium_schedule: PremiumSchedule::Monthly,
            required_providers: required.iter().copied().collect(),
            consensus_threshold: 2.0 / 3.0,
        },
        outstanding_principal: 800,
    }
}

pub fn policy_records() -> Vec<PolicyRecord> {
    vec![
        weather_policy(WEATHER_POLICY, &[]),
        weather_policy(OTHER_WEATHER_POLICY, &[]),
        weather_policy(REQUIRED_PROVIDERS_POLICY, &[Provider::Pyth, Provider::Chainlink]),
    ]
}

/// RPC node whose send results and status answers are scripted per call.
pub struct FakeRpc {
    height: AtomicU64,
    height_step: AtomicU64,
    anchors_issued: AtomicU64,
    stall_anchor: AtomicBool,
    stall_sends: AtomicBool,
    stall_status: AtomicBool,
    send_script: Mutex<VecDeque<Result<(), RpcError>>>,
    status_script: Mutex<VecDeque<SubmissionStatus>>,
    default_status: Mutex<SubmissionStatus>,
    sent: Mutex<Vec<SignedTransaction>>,
}

impl Default for FakeRpc {
    fn default() -> Self {
        Self {
            height: AtomicU64::new(1_000),
            height_step: AtomicU64::new(0),
            anchors_issued: AtomicU64::new(0),
            stall_anchor: AtomicBool::new(false),
            stall_sends: AtomicBool::new(false),
            stall_status: AtomicBool::new(false),
            send_script: Mutex::new(VecDeque::new()),
            status_script: Mutex::new(VecDeque::new()),
            default_status: Mutex::new(SubmissionStatus::Confirmed),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl FakeRpc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_sends(&self, results: impl IntoIterator<Item = Result<(), RpcError>>) {
        self.send_script.lock().extend(results);
    }

    pub fn script_statuses(&self, statuses: impl IntoIterator<Item = SubmissionStatus>) {
        self.status_script.lock().extend(statuses);
    }

    pub fn set_default_status(&self, status: SubmissionStatus) {
        *self.default_status.lock() = status;
    }

    /// Each block height query moves the chain forward by `step`.
    pub fn set_height_step(&self, step: u64) {
        self.height_step.store(step, Ordering::SeqCst);
    }

    /// Stalled stages never answer; only the pipeline's timeouts end them.
    pub fn stall_anchor(&self) {
        self.stall_anchor.store(true, Ordering::SeqCst);
    }

    pub fn stall_sends(&self) {
        self.stall_sends.store(true, Ordering::SeqCst);
    }

    pub fn stall_status(&self) {
        self.stall_status.store(true, Ordering::SeqCst);
    }

    pub fn anchors_issued(&self) -> u64 {
        self.anchors_issued.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SignedTransaction> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl RpcClient for FakeRpc {
    async fn latest_anchor(&self) -> Result<FreshnessAnchor, RpcError> {
        if self.stall_anchor.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        let n = self.anchors_issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FreshnessAnchor {
            blockhash: format!("anchor-{n}"),
            last_valid_block_height: self.height.load(Ordering::SeqCst) + ANCHOR_VALIDITY,
        })
    }

    async fn block_height(&self) -> Result<u64, RpcError> {
        let step = self.height_step.load(Ordering::SeqCst);
        Ok(self.height.fetch_add(step, Ordering::SeqCst) + step)
    }

    async fn send(
        &self,
        transaction: &SignedTransaction,
        _options: &SendOptions,
    ) -> Result<SubmissionHandle, RpcError> {
        self.sent.lock().push(transaction.clone());
        if self.stall_sends.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        let scripted = self.send_script.lock().pop_front().unwrap_or(Ok(()));
        scripted.map(|()| SubmissionHandle {
            signature: transaction.signature_hex(),
        })
    }

    async fn poll_status(&self, _handle: &SubmissionHandle) -> Result<SubmissionStatus, RpcError> {
        if self.stall_status.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        let scripted = self.status_script.lock().pop_front();
        Ok(scripted.unwrap_or_else(|| self.default_status.lock().clone()))
    }
}

/// Oracle feed answering from a fixed report list.
#[derive(Default)]
pub struct FakeOracle {
    reports: Vec<ProviderReport>,
    unavailable: BTreeSet<Provider>,
}

impl FakeOracle {
    pub fn new(reports: Vec<ProviderReport>) -> Self {
        Self {
            reports,
            unavailable: BTreeSet::new(),
        }
    }

    pub fn with_unavailable(mut self, provider: Provider) -> Self {
        self.unavailable.insert(provider);
        self
    }
}

#[async_trait]
impl OracleFeed for FakeOracle {
    async fn fetch_reports(
        &self,
        providers: &BTreeSet<Provider>,
        _window: MeasurementWindow,
    ) -> OracleFetch {
        OracleFetch {
            reports: self
                .reports
                .iter()
                .filter(|r| providers.contains(&r.provider) && !self.unavailable.contains(&r.provider))
                .cloned()
                .collect(),
            unavailable: providers
                .iter()
                .filter(|p| self.unavailable.contains(p))
                .map(|provider| ProviderFailure {
                    provider: *provider,
                    error: OracleError::Request("connection refused".to_string()),
                })
                .collect(),
        }
    }
}

/// Key holder that refuses every request.
pub struct DecliningSigner;

#[async_trait]
impl KeyProvider for DecliningSigner {
    fn public_key(&self) -> [u8; 32] {
        [3u8; 32]
    }

    async fn sign(&self, _message: &[u8]) -> Result<[u8; 64], SignError> {
        Err(SignError::Declined("hardware wallet rejected the request".to_string()))
    }
}

pub fn test_pipeline_config() -> PipelineConfig {
    PipelineConfig {
        program_id: [9u8; 32],
        rpc_timeout: Duration::from_secs(5),
        confirm_timeout: Duration::from_secs(600),
        poll_interval: Duration::from_millis(100),
        ..PipelineConfig::default()
    }
}

pub struct Harness {
    pub orchestrator: Arc<SettlementOrchestrator>,
    pub rpc: Arc<FakeRpc>,
    pub outcomes: BroadcastSink,
}

pub struct HarnessBuilder {
    rpc: Arc<FakeRpc>,
    oracle: FakeOracle,
    signer: Arc<dyn KeyProvider>,
    rate_limit: RateLimitConfig,
    ledger: Option<PathBuf>,
}

impl HarnessBuilder {
    pub fn new(oracle: FakeOracle) -> Self {
        Self {
            rpc: FakeRpc::new(),
            oracle,
            signer: Arc::new(LocalSigner::from_seed([7u8; 32])),
            rate_limit: RateLimitConfig::default(),
            ledger: None,
        }
    }

    /// Also persist outcomes to a JSON ledger at `path`.
    pub fn ledger(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger = Some(path.into());
        self
    }

    pub fn rpc(mut self, rpc: Arc<FakeRpc>) -> Self {
        self.rpc = rpc;
        self
    }

    pub fn signer(mut self, signer: Arc<dyn KeyProvider>) -> Self {
        self.signer = signer;
        self
    }

    pub fn rate_limit(mut self, max_transactions: usize) -> Self {
        self.rate_limit = RateLimitConfig {
            max_transactions,
            window: Duration::from_secs(10),
        };
        self
    }

    pub fn build(self) -> Harness {
        let outcomes = BroadcastSink::new(64);
        let sink: Arc<dyn OutcomeSink> = match self.ledger {
            Some(path) => Arc::new(
                FanoutSink::new()
                    .with(Arc::new(outcomes.clone()))
                    .with(Arc::new(JsonLedgerSink::new(path))),
            ),
            None => Arc::new(outcomes.clone()),
        };
        let orchestrator = SettlementOrchestrator::new(SettlementContext {
            oracle: Arc::new(self.oracle),
            rpc: self.rpc.clone(),
            signer: self.signer,
            policies: Arc::new(InMemoryPolicyStore::with_records(policy_records())),
            sink,
            pipeline: test_pipeline_config(),
            rate_limit: self.rate_limit,
            pricing: PricingConfig::default(),
        });
        Harness {
            orchestrator: Arc::new(orchestrator),
            rpc: self.rpc,
            outcomes,
        }
    }
}

pub fn temp_ledger() -> PathBuf {
    std::env::temp_dir()
        .join(format!("seedflow-ledger-{}", uuid::Uuid::new_v4()))
        .join("outcomes.json")
}

pub fn harness(oracle: FakeOracle) -> Harness {
    HarnessBuilder::new(oracle).build()
}
