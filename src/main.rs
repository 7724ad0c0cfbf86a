//! Seedflow Settlement Server
//!
//! Serves the settlement API and streams settlement outcomes to passive
//! subscribers over WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use tokio::time::{sleep, Duration};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use seedflow_settlement::app_state::AppState;
use seedflow_settlement::clients::{HttpOracleFeed, HttpRpcClient, InMemoryPolicyStore, LocalSigner};
use seedflow_settlement::config::SettlementConfig;
use seedflow_settlement::routes;
use seedflow_settlement::services::orchestrator::{SettlementContext, SettlementOrchestrator};
use seedflow_settlement::services::outcome_sink::{BroadcastSink, FanoutSink, JsonLedgerSink};

const OUTCOME_CHANNEL_CAPACITY: usize = 256;
const SERVER_SUPERVISOR_MAX_BACKOFF_SECONDS: u64 = 30;
const SERVER_SUPERVISOR_MAX_RESTARTS: u32 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = SettlementConfig::from_env()?;

    let signer_key = config
        .signer_key
        .as_deref()
        .context("SETTLEMENT_SIGNER_KEY must be set to a 32-byte hex ed25519 seed")?;
    let signer = LocalSigner::from_hex_seed(signer_key).context("invalid SETTLEMENT_SIGNER_KEY")?;
    info!(fee_payer = %hex::encode(signer.verifying_key().to_bytes()), "signer loaded");

    let rpc = HttpRpcClient::new(config.rpc_url.clone(), config.pipeline.rpc_timeout)
        .context("failed to build RPC client")?;
    let policies = InMemoryPolicyStore::load(&config.policy_store_file)
        .await
        .context("failed to load policy store")?;
    let oracle = HttpOracleFeed::new(config.oracle_endpoints.clone(), config.oracle_timeout);

    let ledger = Arc::new(JsonLedgerSink::new(config.ledger_file.clone()));
    let history = ledger
        .read_all()
        .await
        .context("failed to read settlement ledger")?;

    let outcomes = BroadcastSink::new(OUTCOME_CHANNEL_CAPACITY);
    let sink = FanoutSink::new()
        .with(Arc::new(outcomes.clone()))
        .with(ledger);

    let orchestrator = Arc::new(SettlementOrchestrator::new(SettlementContext {
        oracle: Arc::new(oracle),
        rpc: Arc::new(rpc),
        signer: Arc::new(signer),
        policies: Arc::new(policies),
        sink: Arc::new(sink),
        pipeline: config.pipeline.clone(),
        rate_limit: config.rate_limit,
        pricing: config.pricing,
    }));
    orchestrator.restore(&history);

    let app = routes::app(AppState::new(orchestrator, outcomes))
        .layer(build_cors_layer(&config.cors_allowed_origins))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    info!(%addr, rpc_url = %config.rpc_url, "server starting");

    // Restart the listener with backoff if it fails.
    let mut restart_count: u32 = 0;
    loop {
        let result = async {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app.clone()).await
        }
        .await;

        match result {
            Ok(()) => {
                info!("server exited cleanly");
                return Ok(());
            }
            Err(err) => error!(error = %err, "server failed"),
        }

        restart_count = restart_count.saturating_add(1);
        if restart_count > SERVER_SUPERVISOR_MAX_RESTARTS {
            anyhow::bail!("server failed {restart_count} times, giving up");
        }
        let backoff_seconds =
            (2u64.saturating_pow(restart_count.min(5))).min(SERVER_SUPERVISOR_MAX_BACKOFF_SECONDS);
        warn!(restart_count, backoff_seconds, "server restart backoff");
        sleep(Duration::from_secs(backoff_seconds)).await;
    }
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allowed_origins = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(false)
}
