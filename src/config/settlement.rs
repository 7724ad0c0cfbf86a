use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::warn;

use crate::clients::oracle::OracleEndpoints;
use crate::services::pipeline::PipelineConfig;
use crate::services::pricing::{KindFactors, PricingConfig};
use crate::services::rate_limiter::RateLimitConfig;

const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";

#[derive(Clone, Debug)]
pub struct SettlementConfig {
    pub port: u16,
    pub rpc_url: String,
    /// Hex ed25519 seed. Required to run the server.
    pub signer_key: Option<String>,
    pub policy_store_file: PathBuf,
    pub ledger_file: PathBuf,
    pub oracle_timeout: Duration,
    pub oracle_endpoints: OracleEndpoints,
    pub pipeline: PipelineConfig,
    pub rate_limit: RateLimitConfig,
    pub pricing: PricingConfig,
    pub cors_allowed_origins: Vec<String>,
}

impl SettlementConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let pipeline_defaults = PipelineConfig::default();
        let rate_defaults = RateLimitConfig::default();
        let pricing_defaults = PricingConfig::default();

        let program_id = match env::var("SETTLEMENT_PROGRAM_ID") {
            Ok(raw) if !raw.trim().is_empty() => parse_program_id(&raw)?,
            _ => {
                warn!("SETTLEMENT_PROGRAM_ID not set, using the all-zero program id");
                pipeline_defaults.program_id
            }
        };

        Ok(Self {
            port: env_parse("PORT", 3001),
            rpc_url: env::var("SOLANA_RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string()),
            signer_key: env::var("SETTLEMENT_SIGNER_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            policy_store_file: env::var("POLICY_STORE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/policies.json")),
            ledger_file: env::var("SETTLEMENT_LEDGER_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/settlement_ledger.json")),
            oracle_timeout: Duration::from_millis(env_parse("ORACLE_TIMEOUT_MS", 5_000)),
            oracle_endpoints: OracleEndpoints {
                pyth: env_opt("ORACLE_ENDPOINT_PYTH"),
                switchboard: env_opt("ORACLE_ENDPOINT_SWITCHBOARD"),
                chainlink: env_opt("ORACLE_ENDPOINT_CHAINLINK"),
            },
            pipeline: PipelineConfig {
                program_id,
                compute_unit_limit: env_parse("COMPUTE_UNIT_LIMIT", pipeline_defaults.compute_unit_limit),
                max_send_retries: env_parse("SEND_MAX_RETRIES", pipeline_defaults.max_send_retries),
                skip_preflight: env_parse("SKIP_PREFLIGHT", pipeline_defaults.skip_preflight),
                rpc_timeout: Duration::from_millis(env_parse("RPC_TIMEOUT_MS", 10_000)),
                confirm_timeout: Duration::from_secs(env_parse("CONFIRM_TIMEOUT_SECONDS", 90)),
                poll_interval: Duration::from_millis(env_parse("CONFIRM_POLL_INTERVAL_MS", 500)),
            },
            rate_limit: RateLimitConfig {
                max_transactions: env_parse("RATE_LIMIT_MAX_TRANSACTIONS", rate_defaults.max_transactions),
                window: Duration::from_secs(env_parse("RATE_LIMIT_WINDOW_SECONDS", 10)),
            },
            pricing: PricingConfig {
                base_rate: env_parse("PRICING_BASE_RATE", pricing_defaults.base_rate),
                kind_factors: KindFactors {
                    weather: env_parse("PRICING_FACTOR_WEATHER", pricing_defaults.kind_factors.weather),
                    crop: env_parse("PRICING_FACTOR_CROP", pricing_defaults.kind_factors.crop),
                    business: env_parse("PRICING_FACTOR_BUSINESS", pricing_defaults.kind_factors.business),
                },
            },
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
        })
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Parse `name`, falling back to `default` when unset or malformed.
fn env_parse<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(err) => {
                warn!(variable = name, value = %raw, error = %err, "ignoring malformed setting");
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_program_id(raw: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(raw.trim()).context("SETTLEMENT_PROGRAM_ID must be hex")?;
    if bytes.len() != 32 {
        bail!("SETTLEMENT_PROGRAM_ID must be 32 bytes, got {}", bytes.len());
    }
    let mut id = [0u8; 32];
    id.copy_from_slice(&bytes);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_id_must_be_32_hex_bytes() {
        assert_eq!(parse_program_id(&"ab".repeat(32)).unwrap(), [0xab; 32]);
        assert!(parse_program_id("abcd").is_err());
        assert!(parse_program_id("not hex").is_err());
    }

    #[test]
    fn malformed_values_fall_back_to_default() {
        env::set_var("SEEDFLOW_TEST_MALFORMED_PORT", "eighty");
        assert_eq!(env_parse("SEEDFLOW_TEST_MALFORMED_PORT", 3001u16), 3001);
        env::set_var("SEEDFLOW_TEST_WELLFORMED_PORT", " 8080 ");
        assert_eq!(env_parse("SEEDFLOW_TEST_WELLFORMED_PORT", 3001u16), 8080);
        assert_eq!(env_parse("SEEDFLOW_TEST_UNSET_PORT", 3001u16), 3001);
    }
}
