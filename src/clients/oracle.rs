//! Oracle fetch boundary and the HTTP provider feed

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{OracleError, SettlementError};
use crate::models::{Condition, MeasurementWindow, Provider, ProviderReport};

/// One provider that could not contribute to a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider: Provider,
    pub error: OracleError,
}

impl From<ProviderFailure> for SettlementError {
    fn from(failure: ProviderFailure) -> Self {
        SettlementError::ProviderUnavailable {
            provider: failure.provider,
            reason: failure.error.to_string(),
        }
    }
}

/// Result of asking a set of providers for one window. Partial success is
/// the normal case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OracleFetch {
    pub reports: Vec<ProviderReport>,
    pub unavailable: Vec<ProviderFailure>,
}

#[async_trait]
pub trait OracleFeed: Send + Sync {
    async fn fetch_reports(
        &self,
        providers: &BTreeSet<Provider>,
        window: MeasurementWindow,
    ) -> OracleFetch;
}

/// Provider endpoint per network. Unset providers are reported unavailable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OracleEndpoints {
    pub pyth: Option<String>,
    pub switchboard: Option<String>,
    pub chainlink: Option<String>,
}

impl OracleEndpoints {
    pub fn get(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Pyth => self.pyth.as_deref(),
            Provider::Switchboard => self.switchboard.as_deref(),
            Provider::Chainlink => self.chainlink.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireReport {
    #[serde(default)]
    provider: Option<Provider>,
    observed_at: DateTime<Utc>,
    condition: Condition,
    magnitude: f64,
    #[serde(default)]
    aux_metrics: BTreeMap<String, f64>,
}

pub struct HttpOracleFeed {
    http: reqwest::Client,
    endpoints: OracleEndpoints,
    timeout: Duration,
}

impl HttpOracleFeed {
    pub fn new(endpoints: OracleEndpoints, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoints,
            timeout,
        }
    }

    async fn fetch_one(
        &self,
        provider: Provider,
        window: MeasurementWindow,
    ) -> Result<Vec<ProviderReport>, OracleError> {
        let endpoint = self.endpoints.get(provider).ok_or(OracleError::NotConfigured)?;

        let request = self
            .http
            .get(endpoint)
            .query(&[
                ("start", window.start.to_rfc3339()),
                ("end", window.end.to_rfc3339()),
            ])
            .send();

        let body = tokio::time::timeout(self.timeout, async {
            request
                .await?
                .error_for_status()?
                .json::<Value>()
                .await
        })
        .await
        .map_err(|_| OracleError::Timeout)?
        .map_err(|err| OracleError::Request(err.to_string()))?;

        parse_reports(provider, body)
    }
}

/// Accepts a bare array or `{"reports": [...]}`. Entries labelled with a
/// different provider are dropped.
fn parse_reports(provider: Provider, body: Value) -> Result<Vec<ProviderReport>, OracleError> {
    let entries = match body {
        Value::Array(entries) => entries,
        Value::Object(mut map) => match map.remove("reports") {
            Some(Value::Array(entries)) => entries,
            _ => return Err(OracleError::Malformed("expected a reports array".to_string())),
        },
        _ => return Err(OracleError::Malformed("expected a reports array".to_string())),
    };

    let mut reports = Vec::with_capacity(entries.len());
    for entry in entries {
        let wire: WireReport =
            serde_json::from_value(entry).map_err(|err| OracleError::Malformed(err.to_string()))?;
        if let Some(labelled) = wire.provider {
            if labelled != provider {
                warn!(%provider, %labelled, "dropping report labelled for another provider");
                continue;
            }
        }
        reports.push(ProviderReport {
            provider,
            observed_at: wire.observed_at,
            condition: wire.condition,
            magnitude: wire.magnitude,
            aux_metrics: wire.aux_metrics,
        });
    }
    Ok(reports)
}

#[async_trait]
impl OracleFeed for HttpOracleFeed {
    async fn fetch_reports(
        &self,
        providers: &BTreeSet<Provider>,
        window: MeasurementWindow,
    ) -> OracleFetch {
        let results = join_all(providers.iter().map(|provider| async move {
            (*provider, self.fetch_one(*provider, window).await)
        }))
        .await;

        let mut fetch = OracleFetch::default();
        for (provider, result) in results {
            match result {
                Ok(mut reports) => {
                    debug!(%provider, count = reports.len(), "provider reports fetched");
                    fetch.reports.append(&mut reports);
                }
                Err(error) => fetch.unavailable.push(ProviderFailure { provider, error }),
            }
        }
        fetch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_array_and_fills_provider() {
        let body = json!([
            { "observed_at": "2025-06-10T00:00:00Z", "condition": "adverse", "magnitude": 42.0,
              "aux_metrics": { "wind_kmh": 70.0 } }
        ]);
        let reports = parse_reports(Provider::Pyth, body).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].provider, Provider::Pyth);
        assert_eq!(reports[0].aux_metrics.get("wind_kmh"), Some(&70.0));
    }

    #[test]
    fn drops_reports_for_other_providers() {
        let body = json!({ "reports": [
            { "provider": "chainlink", "observed_at": "2025-06-10T00:00:00Z", "condition": "normal", "magnitude": 1.0 },
            { "provider": "pyth", "observed_at": "2025-06-11T00:00:00Z", "condition": "normal", "magnitude": 2.0 }
        ]});
        let reports = parse_reports(Provider::Pyth, body).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].magnitude, 2.0);
    }

    #[test]
    fn rejects_non_array_bodies() {
        assert!(matches!(
            parse_reports(Provider::Switchboard, json!({ "error": "down" })),
            Err(OracleError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn unconfigured_providers_are_unavailable() {
        let feed = HttpOracleFeed::new(OracleEndpoints::default(), Duration::from_millis(100));
        let window = MeasurementWindow::new(Utc::now(), Utc::now());
        let fetch = feed
            .fetch_reports(&[Provider::Pyth, Provider::Chainlink].into_iter().collect(), window)
            .await;

        assert!(fetch.reports.is_empty());
        assert_eq!(fetch.unavailable.len(), 2);
        assert!(fetch
            .unavailable
            .iter()
            .all(|failure| failure.error == OracleError::NotConfigured));
    }
}
