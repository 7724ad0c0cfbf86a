//! ReportSet normalizer
//!
//! Pure function from raw provider reports to a canonical `ReportSet`:
//! out-of-window and malformed readings are dropped, repeated providers
//! collapse to their latest report, and the required provider set is
//! enforced.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::SettlementError;
use crate::models::{MeasurementWindow, Provider, ProviderReport, ReportSet};

pub fn normalize(
    raw_reports: Vec<ProviderReport>,
    window: MeasurementWindow,
    required_providers: &BTreeSet<Provider>,
) -> Result<ReportSet, SettlementError> {
    let mut latest: BTreeMap<Provider, ProviderReport> = BTreeMap::new();

    for report in raw_reports {
        if !window.contains(report.observed_at) || !report.is_well_formed() {
            continue;
        }
        match latest.entry(report.provider) {
            Entry::Vacant(slot) => {
                slot.insert(report);
            }
            Entry::Occupied(mut slot) => {
                // Later input wins a timestamp tie.
                if report.observed_at >= slot.get().observed_at {
                    slot.insert(report);
                }
            }
        }
    }

    if latest.is_empty() {
        return Err(SettlementError::InsufficientData(format!(
            "no usable reports within window {window}"
        )));
    }

    let missing: Vec<&str> = required_providers
        .iter()
        .filter(|provider| !latest.contains_key(*provider))
        .map(Provider::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(SettlementError::InsufficientData(format!(
            "required providers missing: {}",
            missing.join(", ")
        )));
    }

    Ok(ReportSet::from_parts(window, latest.into_values().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Condition;
    use chrono::{Duration, TimeZone, Utc};

    fn window() -> MeasurementWindow {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        MeasurementWindow::new(start, start + Duration::days(30))
    }

    fn report(provider: Provider, day: i64, magnitude: f64) -> ProviderReport {
        ProviderReport::new(
            provider,
            window().start + Duration::days(day),
            Condition::Adverse,
            magnitude,
        )
    }

    #[test]
    fn drops_reports_outside_window() {
        let reports = vec![
            report(Provider::Pyth, 3, 40.0),
            report(Provider::Switchboard, -1, 10.0),
            report(Provider::Chainlink, 31, 10.0),
        ];

        let set = normalize(reports, window(), &BTreeSet::new()).unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(set.reports()[0].provider, Provider::Pyth);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let reports = vec![report(Provider::Pyth, 0, 1.0), report(Provider::Chainlink, 30, 2.0)];
        let set = normalize(reports, window(), &BTreeSet::new()).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn duplicate_provider_collapses_to_latest() {
        let reports = vec![
            report(Provider::Pyth, 10, 55.0),
            report(Provider::Pyth, 2, 20.0),
            report(Provider::Pyth, 5, 30.0),
        ];

        let set = normalize(reports, window(), &BTreeSet::new()).unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(set.reports()[0].magnitude, 55.0);
    }

    #[test]
    fn malformed_magnitudes_are_discarded() {
        let reports = vec![
            report(Provider::Pyth, 1, f64::NAN),
            report(Provider::Switchboard, 1, -3.0),
            report(Provider::Chainlink, 1, 12.0),
        ];

        let set = normalize(reports, window(), &BTreeSet::new()).unwrap();

        assert_eq!(set.providers(), BTreeSet::from([Provider::Chainlink]));
    }

    #[test]
    fn empty_result_is_insufficient_data() {
        let err = normalize(vec![report(Provider::Pyth, 45, 1.0)], window(), &BTreeSet::new())
            .unwrap_err();
        assert!(matches!(err, SettlementError::InsufficientData(_)));
    }

    #[test]
    fn missing_required_provider_is_insufficient_data() {
        let required = BTreeSet::from([Provider::Pyth, Provider::Chainlink]);
        let err = normalize(vec![report(Provider::Switchboard, 1, 40.0)], window(), &required)
            .unwrap_err();

        match err {
            SettlementError::InsufficientData(reason) => {
                assert!(reason.contains("pyth"));
                assert!(reason.contains("chainlink"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
