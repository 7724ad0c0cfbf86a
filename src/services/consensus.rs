//! Consensus engine
//!
//! Turns a normalized report set into one `Decision`. The adverse vote is a
//! simple fraction compared with `>=` against the policy threshold, and the
//! representative magnitude is the median (mean of the two middle values for
//! an even count).

use std::collections::BTreeMap;

use crate::models::{Condition, Decision, ReportSet};

pub fn decide(report_set: &ReportSet, consensus_threshold: f64) -> Decision {
    decide_with_metrics(report_set, consensus_threshold, &[])
}

/// Like [`decide`], additionally aggregating the named auxiliary metrics by
/// per-metric median. Metrics no report carries are left out.
pub fn decide_with_metrics(
    report_set: &ReportSet,
    consensus_threshold: f64,
    metrics: &[&str],
) -> Decision {
    let reports = report_set.reports();
    let total = reports.len();

    let adverse_count = reports
        .iter()
        .filter(|r| r.condition == Condition::Adverse)
        .count();
    let agreement_ratio = if total == 0 {
        0.0
    } else {
        adverse_count as f64 / total as f64
    };

    let mut magnitudes: Vec<f64> = reports.iter().map(|r| r.magnitude).collect();
    let consensus_magnitude = median(&mut magnitudes).unwrap_or(0.0);

    let mut aux_medians = BTreeMap::new();
    for metric in metrics {
        let mut values: Vec<f64> = reports
            .iter()
            .filter_map(|r| r.aux_metrics.get(*metric).copied())
            .filter(|v| v.is_finite())
            .collect();
        if let Some(value) = median(&mut values) {
            aux_medians.insert((*metric).to_string(), value);
        }
    }

    Decision {
        is_adverse: total > 0 && agreement_ratio >= consensus_threshold,
        consensus_magnitude,
        agreement_ratio,
        window: report_set.window(),
        contributing_providers: report_set.providers(),
        aux_medians,
    }
}

/// Median after an ascending sort; `None` for an empty slice.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::policy::{DEFAULT_CONSENSUS_THRESHOLD, WIND_METRIC};
    use crate::models::{MeasurementWindow, Provider, ProviderReport};
    use crate::services::normalizer::normalize;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeSet;

    fn window() -> MeasurementWindow {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        MeasurementWindow::new(start, start + Duration::days(30))
    }

    fn set(readings: &[(Provider, Condition, f64)]) -> ReportSet {
        let reports = readings
            .iter()
            .map(|&(provider, condition, magnitude)| {
                ProviderReport::new(provider, window().start + Duration::days(1), condition, magnitude)
            })
            .collect();
        normalize(reports, window(), &BTreeSet::new()).unwrap()
    }

    #[test]
    fn three_provider_example_reaches_adverse_consensus() {
        let reports = set(&[
            (Provider::Pyth, Condition::Adverse, 42.0),
            (Provider::Switchboard, Condition::Adverse, 38.0),
            (Provider::Chainlink, Condition::Normal, 45.0),
        ]);

        let decision = decide(&reports, DEFAULT_CONSENSUS_THRESHOLD);

        assert!(decision.is_adverse);
        assert_eq!(decision.consensus_magnitude, 42.0);
        assert_eq!(decision.contributing_providers.len(), 3);
    }

    #[test]
    fn ratio_exactly_at_threshold_counts_as_adverse() {
        let reports = set(&[
            (Provider::Pyth, Condition::Adverse, 1.0),
            (Provider::Switchboard, Condition::Normal, 2.0),
        ]);

        let at = decide(&reports, 0.5);
        assert_eq!(at.agreement_ratio, 0.5);
        assert!(at.is_adverse);

        let above = decide(&reports, 0.51);
        assert!(!above.is_adverse);
    }

    #[test]
    fn adverse_iff_ratio_meets_threshold() {
        let reports = set(&[
            (Provider::Pyth, Condition::Adverse, 1.0),
            (Provider::Switchboard, Condition::Normal, 2.0),
            (Provider::Chainlink, Condition::Normal, 3.0),
        ]);
        for threshold in [0.1, 1.0 / 3.0, 0.34, 0.5, 2.0 / 3.0, 1.0] {
            let decision = decide(&reports, threshold);
            assert_eq!(decision.is_adverse, decision.agreement_ratio >= threshold);
        }
    }

    #[test]
    fn even_count_median_averages_middle_values() {
        let reports = set(&[
            (Provider::Pyth, Condition::Normal, 10.0),
            (Provider::Chainlink, Condition::Normal, 30.0),
        ]);
        assert_eq!(decide(&reports, 0.5).consensus_magnitude, 20.0);
    }

    #[test]
    fn single_report_yields_its_own_magnitude() {
        let reports = set(&[(Provider::Switchboard, Condition::Adverse, 77.5)]);
        let decision = decide(&reports, DEFAULT_CONSENSUS_THRESHOLD);
        assert_eq!(decision.agreement_ratio, 1.0);
        assert_eq!(decision.consensus_magnitude, 77.5);
    }

    #[test]
    fn median_handles_odd_and_even_counts() {
        assert_eq!(median(&mut [5.0, 1.0, 3.0]), Some(3.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn aux_metrics_use_per_metric_median_only_when_requested() {
        let at = window().start + Duration::days(2);
        let reports = vec![
            ProviderReport::new(Provider::Pyth, at, Condition::Adverse, 42.0).with_metric(WIND_METRIC, 68.0),
            ProviderReport::new(Provider::Switchboard, at, Condition::Adverse, 38.0).with_metric(WIND_METRIC, 72.0),
            ProviderReport::new(Provider::Chainlink, at, Condition::Normal, 45.0).with_metric(WIND_METRIC, 65.0),
        ];
        let report_set = normalize(reports, window(), &BTreeSet::new()).unwrap();

        let with_wind = decide_with_metrics(&report_set, DEFAULT_CONSENSUS_THRESHOLD, &[WIND_METRIC]);
        assert_eq!(with_wind.aux_medians.get(WIND_METRIC), Some(&68.0));

        let without = decide(&report_set, DEFAULT_CONSENSUS_THRESHOLD);
        assert!(without.aux_medians.is_empty());
    }
}
