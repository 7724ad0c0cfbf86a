//! Premium and payout calculator

use serde::{Deserialize, Serialize};

use crate::error::SettlementError;
use crate::models::{Coverage, Decision, InsuranceKind, Policy, PremiumSchedule};
use crate::models::policy::WIND_METRIC;

/// Share of the loan amount charged as the undiscounted base premium.
pub const BASE_RATE: f64 = 0.05;

/// Measurement periods are priced in 30-day units.
pub const DAYS_PER_PRICING_PERIOD: f64 = 30.0;

const BPS_DENOMINATOR: u128 = 10_000;

/// Premium multiplier per insurance kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KindFactors {
    pub weather: f64,
    pub crop: f64,
    pub business: f64,
}

impl Default for KindFactors {
    fn default() -> Self {
        Self {
            weather: 1.2,
            crop: 1.5,
            business: 1.0,
        }
    }
}

/// Pricing constants. These are illustrative calibrations, so they are
/// configuration rather than fixed law.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    pub base_rate: f64,
    pub kind_factors: KindFactors,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_rate: BASE_RATE,
            kind_factors: KindFactors::default(),
        }
    }
}

impl PricingConfig {
    pub fn kind_factor(&self, kind: InsuranceKind) -> f64 {
        match kind {
            InsuranceKind::Weather => self.kind_factors.weather,
            InsuranceKind::Crop => self.kind_factors.crop,
            InsuranceKind::Business => self.kind_factors.business,
        }
    }
}

/// `loan_amount * base_rate * (1 - deductible) * (days / 30) * kind_factor`,
/// never negative.
pub fn estimate_premium(
    loan_amount: u64,
    policy: &Policy,
    pricing: &PricingConfig,
) -> Result<f64, SettlementError> {
    if policy.deductible_bps > 10_000 {
        return Err(SettlementError::InvalidPolicy(format!(
            "deductible {} bps exceeds 10000",
            policy.deductible_bps
        )));
    }

    let base = loan_amount as f64 * pricing.base_rate;
    let deductible_factor = policy.deductible_factor();
    let period_factor = f64::from(policy.measurement_period_days) / DAYS_PER_PRICING_PERIOD;
    let kind_factor = pricing.kind_factor(policy.kind());

    let premium = base * (1.0 - deductible_factor) * period_factor * kind_factor;
    if premium.is_finite() {
        Ok(premium.max(0.0))
    } else {
        Ok(0.0)
    }
}

/// Premium split according to the policy's payment schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PremiumQuote {
    pub policy_id: String,
    pub loan_amount: u64,
    pub total: f64,
    pub schedule: PremiumSchedule,
    pub installments: u32,
    pub installment_amount: f64,
}

pub fn quote_premium(
    loan_amount: u64,
    policy: &Policy,
    pricing: &PricingConfig,
) -> Result<PremiumQuote, SettlementError> {
    let total = estimate_premium(loan_amount, policy, pricing)?;
    let installments = match policy.premium_schedule {
        PremiumSchedule::LumpSum => 1,
        PremiumSchedule::Monthly => u32::from(policy.measurement_period_days)
            .div_ceil(DAYS_PER_PRICING_PERIOD as u32)
            .max(1),
    };

    Ok(PremiumQuote {
        policy_id: policy.policy_id.clone(),
        loan_amount,
        total,
        schedule: policy.premium_schedule,
        installments,
        installment_amount: total / f64::from(installments),
    })
}

/// Which bound a decision crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    RainfallBelowMinimum,
    RainfallAboveMaximum,
    WindAboveCeiling,
    YieldBelowFloor,
    RevenueBelowFloor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoTriggerReason {
    /// Providers did not reach adverse consensus.
    NoConsensus,
    /// Consensus was adverse but every reading stayed within bounds.
    WithinBounds,
}

/// Result of `compute_payout`. Not triggering is a normal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Payout {
    NoTrigger { reason: NoTriggerReason },
    Triggered { trigger: Trigger, amount: u64 },
}

impl Payout {
    pub fn amount(&self) -> u64 {
        match self {
            Payout::NoTrigger { .. } => 0,
            Payout::Triggered { amount, .. } => *amount,
        }
    }
}

pub fn compute_payout(decision: &Decision, policy: &Policy, outstanding_principal: u64) -> Payout {
    if !decision.is_adverse {
        return Payout::NoTrigger {
            reason: NoTriggerReason::NoConsensus,
        };
    }

    let Some(trigger) = crossed_bound(decision, &policy.coverage) else {
        return Payout::NoTrigger {
            reason: NoTriggerReason::WithinBounds,
        };
    };

    let covered = u128::from(policy.coverage_cap.min(outstanding_principal));
    let retained = BPS_DENOMINATOR.saturating_sub(u128::from(policy.deductible_bps));
    let amount = covered * retained / BPS_DENOMINATOR;

    Payout::Triggered {
        trigger,
        amount: u64::try_from(amount).unwrap_or(u64::MAX),
    }
}

fn crossed_bound(decision: &Decision, coverage: &Coverage) -> Option<Trigger> {
    let magnitude = decision.consensus_magnitude;
    match *coverage {
        Coverage::Weather {
            min_rain_mm,
            max_rain_mm,
            max_wind_kmh,
        } => {
            if magnitude < min_rain_mm {
                return Some(Trigger::RainfallBelowMinimum);
            }
            if magnitude > max_rain_mm {
                return Some(Trigger::RainfallAboveMaximum);
            }
            let wind = decision.aux_medians.get(WIND_METRIC).copied();
            match (max_wind_kmh, wind) {
                (Some(ceiling), Some(wind)) if wind > ceiling => Some(Trigger::WindAboveCeiling),
                _ => None,
            }
        }
        Coverage::Crop {
            expected_yield,
            floor_ratio,
        } => (magnitude < expected_yield * floor_ratio).then_some(Trigger::YieldBelowFloor),
        Coverage::Business {
            expected_revenue,
            floor_ratio,
        } => (magnitude < expected_revenue * floor_ratio).then_some(Trigger::RevenueBelowFloor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MeasurementWindow;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::{BTreeMap, BTreeSet};

    fn policy(coverage: Coverage, deductible_bps: u16) -> Policy {
        Policy {
            policy_id: "pol-1".to_string(),
            coverage,
            coverage_cap: 1_000,
            deductible_bps,
            measurement_period_days: 30,
            premium_schedule: PremiumSchedule::LumpSum,
            required_providers: BTreeSet::new(),
            consensus_threshold: 2.0 / 3.0,
        }
    }

    fn weather() -> Coverage {
        Coverage::Weather {
            min_rain_mm: 50.0,
            max_rain_mm: 150.0,
            max_wind_kmh: Some(65.0),
        }
    }

    fn decision(is_adverse: bool, magnitude: f64) -> Decision {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        Decision {
            is_adverse,
            consensus_magnitude: magnitude,
            agreement_ratio: if is_adverse { 1.0 } else { 0.0 },
            window: MeasurementWindow::new(start, start + Duration::days(30)),
            contributing_providers: BTreeSet::new(),
            aux_medians: BTreeMap::new(),
        }
    }

    #[test]
    fn premium_follows_formula() {
        let premium = estimate_premium(1_000, &policy(weather(), 0), &PricingConfig::default()).unwrap();
        assert!((premium - 60.0).abs() < 1e-9);

        let mut crop = policy(
            Coverage::Crop {
                expected_yield: 100.0,
                floor_ratio: 0.7,
            },
            5_000,
        );
        crop.measurement_period_days = 60;
        let premium = estimate_premium(2_000, &crop, &PricingConfig::default()).unwrap();
        // 2000 * 0.05 * 0.5 * 2 * 1.5
        assert!((premium - 150.0).abs() < 1e-9);
    }

    #[test]
    fn premium_is_non_increasing_in_deductible() {
        let pricing = PricingConfig::default();
        let mut previous = f64::INFINITY;
        for bps in (0..=10_000).step_by(250) {
            let premium = estimate_premium(50_000, &policy(weather(), bps), &pricing).unwrap();
            assert!(premium >= 0.0);
            assert!(premium <= previous);
            previous = premium;
        }
        assert_eq!(previous, 0.0);
    }

    #[test]
    fn premium_rejects_deductible_over_full() {
        let err = estimate_premium(1_000, &policy(weather(), 10_001), &PricingConfig::default())
            .unwrap_err();
        assert!(matches!(err, SettlementError::InvalidPolicy(_)));
    }

    #[test]
    fn overridden_pricing_constants_apply() {
        let pricing = PricingConfig {
            base_rate: 0.10,
            kind_factors: KindFactors {
                weather: 2.0,
                ..KindFactors::default()
            },
        };
        let premium = estimate_premium(1_000, &policy(weather(), 0), &pricing).unwrap();
        assert!((premium - 200.0).abs() < 1e-9);
    }

    #[test]
    fn monthly_schedule_splits_by_started_month() {
        let mut monthly = policy(weather(), 0);
        monthly.premium_schedule = PremiumSchedule::Monthly;
        monthly.measurement_period_days = 45;

        let quote = quote_premium(1_000, &monthly, &PricingConfig::default()).unwrap();

        assert_eq!(quote.installments, 2);
        assert!((quote.installment_amount * 2.0 - quote.total).abs() < 1e-9);

        let lump = quote_premium(1_000, &policy(weather(), 0), &PricingConfig::default()).unwrap();
        assert_eq!(lump.installments, 1);
    }

    #[test]
    fn adverse_rainfall_below_range_triggers_payout() {
        let payout = compute_payout(&decision(true, 42.0), &policy(weather(), 0), 5_000);
        assert_eq!(
            payout,
            Payout::Triggered {
                trigger: Trigger::RainfallBelowMinimum,
                amount: 1_000
            }
        );
    }

    #[test]
    fn normal_consensus_is_no_trigger() {
        let payout = compute_payout(&decision(false, 90.0), &policy(weather(), 0), 5_000);
        assert_eq!(
            payout,
            Payout::NoTrigger {
                reason: NoTriggerReason::NoConsensus
            }
        );
    }

    #[test]
    fn adverse_within_bounds_is_no_trigger() {
        let payout = compute_payout(&decision(true, 90.0), &policy(weather(), 0), 5_000);
        assert_eq!(payout.amount(), 0);
        assert!(matches!(
            payout,
            Payout::NoTrigger {
                reason: NoTriggerReason::WithinBounds
            }
        ));
    }

    #[test]
    fn wind_above_ceiling_triggers_inside_rain_range() {
        let mut windy = decision(true, 90.0);
        windy.aux_medians.insert(WIND_METRIC.to_string(), 70.0);

        let payout = compute_payout(&windy, &policy(weather(), 0), 5_000);

        assert!(matches!(
            payout,
            Payout::Triggered {
                trigger: Trigger::WindAboveCeiling,
                ..
            }
        ));
    }

    #[test]
    fn payout_is_capped_by_principal_and_reduced_by_deductible() {
        let payout = compute_payout(&decision(true, 10.0), &policy(weather(), 2_500), 600);
        assert_eq!(payout.amount(), 450);

        let full_deductible = compute_payout(&decision(true, 10.0), &policy(weather(), 10_000), 600);
        assert_eq!(full_deductible.amount(), 0);
    }

    #[test]
    fn crop_and_business_use_baseline_floor() {
        let crop = policy(
            Coverage::Crop {
                expected_yield: 1_000.0,
                floor_ratio: 0.7,
            },
            0,
        );
        assert_eq!(compute_payout(&decision(true, 650.0), &crop, 5_000).amount(), 1_000);
        assert_eq!(compute_payout(&decision(true, 700.0), &crop, 5_000).amount(), 0);

        let business = policy(
            Coverage::Business {
                expected_revenue: 10_000.0,
                floor_ratio: 0.65,
            },
            0,
        );
        assert!(matches!(
            compute_payout(&decision(true, 6_000.0), &business, 5_000),
            Payout::Triggered {
                trigger: Trigger::RevenueBelowFloor,
                ..
            }
        ));
    }
}
