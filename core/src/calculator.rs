//! Fee computation for a single payment amount.
//!
//! RULE: a fee is always a usable number. Missing plans, intervals,
//! coefficients or broken formulas all resolve to 0, never to an error.
//! Only collaborator (store) failures propagate.

use crate::{
    config::{FeeConfig, RoundingPolicy},
    error::FeeResult,
    formula,
    plan::{FeeMode, FeePlan},
    regression,
    types::{AmountRange, UserId},
};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal::prelude::ToPrimitive;

/// Read access to per-user fee plans.
pub trait PlanSource {
    fn load_fee_plan(&self, user_id: UserId) -> FeeResult<Option<FeePlan>>;
}

/// Share of a user's payments whose magnitude falls into a range.
pub trait FrequencyOracle {
    /// Fraction in `[0, 1]`; 0.0 when the user has no payments.
    fn payment_frequency(&self, user_id: UserId, range: AmountRange) -> FeeResult<f64>;
}

#[derive(Debug, Clone, Default)]
pub struct FeeCalculator {
    config: FeeConfig,
}

impl FeeCalculator {
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    /// Fee to charge on `amount`, in `[0, |amount|]`, rounded to cents.
    pub fn compute_fee<P, O>(
        &self,
        amount: f64,
        user_id: UserId,
        plans: &P,
        oracle: &O,
    ) -> FeeResult<f64>
    where
        P: PlanSource + ?Sized,
        O: FrequencyOracle + ?Sized,
    {
        if !amount.is_finite() {
            log::warn!("user={user_id} fee: non-finite amount {amount}, no fee");
            return Ok(0.0);
        }
        let abs_amount = amount.abs();

        let plan = match plans.load_fee_plan(user_id)? {
            Some(plan) => plan,
            None => return Ok(0.0),
        };

        let raw = match plan.mode {
            FeeMode::Formula => self.formula_fee(&plan, abs_amount, oracle)?,
            FeeMode::Table => self.table_fee(&plan, abs_amount, oracle)?,
        };

        if !raw.is_finite() {
            log::warn!("user={user_id} fee: non-finite raw fee {raw}, no fee");
            return Ok(0.0);
        }

        let capped = raw.min(abs_amount);
        let mut fee = round_currency(capped, self.config.rounding);
        // Rounding a sub-cent amount up can overshoot it.
        if fee > abs_amount {
            fee = truncate_currency(abs_amount);
        }
        if fee < self.config.minimum_charge {
            return Ok(0.0);
        }

        log::debug!("user={user_id} fee: amount={amount:.2} mode={} fee={fee:.2}", plan.mode.as_str());
        Ok(fee)
    }

    fn formula_fee<O>(&self, plan: &FeePlan, abs_amount: f64, oracle: &O) -> FeeResult<f64>
    where
        O: FrequencyOracle + ?Sized,
    {
        let text = match plan.formula_text.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => return Ok(0.0),
        };

        let frequency = oracle.payment_frequency(plan.user_id, AmountRange::ALL)?;
        match formula::evaluate(text, abs_amount, frequency) {
            Some(value) => Ok(value.abs()),
            None => {
                log::warn!("user={} fee: formula '{text}' failed to evaluate, no fee", plan.user_id);
                Ok(0.0)
            }
        }
    }

    fn table_fee<O>(&self, plan: &FeePlan, abs_amount: f64, oracle: &O) -> FeeResult<f64>
    where
        O: FrequencyOracle + ?Sized,
    {
        if plan.is_unconfigured_table() {
            return Ok(0.0);
        }

        let interval = match plan.locate_interval(abs_amount) {
            Some(i) => i,
            None => return Ok(0.0),
        };
        let config = match plan.interval_config(&interval) {
            Some(c) if !c.is_empty() => c,
            _ => {
                log::debug!("user={} fee: interval {} has no configuration", plan.user_id, interval.key);
                return Ok(0.0);
            }
        };

        let max_fee = config.max_fee.unwrap_or(self.config.default_max_fee_fraction);
        let coefficients = match &config.coefficients {
            Some(c) => c,
            None => return Ok(0.0),
        };

        let frequency = oracle.payment_frequency(plan.user_id, interval.range)?;
        let fraction = regression::evaluate(coefficients, frequency).clamp(0.0, max_fee.max(0.0));
        log::debug!(
            "user={} fee: interval={} frequency={frequency:.4} fraction={fraction:.4}",
            plan.user_id, interval.key
        );
        Ok(abs_amount * fraction)
    }
}

/// Amount left after charging `fee`: always `amount - fee`, so an expense
/// becomes more negative and an income becomes smaller.
pub fn apply_fee_to_amount(amount: f64, fee: f64, rounding: RoundingPolicy) -> f64 {
    round_currency(amount - fee, rounding)
}

/// Round to two decimal places. The value is rounded as it prints
/// (shortest round-trip form), so `0.015` is a true midpoint.
pub fn round_currency(value: f64, rounding: RoundingPolicy) -> f64 {
    let strategy = match rounding {
        RoundingPolicy::HalfUp => RoundingStrategy::MidpointAwayFromZero,
        RoundingPolicy::HalfEven => RoundingStrategy::MidpointNearestEven,
    };
    let rounded = value
        .to_string()
        .parse::<Decimal>()
        .ok()
        .and_then(|d| d.round_dp_with_strategy(2, strategy).to_f64());
    match rounded {
        Some(v) => v,
        // Outside Decimal's range (or NaN/inf): plain float rounding.
        None => (value * 100.0).round() / 100.0,
    }
}

/// Cut to two decimal places toward zero.
fn truncate_currency(value: f64) -> f64 {
    let truncated = value
        .to_string()
        .parse::<Decimal>()
        .ok()
        .and_then(|d| d.round_dp_with_strategy(2, RoundingStrategy::ToZero).to_f64());
    match truncated {
        Some(v) => v,
        None => (value * 100.0).trunc() / 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_never_rounds_up() {
        assert_eq!(truncate_currency(0.015), 0.01);
        assert_eq!(truncate_currency(0.019), 0.01);
        assert_eq!(truncate_currency(0.004), 0.0);
        assert_eq!(truncate_currency(12.0), 12.0);
    }

    #[test]
    fn half_up_rounds_midpoints_away_from_zero() {
        assert_eq!(round_currency(0.015, RoundingPolicy::HalfUp), 0.02);
        assert_eq!(round_currency(0.025, RoundingPolicy::HalfUp), 0.03);
        assert_eq!(round_currency(-0.015, RoundingPolicy::HalfUp), -0.02);
        assert_eq!(round_currency(0.004, RoundingPolicy::HalfUp), 0.0);
        assert_eq!(round_currency(1.005, RoundingPolicy::HalfUp), 1.01);
    }

    #[test]
    fn half_even_rounds_midpoints_to_even() {
        assert_eq!(round_currency(0.015, RoundingPolicy::HalfEven), 0.02);
        assert_eq!(round_currency(0.025, RoundingPolicy::HalfEven), 0.02);
    }

    #[test]
    fn rounding_survives_extreme_values() {
        let huge = round_currency(1e30, RoundingPolicy::HalfUp);
        assert!(((huge - 1e30) / 1e30).abs() < 1e-12);
        assert!(round_currency(f64::NAN, RoundingPolicy::HalfUp).is_nan());
    }

    #[test]
    fn fee_is_subtracted_regardless_of_sign() {
        assert_eq!(apply_fee_to_amount(500.0, 5.0, RoundingPolicy::HalfUp), 495.0);
        assert_eq!(apply_fee_to_amount(-100.0, 0.01, RoundingPolicy::HalfUp), -100.01);
        assert_eq!(apply_fee_to_amount(0.1, 0.2, RoundingPolicy::HalfUp), -0.1);
    }
}
