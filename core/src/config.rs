//! Engine tunables, loaded from a JSON file or taken from defaults.

use serde::{Deserialize, Serialize};

/// How fees and adjusted amounts are rounded to cents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoundingPolicy {
    /// Midpoint away from zero: 0.015 -> 0.02, -0.015 -> -0.02.
    #[default]
    HalfUp,
    /// Banker's rounding: 0.015 -> 0.02, 0.025 -> 0.02.
    HalfEven,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeeConfig {
    /// Rounded fees below this value are not charged at all.
    pub minimum_charge: f64,
    /// Ceiling used for an interval whose configuration has no `maxFee`.
    pub default_max_fee_fraction: f64,
    /// Upper bound on the fitted polynomial degree.
    pub max_regression_degree: usize,
    pub rounding: RoundingPolicy,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            minimum_charge: 0.01,
            default_max_fee_fraction: 0.1,
            max_regression_degree: 5,
            rounding: RoundingPolicy::HalfUp,
        }
    }
}

impl FeeConfig {
    /// Load from a JSON file. Missing fields fall back to the defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: FeeConfig = serde_json::from_str(&content)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> anyhow::Result<()> {
        if !self.minimum_charge.is_finite() || self.minimum_charge < 0.0 {
            anyhow::bail!("minimum_charge must be a non-negative number");
        }
        if !self.default_max_fee_fraction.is_finite() || self.default_max_fee_fraction < 0.0 {
            anyhow::bail!("default_max_fee_fraction must be a non-negative number");
        }
        if self.max_regression_degree == 0 {
            anyhow::bail!("max_regression_degree must be at least 1");
        }
        Ok(())
    }
}
