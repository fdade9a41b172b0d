//! Per-user fee plans.
//!
//! A plan is either a single formula `f(x, y)` or an amount table whose
//! intervals each carry their own fee curve. The JSON surface is
//! [`FeePlanView`]; [`FeePlan`] is the stored form with owner and timestamps.

use crate::{
    error::{FeeError, FeeResult},
    regression::CurvePoint,
    types::{AmountRange, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeeMode {
    #[default]
    Table,
    Formula,
}

impl FeeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeMode::Table => "table",
            FeeMode::Formula => "formula",
        }
    }
}

impl FromStr for FeeMode {
    type Err = FeeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(FeeMode::Table),
            "formula" => Ok(FeeMode::Formula),
            other => Err(FeeError::InvalidPlan {
                reason: format!("unknown fee mode '{other}'"),
            }),
        }
    }
}

/// Fee curve configuration of one amount interval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IntervalConfig {
    /// Ceiling on the fee fraction for this interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coefficients: Option<Vec<f64>>,
    /// Control points the coefficients were fitted from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<CurvePoint>>,
}

impl IntervalConfig {
    pub fn is_empty(&self) -> bool {
        self.max_fee.is_none() && self.coefficients.is_none() && self.points.is_none()
    }
}

/// An amount interval of a table plan, keyed by its lower bound.
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub key: String,
    pub range: AmountRange,
}

/// Render a lower bound as an `interval_data` key: `0`, `100`, `99.5`.
pub fn interval_key(lower: f64) -> String {
    if lower.fract() == 0.0 && lower.abs() < 1e15 {
        format!("{}", lower as i64)
    } else {
        format!("{lower}")
    }
}

/// The fee-plan shape exchanged with collaborators (GET / PUT bodies).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeePlanView {
    #[serde(default)]
    pub mode: FeeMode,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub formula_text: String,
    #[serde(default = "default_amount_table")]
    pub amount_table: Vec<f64>,
    #[serde(default)]
    pub interval_data: BTreeMap<String, IntervalConfig>,
}

fn default_amount_table() -> Vec<f64> {
    vec![0.0]
}

/// `null` reads as "no formula", like a missing field.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Default for FeePlanView {
    fn default() -> Self {
        Self {
            mode: FeeMode::Table,
            formula_text: String::new(),
            amount_table: default_amount_table(),
            interval_data: BTreeMap::new(),
        }
    }
}

impl FeePlanView {
    /// Reject tables the calculator cannot scan: empty, negative, non-finite
    /// or not strictly ascending bounds, and non-finite curve parameters.
    pub fn validate(&self) -> FeeResult<()> {
        let invalid = |reason: String| Err(FeeError::InvalidPlan { reason });

        if self.amount_table.is_empty() {
            return invalid("amount_table must not be empty".into());
        }
        for (i, &bound) in self.amount_table.iter().enumerate() {
            if !bound.is_finite() || bound < 0.0 {
                return invalid(format!("amount_table[{i}] = {bound} is not a non-negative number"));
            }
            if i > 0 && bound <= self.amount_table[i - 1] {
                return invalid(format!("amount_table must be strictly ascending at index {i}"));
            }
        }
        for (key, config) in &self.interval_data {
            if let Some(max_fee) = config.max_fee {
                if !max_fee.is_finite() || max_fee < 0.0 {
                    return invalid(format!("interval {key}: maxFee must be a non-negative number"));
                }
            }
            if let Some(coefficients) = &config.coefficients {
                if coefficients.iter().any(|c| !c.is_finite()) {
                    return invalid(format!("interval {key}: coefficients must be finite"));
                }
            }
        }
        Ok(())
    }
}

/// A stored fee plan.
#[derive(Debug, Clone, PartialEq)]
pub struct FeePlan {
    pub user_id: UserId,
    pub mode: FeeMode,
    pub formula_text: Option<String>,
    pub amount_table: Vec<f64>,
    pub interval_data: BTreeMap<String, IntervalConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeePlan {
    pub fn from_view(user_id: UserId, view: FeePlanView, now: DateTime<Utc>) -> Self {
        let formula_text = if view.formula_text.is_empty() {
            None
        } else {
            Some(view.formula_text)
        };
        Self {
            user_id,
            mode: view.mode,
            formula_text,
            amount_table: view.amount_table,
            interval_data: view.interval_data,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_view(&self) -> FeePlanView {
        FeePlanView {
            mode: self.mode,
            formula_text: self.formula_text.clone().unwrap_or_default(),
            amount_table: self.amount_table.clone(),
            interval_data: self.interval_data.clone(),
        }
    }

    /// The freshly created default: a one-row table with no intervals.
    pub fn is_unconfigured_table(&self) -> bool {
        self.amount_table.len() <= 1 && self.interval_data.is_empty()
    }

    /// First interval, in ascending order, containing `abs_amount`.
    /// The last interval is open ended.
    pub fn locate_interval(&self, abs_amount: f64) -> Option<Interval> {
        let table = &self.amount_table;
        (0..table.len()).find_map(|i| {
            let range = AmountRange::new(table[i], table.get(i + 1).copied());
            range.contains(abs_amount).then(|| Interval {
                key: interval_key(range.lower),
                range,
            })
        })
    }

    pub fn interval_config(&self, interval: &Interval) -> Option<&IntervalConfig> {
        self.interval_data.get(&interval.key)
    }
}
