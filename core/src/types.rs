//! Shared primitive types used across the fee engine.

/// Identifier of the user who owns payments and a fee plan.
pub type UserId = i64;

/// Identifier of a single payment row.
pub type PaymentId = i64;

/// A half-open amount range `[lower, upper)`. `upper == None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmountRange {
    pub lower: f64,
    pub upper: Option<f64>,
}

impl AmountRange {
    /// The whole non-negative axis, `[0, ∞)`.
    pub const ALL: AmountRange = AmountRange { lower: 0.0, upper: None };

    pub fn new(lower: f64, upper: Option<f64>) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && self.upper.map_or(true, |hi| value < hi)
    }
}
