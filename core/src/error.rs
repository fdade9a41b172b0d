use crate::types::PaymentId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeeError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Payment {id} not found")]
    PaymentNotFound { id: PaymentId },

    #[error("Payment {payment_id} already has a fee record")]
    DuplicateFeeRecord { payment_id: PaymentId },

    #[error("Invalid fee plan: {reason}")]
    InvalidPlan { reason: String },

    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: f64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type FeeResult<T> = Result<T, FeeError>;
