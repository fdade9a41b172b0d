//! Fee ledger audit events.
//!
//! RULE: every ledger transition appends exactly one event, inside the
//! same transaction as the state change it describes.

use crate::{
    plan::FeeMode,
    types::{PaymentId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeeEvent {
    FeeCharged {
        payment_id:      PaymentId,
        user_id:         UserId,
        fee:             f64,
        original_amount: f64,
        adjusted_amount: f64,
    },
    FeeRefunded {
        payment_id: PaymentId,
        user_id:    UserId,
        fee:        f64,
    },
    FeeRecomputed {
        payment_id:      PaymentId,
        user_id:         UserId,
        previous_fee:    Option<f64>,
        fee:             f64,
        original_amount: f64,
        adjusted_amount: f64,
    },
    /// A recompute produced no fee and removed the existing record.
    FeeCleared {
        payment_id:      PaymentId,
        user_id:         UserId,
        previous_fee:    f64,
        original_amount: f64,
    },
    PlanSaved {
        user_id: UserId,
        mode:    FeeMode,
    },
}

impl FeeEvent {
    /// Stable name stored in the `event_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            FeeEvent::FeeCharged { .. }    => "fee_charged",
            FeeEvent::FeeRefunded { .. }   => "fee_refunded",
            FeeEvent::FeeRecomputed { .. } => "fee_recomputed",
            FeeEvent::FeeCleared { .. }    => "fee_cleared",
            FeeEvent::PlanSaved { .. }     => "plan_saved",
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            FeeEvent::FeeCharged { user_id, .. }
            | FeeEvent::FeeRefunded { user_id, .. }
            | FeeEvent::FeeRecomputed { user_id, .. }
            | FeeEvent::FeeCleared { user_id, .. }
            | FeeEvent::PlanSaved { user_id, .. } => *user_id,
        }
    }

    pub fn payment_id(&self) -> Option<PaymentId> {
        match self {
            FeeEvent::FeeCharged { payment_id, .. }
            | FeeEvent::FeeRefunded { payment_id, .. }
            | FeeEvent::FeeRecomputed { payment_id, .. }
            | FeeEvent::FeeCleared { payment_id, .. } => Some(*payment_id),
            FeeEvent::PlanSaved { .. } => None,
        }
    }
}

/// A persisted row of the fee event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeEventEntry {
    pub id:         Option<i64>,
    pub user_id:    UserId,
    pub payment_id: Option<PaymentId>,
    pub event_type: String,
    pub payload:    String,
    pub created_at: DateTime<Utc>,
}

impl FeeEventEntry {
    pub fn new(event: &FeeEvent, created_at: DateTime<Utc>) -> serde_json::Result<Self> {
        Ok(Self {
            id:         None,
            user_id:    event.user_id(),
            payment_id: event.payment_id(),
            event_type: event.type_name().to_string(),
            payload:    serde_json::to_string(event)?,
            created_at,
        })
    }

    /// Decode the payload back into the event it was written from.
    pub fn event(&self) -> serde_json::Result<FeeEvent> {
        serde_json::from_str(&self.payload)
    }
}
