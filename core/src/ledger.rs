//! Fee ledger: create, refund and recompute the fee record of a payment.
//!
//! Per payment there are two states, NoRecord and HasRecord:
//!
//! ```text
//!   create     NoRecord  -> HasRecord  (fee > 0)   | NoRecord (fee == 0)
//!   refund     HasRecord -> NoRecord                | NoRecord -> NoRecord, returns 0
//!   recompute  any       -> HasRecord  (fee > 0)   | NoRecord (fee == 0)
//! ```
//!
//! RULE: every operation runs inside `LedgerStore::atomically`, so the
//! read-compute-write sequence for one payment is a single transaction.

use crate::{
    calculator::{apply_fee_to_amount, FeeCalculator, FrequencyOracle, PlanSource},
    error::{FeeError, FeeResult},
    event::FeeEvent,
    store::{FeeRecord, Payment},
    types::PaymentId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Storage the ledger needs on top of plan and frequency lookups.
pub trait LedgerStore: PlanSource + FrequencyOracle {
    /// Run `f` as one atomic unit against this store.
    fn atomically<T, F>(&self, f: F) -> FeeResult<T>
    where
        Self: Sized,
        F: FnOnce(&Self) -> FeeResult<T>;

    fn load_payment(&self, payment_id: PaymentId) -> FeeResult<Option<Payment>>;
    fn set_payment_amount(&self, payment_id: PaymentId, amount: f64) -> FeeResult<()>;

    fn load_fee_record(&self, payment_id: PaymentId) -> FeeResult<Option<FeeRecord>>;
    /// Insert, or update in place when the payment already has a record.
    fn save_fee_record(&self, record: &FeeRecord) -> FeeResult<()>;
    fn delete_fee_record(&self, payment_id: PaymentId) -> FeeResult<()>;

    fn record_fee_event(&self, event: &FeeEvent) -> FeeResult<()>;
}

/// Result of charging (or not charging) a fee on a payment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeeOutcome {
    pub fee:             f64,
    pub adjusted_amount: f64,
}

pub struct FeeLedger<'a, S> {
    calculator: &'a FeeCalculator,
    store:      &'a S,
}

impl<'a, S: LedgerStore> FeeLedger<'a, S> {
    pub fn new(calculator: &'a FeeCalculator, store: &'a S) -> Self {
        Self { calculator, store }
    }

    /// Charge the fee for a newly stored payment and record it.
    pub fn create_fee_record(&self, payment_id: PaymentId) -> FeeResult<FeeOutcome> {
        self.store.atomically(|store| {
            let payment = load_payment(store, payment_id)?;
            if store.load_fee_record(payment_id)?.is_some() {
                return Err(FeeError::DuplicateFeeRecord { payment_id });
            }

            let original = payment.amount;
            let fee = self
                .calculator
                .compute_fee(original, payment.user_id, store, store)?;
            if fee <= 0.0 {
                return Ok(FeeOutcome { fee: 0.0, adjusted_amount: original });
            }

            let adjusted = apply_fee_to_amount(original, fee, self.calculator.config().rounding);
            store.set_payment_amount(payment_id, adjusted)?;

            let now = Utc::now();
            store.save_fee_record(&FeeRecord {
                payment_id,
                user_id: payment.user_id,
                fee_amount: fee,
                original_amount: original,
                created_at: now,
                updated_at: now,
            })?;
            store.record_fee_event(&FeeEvent::FeeCharged {
                payment_id,
                user_id: payment.user_id,
                fee,
                original_amount: original,
                adjusted_amount: adjusted,
            })?;

            log::info!(
                "user={} payment={payment_id} ledger: charged {fee:.2}, {original:.2} -> {adjusted:.2}",
                payment.user_id
            );
            Ok(FeeOutcome { fee, adjusted_amount: adjusted })
        })
    }

    /// Remove the payment's fee record and return the fee it held.
    /// Returns 0 when there is nothing to refund.
    pub fn refund_fee_record(&self, payment_id: PaymentId) -> FeeResult<f64> {
        self.store.atomically(|store| {
            let record = match store.load_fee_record(payment_id)? {
                Some(r) => r,
                None => return Ok(0.0),
            };

            store.delete_fee_record(payment_id)?;
            store.record_fee_event(&FeeEvent::FeeRefunded {
                payment_id,
                user_id: record.user_id,
                fee: record.fee_amount,
            })?;

            log::info!(
                "user={} payment={payment_id} ledger: refunded {:.2}",
                record.user_id, record.fee_amount
            );
            Ok(record.fee_amount)
        })
    }

    /// Recompute the fee after the payment's raw amount changed to
    /// `new_amount`, and store the freshly adjusted amount.
    pub fn recompute_fee_record(&self, payment_id: PaymentId, new_amount: f64) -> FeeResult<FeeOutcome> {
        if !new_amount.is_finite() {
            return Err(FeeError::InvalidAmount { amount: new_amount });
        }

        self.store.atomically(|store| {
            let payment = load_payment(store, payment_id)?;
            let user_id = payment.user_id;
            let existing = store.load_fee_record(payment_id)?;

            let fee = self.calculator.compute_fee(new_amount, user_id, store, store)?;
            let adjusted = if fee > 0.0 {
                apply_fee_to_amount(new_amount, fee, self.calculator.config().rounding)
            } else {
                new_amount
            };

            match (existing, fee > 0.0) {
                (Some(record), true) => {
                    store.save_fee_record(&FeeRecord {
                        fee_amount: fee,
                        original_amount: new_amount,
                        updated_at: Utc::now(),
                        ..record
                    })?;
                    store.record_fee_event(&FeeEvent::FeeRecomputed {
                        payment_id,
                        user_id,
                        previous_fee: Some(record.fee_amount),
                        fee,
                        original_amount: new_amount,
                        adjusted_amount: adjusted,
                    })?;
                }
                (Some(record), false) => {
                    store.delete_fee_record(payment_id)?;
                    store.record_fee_event(&FeeEvent::FeeCleared {
                        payment_id,
                        user_id,
                        previous_fee: record.fee_amount,
                        original_amount: new_amount,
                    })?;
                }
                (None, true) => {
                    let now = Utc::now();
                    store.save_fee_record(&FeeRecord {
                        payment_id,
                        user_id,
                        fee_amount: fee,
                        original_amount: new_amount,
                        created_at: now,
                        updated_at: now,
                    })?;
                    store.record_fee_event(&FeeEvent::FeeRecomputed {
                        payment_id,
                        user_id,
                        previous_fee: None,
                        fee,
                        original_amount: new_amount,
                        adjusted_amount: adjusted,
                    })?;
                }
                (None, false) => {}
            }

            store.set_payment_amount(payment_id, adjusted)?;
            log::debug!("user={user_id} payment={payment_id} ledger: recomputed fee={fee:.2} amount={adjusted:.2}");
            Ok(FeeOutcome { fee, adjusted_amount: adjusted })
        })
    }
}

fn load_payment<S: LedgerStore>(store: &S, payment_id: PaymentId) -> FeeResult<Payment> {
    store
        .load_payment(payment_id)?
        .ok_or(FeeError::PaymentNotFound { id: payment_id })
}
