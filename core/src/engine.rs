//! The fee engine, the single entry point collaborators talk to.
//!
//! RULES:
//!   - Every write goes through a `FeeStore` transaction.
//!   - Fee records are only created, refunded or recomputed by the ledger.
//!   - Plan saves are validated before they touch the store.

use crate::{
    calculator::FeeCalculator,
    config::FeeConfig,
    error::{FeeError, FeeResult},
    event::{FeeEvent, FeeEventEntry},
    formula,
    ledger::{FeeLedger, FeeOutcome, LedgerStore},
    plan::{FeeMode, FeePlan, FeePlanView, IntervalConfig},
    regression::{self, CurvePoint},
    store::{FeeRecord, FeeStore},
    types::{PaymentId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What `record_payment` hands back: the stored (fee-adjusted) amount and
/// the fee that was charged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PaymentReceipt {
    pub payment_id:      PaymentId,
    pub fee:             f64,
    pub amount:          f64,
    pub original_amount: f64,
}

/// A payment as listed to collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentView {
    pub id:              PaymentId,
    pub user_id:         UserId,
    pub amount:          f64,
    pub description:     Option<String>,
    pub created_at:      DateTime<Utc>,
    pub transaction_fee: Option<f64>,
}

pub struct FeeEngine {
    calculator: FeeCalculator,
    store:      FeeStore,
}

impl FeeEngine {
    pub fn new(store: FeeStore, config: FeeConfig) -> Self {
        Self {
            calculator: FeeCalculator::new(config),
            store,
        }
    }

    /// In-memory, migrated engine with default configuration.
    pub fn build_test() -> FeeResult<Self> {
        let store = FeeStore::in_memory()?;
        store.migrate()?;
        Ok(Self::new(store, FeeConfig::default()))
    }

    pub fn store(&self) -> &FeeStore {
        &self.store
    }

    pub fn config(&self) -> &FeeConfig {
        self.calculator.config()
    }

    pub fn ledger(&self) -> FeeLedger<'_, FeeStore> {
        FeeLedger::new(&self.calculator, &self.store)
    }

    // ── Fee plans ──────────────────────────────────────────────────

    /// The user's plan, or the unconfigured default when none is stored.
    pub fn get_fee_plan(&self, user_id: UserId) -> FeeResult<FeePlanView> {
        Ok(self
            .store
            .get_fee_plan(user_id)?
            .map(|plan| plan.to_view())
            .unwrap_or_default())
    }

    /// Validate and store the user's plan, replacing any previous one.
    pub fn put_fee_plan(&self, user_id: UserId, view: FeePlanView) -> FeeResult<FeePlan> {
        view.validate()?;
        if view.mode == FeeMode::Formula
            && !view.formula_text.is_empty()
            && !formula::validate(&view.formula_text)
        {
            // Stored anyway: fees under an unusable formula resolve to 0.
            log::warn!("user={user_id} plan: formula '{}' does not validate", view.formula_text);
        }

        let plan = FeePlan::from_view(user_id, view, Utc::now());
        self.store.transaction(|store| {
            store.upsert_fee_plan(&plan)?;
            store.record_fee_event(&FeeEvent::PlanSaved { user_id, mode: plan.mode })?;
            Ok(())
        })?;
        log::info!("user={user_id} plan: saved {} plan", plan.mode.as_str());

        Ok(self.store.get_fee_plan(user_id)?.unwrap_or(plan))
    }

    pub fn validate_formula(&self, text: &str) -> bool {
        formula::validate(text)
    }

    /// Fit an interval's fee curve and package it with its ceiling.
    pub fn fit_interval(&self, points: &[CurvePoint], max_fee: f64) -> IntervalConfig {
        let coefficients =
            regression::fit_with_degree(points, max_fee, self.config().max_regression_degree);
        IntervalConfig {
            max_fee:      Some(max_fee),
            coefficients: Some(coefficients),
            points:       (!points.is_empty()).then(|| points.to_vec()),
        }
    }

    pub fn compute_fee(&self, user_id: UserId, amount: f64) -> FeeResult<f64> {
        self.calculator
            .compute_fee(amount, user_id, &self.store, &self.store)
    }

    // ── Payment book ───────────────────────────────────────────────

    /// Store a payment and charge its fee, as one transaction.
    pub fn record_payment(
        &self,
        user_id: UserId,
        amount: f64,
        description: Option<&str>,
    ) -> FeeResult<PaymentReceipt> {
        if !amount.is_finite() {
            return Err(FeeError::InvalidAmount { amount });
        }

        self.store.transaction(|store| {
            let payment_id = store.insert_payment(user_id, amount, description)?;
            let FeeOutcome { fee, adjusted_amount } = self.ledger().create_fee_record(payment_id)?;
            Ok(PaymentReceipt {
                payment_id,
                fee,
                amount: adjusted_amount,
                original_amount: amount,
            })
        })
    }

    /// Change a payment's raw amount and recompute its fee.
    pub fn update_payment_amount(&self, payment_id: PaymentId, new_amount: f64) -> FeeResult<FeeOutcome> {
        self.ledger().recompute_fee_record(payment_id, new_amount)
    }

    /// Refund the payment's fee and delete it. Returns the refunded fee.
    pub fn delete_payment(&self, payment_id: PaymentId) -> FeeResult<f64> {
        self.store.transaction(|store| {
            if store.get_payment(payment_id)?.is_none() {
                return Err(FeeError::PaymentNotFound { id: payment_id });
            }
            let refunded = self.ledger().refund_fee_record(payment_id)?;
            store.delete_payment(payment_id)?;
            Ok(refunded)
        })
    }

    pub fn payments_for_user(&self, user_id: UserId) -> FeeResult<Vec<PaymentView>> {
        let rows = self.store.payments_with_fees(user_id)?;
        Ok(rows
            .into_iter()
            .map(|(p, fee)| PaymentView {
                id:              p.id,
                user_id:         p.user_id,
                amount:          p.amount,
                description:     p.description,
                created_at:      p.created_at,
                transaction_fee: fee,
            })
            .collect())
    }

    /// The user's outstanding fee records, in payment order.
    pub fn fee_records(&self, user_id: UserId) -> FeeResult<Vec<FeeRecord>> {
        self.store.fee_records_for_user(user_id)
    }

    pub fn fee_history(&self, user_id: UserId) -> FeeResult<Vec<FeeEventEntry>> {
        self.store.fee_events_for_user(user_id)
    }
}
