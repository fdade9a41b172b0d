//! Fee ledger integration tests: create, refund, recompute and their audit trail.

use feebook_core::{
    engine::FeeEngine,
    error::FeeError,
    event::FeeEvent,
    ledger::LedgerStore,
    plan::{FeeMode, FeePlanView},
};

const USER: i64 = 7;

/// Engine with a 1% formula plan for USER.
fn engine_with_one_percent() -> FeeEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    let engine = FeeEngine::build_test().unwrap();
    engine
        .put_fee_plan(
            USER,
            FeePlanView {
                mode: FeeMode::Formula,
                formula_text: "0.01*x".into(),
                ..FeePlanView::default()
            },
        )
        .unwrap();
    engine
}

fn ledger_events(engine: &FeeEngine) -> Vec<FeeEvent> {
    engine
        .fee_history(USER)
        .unwrap()
        .iter()
        .map(|e| e.event().unwrap())
        .filter(|e| !matches!(e, FeeEvent::PlanSaved { .. }))
        .collect()
}

/// Creating a record charges the fee and stores the adjusted amount.
#[test]
fn create_charges_fee_and_adjusts_payment() {
    let engine = engine_with_one_percent();
    let payment_id = engine.store().insert_payment(USER, 500.0, Some("salary")).unwrap();

    let outcome = engine.ledger().create_fee_record(payment_id).unwrap();
    assert_eq!(outcome.fee, 5.0);
    assert_eq!(outcome.adjusted_amount, 495.0);

    let payment = engine.store().get_payment(payment_id).unwrap().unwrap();
    assert_eq!(payment.amount, 495.0);

    let record = engine.store().get_fee_record(payment_id).unwrap().unwrap();
    assert_eq!(record.fee_amount, 5.0);
    assert_eq!(record.original_amount, 500.0);
    assert_eq!(record.user_id, USER);

    assert_eq!(
        ledger_events(&engine),
        vec![FeeEvent::FeeCharged {
            payment_id,
            user_id: USER,
            fee: 5.0,
            original_amount: 500.0,
            adjusted_amount: 495.0,
        }]
    );
}

/// Expenses become more negative by the fee.
#[test]
fn create_on_expense_subtracts_fee() {
    let engine = engine_with_one_percent();
    let payment_id = engine.store().insert_payment(USER, -200.0, None).unwrap();
    let outcome = engine.ledger().create_fee_record(payment_id).unwrap();
    assert_eq!(outcome.fee, 2.0);
    assert_eq!(outcome.adjusted_amount, -202.0);
}

/// No fee, no record.
#[test]
fn create_without_fee_leaves_no_record() {
    let engine = engine_with_one_percent();
    let payment_id = engine.store().insert_payment(USER, 0.4, None).unwrap();

    let outcome = engine.ledger().create_fee_record(payment_id).unwrap();
    assert_eq!(outcome.fee, 0.0);
    assert_eq!(outcome.adjusted_amount, 0.4);
    assert!(engine.store().get_fee_record(payment_id).unwrap().is_none());
    assert!(ledger_events(&engine).is_empty());
}

#[test]
fn create_twice_is_rejected() {
    let engine = engine_with_one_percent();
    let payment_id = engine.store().insert_payment(USER, 500.0, None).unwrap();
    engine.ledger().create_fee_record(payment_id).unwrap();

    let err = engine.ledger().create_fee_record(payment_id).unwrap_err();
    assert!(matches!(err, FeeError::DuplicateFeeRecord { payment_id: id } if id == payment_id));
    // The first charge stands untouched.
    assert_eq!(engine.store().get_payment(payment_id).unwrap().unwrap().amount, 495.0);
    assert_eq!(engine.store().fee_record_count().unwrap(), 1);
}

#[test]
fn create_for_unknown_payment_fails() {
    let engine = engine_with_one_percent();
    let err = engine.ledger().create_fee_record(999).unwrap_err();
    assert!(matches!(err, FeeError::PaymentNotFound { id: 999 }));
}

/// Refund returns the fee once, then 0.
#[test]
fn refund_is_idempotent() {
    let engine = engine_with_one_percent();
    let payment_id = engine.store().insert_payment(USER, 500.0, None).unwrap();
    engine.ledger().create_fee_record(payment_id).unwrap();

    assert_eq!(engine.ledger().refund_fee_record(payment_id).unwrap(), 5.0);
    assert!(engine.store().get_fee_record(payment_id).unwrap().is_none());
    assert_eq!(engine.ledger().refund_fee_record(payment_id).unwrap(), 0.0);

    let events = ledger_events(&engine);
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[1],
        FeeEvent::FeeRefunded { payment_id, user_id: USER, fee: 5.0 }
    );
}

/// Refunding a payment that never had a fee (or never existed) returns 0.
#[test]
fn refund_without_record_returns_zero() {
    let engine = engine_with_one_percent();
    assert_eq!(engine.ledger().refund_fee_record(12345).unwrap(), 0.0);
}

/// Existing record, new amount still charged: updated in place.
#[test]
fn recompute_updates_existing_record() {
    let engine = engine_with_one_percent();
    let payment_id = engine.store().insert_payment(USER, 500.0, None).unwrap();
    engine.ledger().create_fee_record(payment_id).unwrap();
    let before = engine.store().get_fee_record(payment_id).unwrap().unwrap();

    let outcome = engine.ledger().recompute_fee_record(payment_id, 1000.0).unwrap();
    assert_eq!(outcome.fee, 10.0);
    assert_eq!(outcome.adjusted_amount, 990.0);

    let after = engine.store().get_fee_record(payment_id).unwrap().unwrap();
    assert_eq!(after.fee_amount, 10.0);
    assert_eq!(after.original_amount, 1000.0);
    assert_eq!(after.created_at, before.created_at);
    assert!(after.updated_at >= before.updated_at);
    assert_eq!(engine.store().get_payment(payment_id).unwrap().unwrap().amount, 990.0);

    assert_eq!(
        ledger_events(&engine).last(),
        Some(&FeeEvent::FeeRecomputed {
            payment_id,
            user_id: USER,
            previous_fee: Some(5.0),
            fee: 10.0,
            original_amount: 1000.0,
            adjusted_amount: 990.0,
        })
    );
}

/// Existing record, new amount not charged: record removed.
#[test]
fn recompute_to_zero_fee_deletes_record() {
    let engine = engine_with_one_percent();
    let payment_id = engine.store().insert_payment(USER, 500.0, None).unwrap();
    engine.ledger().create_fee_record(payment_id).unwrap();

    let outcome = engine.ledger().recompute_fee_record(payment_id, 0.4).unwrap();
    assert_eq!(outcome.fee, 0.0);
    assert_eq!(outcome.adjusted_amount, 0.4);
    assert!(engine.store().get_fee_record(payment_id).unwrap().is_none());
    assert_eq!(engine.store().get_payment(payment_id).unwrap().unwrap().amount, 0.4);

    assert!(matches!(
        ledger_events(&engine).last(),
        Some(FeeEvent::FeeCleared { previous_fee, .. }) if *previous_fee == 5.0
    ));
}

/// No record yet, new amount charged: record created.
#[test]
fn recompute_creates_missing_record() {
    let engine = engine_with_one_percent();
    let payment_id = engine.store().insert_payment(USER, 0.4, None).unwrap();
    engine.ledger().create_fee_record(payment_id).unwrap();
    assert!(engine.store().get_fee_record(payment_id).unwrap().is_none());

    let outcome = engine.ledger().recompute_fee_record(payment_id, 200.0).unwrap();
    assert_eq!(outcome.fee, 2.0);
    assert_eq!(outcome.adjusted_amount, 198.0);

    let record = engine.store().get_fee_record(payment_id).unwrap().unwrap();
    assert_eq!(record.fee_amount, 2.0);
    assert_eq!(record.original_amount, 200.0);
    assert!(matches!(
        ledger_events(&engine).last(),
        Some(FeeEvent::FeeRecomputed { previous_fee: None, .. })
    ));
}

/// No record and still no fee: only the amount changes.
#[test]
fn recompute_without_fee_only_sets_amount() {
    let engine = engine_with_one_percent();
    let payment_id = engine.store().insert_payment(USER, 0.4, None).unwrap();

    let outcome = engine.ledger().recompute_fee_record(payment_id, 0.3).unwrap();
    assert_eq!(outcome.fee, 0.0);
    assert_eq!(engine.store().get_payment(payment_id).unwrap().unwrap().amount, 0.3);
    assert!(ledger_events(&engine).is_empty());
}

#[test]
fn recompute_rejects_non_finite_amounts() {
    let engine = engine_with_one_percent();
    let payment_id = engine.store().insert_payment(USER, 500.0, None).unwrap();
    let err = engine.ledger().recompute_fee_record(payment_id, f64::NAN).unwrap_err();
    assert!(matches!(err, FeeError::InvalidAmount { .. }));
}

#[test]
fn recompute_for_unknown_payment_fails() {
    let engine = engine_with_one_percent();
    let err = engine.ledger().recompute_fee_record(4242, 10.0).unwrap_err();
    assert!(matches!(err, FeeError::PaymentNotFound { id: 4242 }));
}

/// A failure after the ledger ran rolls back the payment, the record and the event.
#[test]
fn failed_transaction_rolls_back_ledger_writes() {
    let engine = engine_with_one_percent();
    let store = engine.store();

    let result: Result<(), FeeError> = store.atomically(|s| {
        let payment_id = s.insert_payment(USER, 500.0, None)?;
        engine.ledger().create_fee_record(payment_id)?;
        Err(FeeError::InvalidAmount { amount: 500.0 })
    });
    assert!(result.is_err());

    assert!(store.payments_for_user(USER).unwrap().is_empty());
    assert_eq!(store.fee_record_count().unwrap(), 0);
    assert!(ledger_events(&engine).is_empty());
}
