//! File-backed store tests: data survives reopening, migrations are repeatable.

use feebook_core::{
    config::FeeConfig,
    engine::FeeEngine,
    plan::{FeeMode, FeePlanView},
    store::FeeStore,
};

#[test]
fn plan_and_ledger_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fees.db");
    let path = path.to_str().unwrap();

    let payment_id = {
        let store = FeeStore::open(path).unwrap();
        store.migrate().unwrap();
        let engine = FeeEngine::new(store, FeeConfig::default());
        engine
            .put_fee_plan(
                1,
                FeePlanView {
                    mode: FeeMode::Formula,
                    formula_text: "0.01*x".into(),
                    ..FeePlanView::default()
                },
            )
            .unwrap();
        engine.record_payment(1, 500.0, None).unwrap().payment_id
    };

    let store = FeeStore::open(path).unwrap();
    store.migrate().unwrap();
    let engine = FeeEngine::new(store, FeeConfig::default());

    assert_eq!(engine.get_fee_plan(1).unwrap().formula_text, "0.01*x");
    let payments = engine.payments_for_user(1).unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].id, payment_id);
    assert_eq!(payments[0].amount, 495.0);
    assert_eq!(payments[0].transaction_fee, Some(5.0));
    assert_eq!(engine.fee_history(1).unwrap().len(), 2);
}

#[test]
fn reopen_on_file_sees_same_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reopen.db");
    let store = FeeStore::open(path.to_str().unwrap()).unwrap();
    store.migrate().unwrap();
    store.insert_payment(9, 12.5, Some("coffee")).unwrap();

    let second = store.reopen().unwrap();
    let payments = second.payments_for_user(9).unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].description.as_deref(), Some("coffee"));
}

#[test]
fn in_memory_reopen_is_empty() {
    let store = FeeStore::in_memory().unwrap();
    store.migrate().unwrap();
    store.insert_payment(9, 12.5, None).unwrap();

    let fresh = store.reopen().unwrap();
    fresh.migrate().unwrap();
    assert!(fresh.payments_for_user(9).unwrap().is_empty());
}

/// Deleting a payment row cascades to its fee record.
#[test]
fn fee_record_follows_payment_deletion() {
    let engine = FeeEngine::build_test().unwrap();
    engine
        .put_fee_plan(
            2,
            FeePlanView {
                mode: FeeMode::Formula,
                formula_text: "0.05*x".into(),
                ..FeePlanView::default()
            },
        )
        .unwrap();
    let receipt = engine.record_payment(2, 100.0, None).unwrap();
    assert_eq!(engine.store().fee_record_count().unwrap(), 1);

    assert!(engine.store().delete_payment(receipt.payment_id).unwrap());
    assert_eq!(engine.store().fee_record_count().unwrap(), 0);
}
