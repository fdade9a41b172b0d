//! Configuration loading and its effect on fees.

use feebook_core::{
    config::{FeeConfig, RoundingPolicy},
    engine::FeeEngine,
    plan::{FeeMode, FeePlanView},
    regression::CurvePoint,
    store::FeeStore,
};
use std::io::Write;

fn write_config(json: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

fn engine_with(config: FeeConfig) -> FeeEngine {
    let store = FeeStore::in_memory().unwrap();
    store.migrate().unwrap();
    FeeEngine::new(store, config)
}

fn formula_plan(text: &str) -> FeePlanView {
    FeePlanView {
        mode: FeeMode::Formula,
        formula_text: text.to_string(),
        ..FeePlanView::default()
    }
}

#[test]
fn missing_fields_take_defaults() {
    let file = write_config(r#"{"rounding": "half_even"}"#);
    let config = FeeConfig::load(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.rounding, RoundingPolicy::HalfEven);
    assert_eq!(config.minimum_charge, 0.01);
    assert_eq!(config.default_max_fee_fraction, 0.1);
    assert_eq!(config.max_regression_degree, 5);
}

#[test]
fn invalid_values_are_rejected() {
    let file = write_config(r#"{"minimum_charge": -1}"#);
    assert!(FeeConfig::load(file.path().to_str().unwrap()).is_err());

    let file = write_config(r#"{"max_regression_degree": 0}"#);
    assert!(FeeConfig::load(file.path().to_str().unwrap()).is_err());

    let file = write_config(r#"{"rounding": "up"}"#);
    assert!(FeeConfig::load(file.path().to_str().unwrap()).is_err());

    assert!(FeeConfig::load("/nonexistent/fees.json").is_err());
}

#[test]
fn half_even_rounds_midpoint_down_to_even() {
    let engine = engine_with(FeeConfig { rounding: RoundingPolicy::HalfEven, ..FeeConfig::default() });
    engine.put_fee_plan(1, formula_plan("0.025")).unwrap();
    assert_eq!(engine.compute_fee(1, 100.0).unwrap(), 0.02);

    let engine = engine_with(FeeConfig::default());
    engine.put_fee_plan(1, formula_plan("0.025")).unwrap();
    assert_eq!(engine.compute_fee(1, 100.0).unwrap(), 0.03);
}

#[test]
fn minimum_charge_is_configurable() {
    let engine = engine_with(FeeConfig { minimum_charge: 1.0, ..FeeConfig::default() });
    engine.put_fee_plan(1, formula_plan("0.5")).unwrap();
    assert_eq!(engine.compute_fee(1, 100.0).unwrap(), 0.0);
    engine.put_fee_plan(1, formula_plan("1.5")).unwrap();
    assert_eq!(engine.compute_fee(1, 100.0).unwrap(), 1.5);
}

#[test]
fn default_ceiling_is_configurable() {
    let engine = engine_with(FeeConfig { default_max_fee_fraction: 0.2, ..FeeConfig::default() });
    let mut view = FeePlanView::default();
    view.interval_data.insert(
        "0".into(),
        feebook_core::plan::IntervalConfig { max_fee: None, coefficients: Some(vec![0.5]), points: None },
    );
    engine.put_fee_plan(1, view).unwrap();
    assert_eq!(engine.compute_fee(1, 100.0).unwrap(), 20.0);
}

#[test]
fn regression_degree_cap_is_configurable() {
    let engine = engine_with(FeeConfig { max_regression_degree: 1, ..FeeConfig::default() });
    let points: Vec<CurvePoint> = [(0.0, 0.0), (0.5, 0.01), (1.0, 0.05)]
        .iter()
        .map(|&(f, y)| CurvePoint::new(f, y))
        .collect();
    let config = engine.fit_interval(&points, 0.1);
    assert_eq!(config.coefficients.unwrap().len(), 2);
}
