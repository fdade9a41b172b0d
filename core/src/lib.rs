pub mod calculator;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod formula;
pub mod ledger;
pub mod plan;
pub mod regression;
pub mod store;
pub mod types;
