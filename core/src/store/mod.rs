//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The calculator and ledger reach it through the collaborator traits
//! (`PlanSource`, `FrequencyOracle`, `LedgerStore`); they never execute SQL.

use crate::{
    calculator::{FrequencyOracle, PlanSource},
    error::FeeResult,
    event::{FeeEvent, FeeEventEntry},
    ledger::LedgerStore,
    plan::FeePlan,
    types::{AmountRange, PaymentId, UserId},
};
use chrono::{DateTime, Utc};
use rusqlite::{types::Type, Connection};
use serde::{Deserialize, Serialize};

mod event_log;
mod payment;
mod plan;
mod record;

pub struct FeeStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

/// A payment row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id:          PaymentId,
    pub user_id:     UserId,
    pub amount:      f64,
    pub description: Option<String>,
    pub created_at:  DateTime<Utc>,
}

/// The fee charged against one payment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeeRecord {
    pub payment_id:      PaymentId,
    pub user_id:         UserId,
    pub fee_amount:      f64,
    pub original_amount: f64,
    pub created_at:      DateTime<Utc>,
    pub updated_at:      DateTime<Utc>,
}

impl FeeStore {
    pub fn open(path: &str) -> FeeResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> FeeResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases this returns a new, empty database.
    pub fn reopen(&self) -> FeeResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order. Safe to run repeatedly.
    pub fn migrate(&self) -> FeeResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_payments.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_fee_plans.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_fee_records.sql"))?;
        Ok(())
    }

    /// Run `f` inside one SQLite transaction: commit on `Ok`, roll back on
    /// `Err`. A call made while a transaction is already open joins it.
    pub fn transaction<T, F>(&self, f: F) -> FeeResult<T>
    where
        F: FnOnce(&Self) -> FeeResult<T>,
    {
        if !self.conn.is_autocommit() {
            return f(self);
        }
        let tx = self.conn.unchecked_transaction()?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }
}

// ── Timestamps ─────────────────────────────────────────────────────

fn to_sql_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn from_sql_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ── Collaborator contracts ─────────────────────────────────────────

impl PlanSource for FeeStore {
    fn load_fee_plan(&self, user_id: UserId) -> FeeResult<Option<FeePlan>> {
        self.get_fee_plan(user_id)
    }
}

impl FrequencyOracle for FeeStore {
    fn payment_frequency(&self, user_id: UserId, range: AmountRange) -> FeeResult<f64> {
        self.frequency_in_range(user_id, range)
    }
}

impl LedgerStore for FeeStore {
    fn atomically<T, F>(&self, f: F) -> FeeResult<T>
    where
        F: FnOnce(&Self) -> FeeResult<T>,
    {
        self.transaction(f)
    }

    fn load_payment(&self, payment_id: PaymentId) -> FeeResult<Option<Payment>> {
        self.get_payment(payment_id)
    }

    fn set_payment_amount(&self, payment_id: PaymentId, amount: f64) -> FeeResult<()> {
        self.update_payment_amount(payment_id, amount)
    }

    fn load_fee_record(&self, payment_id: PaymentId) -> FeeResult<Option<FeeRecord>> {
        self.get_fee_record(payment_id)
    }

    fn save_fee_record(&self, record: &FeeRecord) -> FeeResult<()> {
        self.upsert_fee_record(record)
    }

    fn delete_fee_record(&self, payment_id: PaymentId) -> FeeResult<()> {
        self.remove_fee_record(payment_id)
    }

    fn record_fee_event(&self, event: &FeeEvent) -> FeeResult<()> {
        let entry = FeeEventEntry::new(event, Utc::now())?;
        self.append_fee_event(&entry)
    }
}
