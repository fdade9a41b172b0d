use super::{from_sql_ts, to_sql_ts, FeeRecord, FeeStore};
use crate::{
    error::FeeResult,
    types::{PaymentId, UserId},
};
use rusqlite::{params, OptionalExtension, Row};

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FeeRecord> {
    Ok(FeeRecord {
        payment_id:      row.get(0)?,
        user_id:         row.get(1)?,
        fee_amount:      row.get(2)?,
        original_amount: row.get(3)?,
        created_at:      from_sql_ts(4, row.get(4)?)?,
        updated_at:      from_sql_ts(5, row.get(5)?)?,
    })
}

impl FeeStore {
    // ── Fee records ────────────────────────────────────────────────

    pub fn get_fee_record(&self, payment_id: PaymentId) -> FeeResult<Option<FeeRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT payment_id, user_id, fee_amount, original_amount, created_at, updated_at
                 FROM fee_record WHERE payment_id = ?1",
                params![payment_id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// One row per payment: a second write for the same payment updates
    /// the amounts in place and keeps `created_at`.
    pub fn upsert_fee_record(&self, record: &FeeRecord) -> FeeResult<()> {
        self.conn.execute(
            "INSERT INTO fee_record (
                payment_id, user_id, fee_amount, original_amount, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (payment_id) DO UPDATE SET
                fee_amount      = excluded.fee_amount,
                original_amount = excluded.original_amount,
                updated_at      = excluded.updated_at",
            params![
                record.payment_id,
                record.user_id,
                record.fee_amount,
                record.original_amount,
                to_sql_ts(&record.created_at),
                to_sql_ts(&record.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn remove_fee_record(&self, payment_id: PaymentId) -> FeeResult<()> {
        self.conn.execute(
            "DELETE FROM fee_record WHERE payment_id = ?1",
            params![payment_id],
        )?;
        Ok(())
    }

    pub fn fee_records_for_user(&self, user_id: UserId) -> FeeResult<Vec<FeeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT payment_id, user_id, fee_amount, original_amount, created_at, updated_at
             FROM fee_record WHERE user_id = ?1
             ORDER BY payment_id ASC",
        )?;
        let records = stmt
            .query_map(params![user_id], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn fee_record_count(&self) -> FeeResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM fee_record", [], |row| row.get(0))?;
        Ok(n)
    }
}
