use super::{from_sql_ts, to_sql_ts, FeeStore, Payment};
use crate::{
    error::FeeResult,
    types::{AmountRange, PaymentId, UserId},
};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id:          row.get(0)?,
        user_id:     row.get(1)?,
        amount:      row.get(2)?,
        description: row.get(3)?,
        created_at:  from_sql_ts(4, row.get(4)?)?,
    })
}

impl FeeStore {
    // ── Payments ───────────────────────────────────────────────────

    pub fn insert_payment(
        &self,
        user_id: UserId,
        amount: f64,
        description: Option<&str>,
    ) -> FeeResult<PaymentId> {
        self.conn.execute(
            "INSERT INTO payment (user_id, amount, description, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, amount, description, to_sql_ts(&Utc::now())],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_payment(&self, payment_id: PaymentId) -> FeeResult<Option<Payment>> {
        let payment = self
            .conn
            .query_row(
                "SELECT id, user_id, amount, description, created_at
                 FROM payment WHERE id = ?1",
                params![payment_id],
                payment_from_row,
            )
            .optional()?;
        Ok(payment)
    }

    pub fn update_payment_amount(&self, payment_id: PaymentId, amount: f64) -> FeeResult<()> {
        self.conn.execute(
            "UPDATE payment SET amount = ?1 WHERE id = ?2",
            params![amount, payment_id],
        )?;
        Ok(())
    }

    /// Returns false when no such payment existed.
    pub fn delete_payment(&self, payment_id: PaymentId) -> FeeResult<bool> {
        let n = self
            .conn
            .execute("DELETE FROM payment WHERE id = ?1", params![payment_id])?;
        Ok(n > 0)
    }

    pub fn payments_for_user(&self, user_id: UserId) -> FeeResult<Vec<Payment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, amount, description, created_at
             FROM payment WHERE user_id = ?1
             ORDER BY id ASC",
        )?;
        let payments = stmt
            .query_map(params![user_id], payment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(payments)
    }

    /// Each of the user's payments with the fee charged on it, if any.
    pub fn payments_with_fees(&self, user_id: UserId) -> FeeResult<Vec<(Payment, Option<f64>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.user_id, p.amount, p.description, p.created_at, r.fee_amount
             FROM payment p
             LEFT JOIN fee_record r ON r.payment_id = p.id
             WHERE p.user_id = ?1
             ORDER BY p.id ASC",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((payment_from_row(row)?, row.get::<_, Option<f64>>(5)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Frequency ──────────────────────────────────────────────────

    /// Fraction of the user's payments with `lower <= |amount| < upper`.
    pub fn frequency_in_range(&self, user_id: UserId, range: AmountRange) -> FeeResult<f64> {
        let total: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM payment WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        if total == 0 {
            return Ok(0.0);
        }

        let hits: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM payment
             WHERE user_id = ?1
               AND ABS(amount) >= ?2
               AND (?3 IS NULL OR ABS(amount) < ?3)",
            params![user_id, range.lower, range.upper],
            |row| row.get(0),
        )?;
        Ok(hits as f64 / total as f64)
    }
}
