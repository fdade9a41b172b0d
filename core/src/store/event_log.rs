use super::{from_sql_ts, to_sql_ts, FeeStore};
use crate::{error::FeeResult, event::FeeEventEntry, types::UserId};
use rusqlite::params;

impl FeeStore {
    // ── Fee event log ──────────────────────────────────────────────

    pub fn append_fee_event(&self, entry: &FeeEventEntry) -> FeeResult<()> {
        self.conn.execute(
            "INSERT INTO fee_event_log (user_id, payment_id, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.user_id,
                entry.payment_id,
                entry.event_type,
                entry.payload,
                to_sql_ts(&entry.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn fee_events_for_user(&self, user_id: UserId) -> FeeResult<Vec<FeeEventEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, payment_id, event_type, payload, created_at
             FROM fee_event_log WHERE user_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![user_id], |row| {
                Ok(FeeEventEntry {
                    id:         Some(row.get(0)?),
                    user_id:    row.get(1)?,
                    payment_id: row.get(2)?,
                    event_type: row.get(3)?,
                    payload:    row.get(4)?,
                    created_at: from_sql_ts(5, row.get(5)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
