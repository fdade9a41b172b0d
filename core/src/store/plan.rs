use super::{from_sql_ts, to_sql_ts, FeeStore};
use crate::{
    error::FeeResult,
    plan::{FeeMode, FeePlan},
    types::UserId,
};
use rusqlite::{params, OptionalExtension};

/// Raw `fee_plan` columns before JSON decoding.
struct PlanRow {
    user_id:            UserId,
    mode:               String,
    formula_text:       Option<String>,
    amount_table_json:  String,
    interval_data_json: String,
    created_at:         chrono::DateTime<chrono::Utc>,
    updated_at:         chrono::DateTime<chrono::Utc>,
}

impl FeeStore {
    // ── Fee plans ──────────────────────────────────────────────────

    pub fn get_fee_plan(&self, user_id: UserId) -> FeeResult<Option<FeePlan>> {
        let row = self
            .conn
            .query_row(
                "SELECT user_id, mode, formula_text, amount_table_json, interval_data_json,
                        created_at, updated_at
                 FROM fee_plan WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(PlanRow {
                        user_id:            row.get(0)?,
                        mode:               row.get(1)?,
                        formula_text:       row.get(2)?,
                        amount_table_json:  row.get(3)?,
                        interval_data_json: row.get(4)?,
                        created_at:         from_sql_ts(5, row.get(5)?)?,
                        updated_at:         from_sql_ts(6, row.get(6)?)?,
                    })
                },
            )
            .optional()?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        Ok(Some(FeePlan {
            user_id:       row.user_id,
            mode:          row.mode.parse::<FeeMode>()?,
            formula_text:  row.formula_text,
            amount_table:  serde_json::from_str(&row.amount_table_json)?,
            interval_data: serde_json::from_str(&row.interval_data_json)?,
            created_at:    row.created_at,
            updated_at:    row.updated_at,
        }))
    }

    /// Insert or replace the user's plan. `created_at` survives updates,
    /// `updated_at` is always taken from `plan`.
    pub fn upsert_fee_plan(&self, plan: &FeePlan) -> FeeResult<()> {
        self.conn.execute(
            "INSERT INTO fee_plan (
                user_id, mode, formula_text, amount_table_json, interval_data_json,
                created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (user_id) DO UPDATE SET
                mode               = excluded.mode,
                formula_text       = excluded.formula_text,
                amount_table_json  = excluded.amount_table_json,
                interval_data_json = excluded.interval_data_json,
                updated_at         = excluded.updated_at",
            params![
                plan.user_id,
                plan.mode.as_str(),
                plan.formula_text,
                serde_json::to_string(&plan.amount_table)?,
                serde_json::to_string(&plan.interval_data)?,
                to_sql_ts(&plan.created_at),
                to_sql_ts(&plan.updated_at),
            ],
        )?;
        Ok(())
    }
}
