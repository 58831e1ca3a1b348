//! Monthly budgets

use rusqlite::{params, Row};
use rust_decimal::Decimal;

use super::{parse_decimal, Database};
use crate::error::Result;
use crate::models::Budget;

fn budget_from_row(row: &Row<'_>) -> rusqlite::Result<Budget> {
    Ok(Budget {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        subcategory_id: row.get(2)?,
        monthly_amount: parse_decimal(&row.get::<_, String>(3)?).unwrap_or_default(),
        active: row.get(4)?,
    })
}

impl Database {
    pub fn set_budget(
        &self,
        profile_id: &str,
        subcategory_id: i64,
        monthly_amount: Decimal,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO budget (profile_id, subcategory_id, monthly_amount, active)
             VALUES (?, ?, ?, 1)
             ON CONFLICT(profile_id, subcategory_id) DO UPDATE SET
                 monthly_amount = excluded.monthly_amount, active = 1",
            params![profile_id, subcategory_id, monthly_amount.to_string()],
        )?;
        Ok(())
    }

    pub fn list_budgets(&self, profile_id: &str) -> Result<Vec<Budget>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, profile_id, subcategory_id, monthly_amount, active
             FROM budget WHERE profile_id = ? AND active = 1",
        )?;
        let budgets = stmt
            .query_map(params![profile_id], budget_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(budgets)
    }

    /// Month-to-date spend per subcategory, excluding internal transfers.
    /// Single indexed query on (profile_id, txn_time).
    pub fn spend_by_subcategory(
        &self,
        profile_id: &str,
        month_start: chrono::NaiveDate,
        today: chrono::NaiveDate,
    ) -> Result<Vec<(i64, Decimal)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT subcategory_id, SUM(CAST(amount_local AS REAL))
            FROM "transaction"
            WHERE profile_id = ? AND txn_time >= ? AND txn_time < ?
              AND exclude_from_budget = 0 AND subcategory_id IS NOT NULL
            GROUP BY subcategory_id
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![
                    profile_id,
                    format!("{} 00:00:00", month_start),
                    format!("{} 00:00:00", today + chrono::Duration::days(1)),
                ],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, f64>(1)?,
                    ))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .map(|(id, total)| {
                (
                    id,
                    Decimal::try_from(total).unwrap_or_default().round_dp(2),
                )
            })
            .collect())
    }
}
