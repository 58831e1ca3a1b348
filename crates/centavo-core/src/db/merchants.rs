//! Canonical merchant records

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::Merchant;

const MERCHANT_COLS: &str = "id, normalized_name, display_name, city, country, aliases, created_at";

fn merchant_from_row(row: &Row<'_>) -> rusqlite::Result<Merchant> {
    let aliases_json: String = row.get(5)?;
    Ok(Merchant {
        id: row.get(0)?,
        normalized_name: row.get(1)?,
        display_name: row.get(2)?,
        city: row.get(3)?,
        country: row.get(4)?,
        aliases: serde_json::from_str(&aliases_json).unwrap_or_default(),
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

impl Database {
    pub fn get_merchant(&self, id: i64) -> Result<Option<Merchant>> {
        let conn = self.conn()?;
        let merchant = conn
            .query_row(
                &format!("SELECT {} FROM merchant WHERE id = ?", MERCHANT_COLS),
                params![id],
                merchant_from_row,
            )
            .optional()?;
        Ok(merchant)
    }

    pub fn get_merchant_by_key(&self, normalized_name: &str) -> Result<Option<Merchant>> {
        let conn = self.conn()?;
        let merchant = conn
            .query_row(
                &format!(
                    "SELECT {} FROM merchant WHERE normalized_name = ?",
                    MERCHANT_COLS
                ),
                params![normalized_name],
                merchant_from_row,
            )
            .optional()?;
        Ok(merchant)
    }

    pub fn list_merchants(&self) -> Result<Vec<Merchant>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM merchant ORDER BY normalized_name",
            MERCHANT_COLS
        ))?;
        let merchants = stmt
            .query_map([], merchant_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(merchants)
    }

    pub fn create_merchant(
        &self,
        normalized_name: &str,
        display_name: &str,
        city: Option<&str>,
        country: Option<&str>,
        first_alias: &str,
    ) -> Result<i64> {
        let conn = self.conn()?;
        let aliases = serde_json::to_string(&vec![first_alias])?;
        conn.execute(
            "INSERT INTO merchant (normalized_name, display_name, city, country, aliases)
             VALUES (?, ?, ?, ?, ?)",
            params![normalized_name, display_name, city, country, aliases],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Record a raw descriptor variant against an existing merchant
    pub fn add_merchant_alias(&self, merchant_id: i64, alias: &str) -> Result<()> {
        let conn = self.conn()?;
        let current: String = conn.query_row(
            "SELECT aliases FROM merchant WHERE id = ?",
            params![merchant_id],
            |row| row.get(0),
        )?;
        let mut aliases: Vec<String> = serde_json::from_str(&current).unwrap_or_default();
        if !aliases.iter().any(|a| a == alias) {
            aliases.push(alias.to_string());
            conn.execute(
                "UPDATE merchant SET aliases = ? WHERE id = ?",
                params![serde_json::to_string(&aliases)?, merchant_id],
            )?;
        }
        Ok(())
    }
}
