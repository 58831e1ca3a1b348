//! Card registry and running balances

use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::str::FromStr;

use super::{parse_datetime, parse_decimal, Database};
use crate::error::Result;
use crate::models::{Bank, Card, CardKind};

const CARD_COLS: &str = "id, profile_id, bank, last_four, kind, current_balance, active, created_at";

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<Card> {
    Ok(Card {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        bank: Bank::from_str(&row.get::<_, String>(2)?).unwrap_or(Bank::Bac),
        last_four: row.get(3)?,
        kind: CardKind::from_str(&row.get::<_, String>(4)?).unwrap_or(CardKind::Credit),
        current_balance: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| parse_decimal(&s).ok()),
        active: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

impl Database {
    pub fn create_card(
        &self,
        profile_id: &str,
        bank: Bank,
        last_four: &str,
        kind: CardKind,
        current_balance: Option<Decimal>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO card (profile_id, bank, last_four, kind, current_balance)
             VALUES (?, ?, ?, ?, ?)",
            params![
                profile_id,
                bank.as_str(),
                last_four,
                kind.as_str(),
                current_balance.map(|b| b.to_string()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_card_by_last_four(
        &self,
        profile_id: &str,
        last_four: &str,
    ) -> Result<Option<Card>> {
        let conn = self.conn()?;
        let card = conn
            .query_row(
                &format!(
                    "SELECT {} FROM card
                     WHERE profile_id = ? AND last_four = ? AND active = 1",
                    CARD_COLS
                ),
                params![profile_id, last_four],
                card_from_row,
            )
            .optional()?;
        Ok(card)
    }

    pub fn list_cards(&self, profile_id: &str) -> Result<Vec<Card>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM card WHERE profile_id = ? AND active = 1 ORDER BY last_four",
            CARD_COLS
        ))?;
        let cards = stmt
            .query_map(params![profile_id], card_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cards)
    }

    /// Decrement a credit card's running balance after a detected payment.
    /// Balances never go below zero.
    pub fn apply_card_payment(&self, card_id: i64, amount: Decimal) -> Result<()> {
        let conn = self.conn()?;
        let current: Option<String> = conn.query_row(
            "SELECT current_balance FROM card WHERE id = ?",
            params![card_id],
            |row| row.get(0),
        )?;

        if let Some(balance_str) = current {
            let balance = parse_decimal(&balance_str)?;
            let new_balance = (balance - amount).max(Decimal::ZERO);
            conn.execute(
                "UPDATE card SET current_balance = ? WHERE id = ?",
                params![new_balance.to_string(), card_id],
            )?;
        }
        Ok(())
    }
}
