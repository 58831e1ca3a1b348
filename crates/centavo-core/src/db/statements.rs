//! Bank statements and their rows

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::str::FromStr;

use super::{format_datetime, parse_date, parse_datetime, parse_decimal, Database};
use crate::error::Result;
use crate::models::{
    Bank, BankStatement, Currency, ReconciliationStatus, StatementKind, StatementRow,
    StatementSection,
};
use crate::parse::statement::ParsedStatement;

const STATEMENT_COLS: &str = "id, profile_id, bank, kind, statement_key, period_start, \
     period_end, due_date, credit_limit, minimum_payment, total_rows, matched_count, \
     match_percentage, reconciliation_status, reconciled_at, created_at";

fn statement_from_row(row: &Row<'_>) -> rusqlite::Result<BankStatement> {
    Ok(BankStatement {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        bank: Bank::from_str(&row.get::<_, String>(2)?).unwrap_or(Bank::Bac),
        kind: StatementKind::from_str(&row.get::<_, String>(3)?)
            .unwrap_or(StatementKind::CreditCard),
        statement_key: row.get(4)?,
        period_start: parse_date(&row.get::<_, String>(5)?).unwrap_or_default(),
        period_end: parse_date(&row.get::<_, String>(6)?).unwrap_or_default(),
        due_date: row
            .get::<_, Option<String>>(7)?
            .and_then(|s| parse_date(&s).ok()),
        credit_limit: row
            .get::<_, Option<String>>(8)?
            .and_then(|s| parse_decimal(&s).ok()),
        minimum_payment: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| parse_decimal(&s).ok()),
        total_rows: row.get(10)?,
        matched_count: row.get(11)?,
        match_percentage: row.get(12)?,
        reconciliation_status: row
            .get::<_, Option<String>>(13)?
            .and_then(|s| ReconciliationStatus::from_str(&s).ok()),
        reconciled_at: row.get::<_, Option<String>>(14)?.map(|s| parse_datetime(&s)),
        created_at: parse_datetime(&row.get::<_, String>(15)?),
    })
}

const ROW_COLS: &str = "id, statement_id, reference, ordinal, date, description, currency, \
     amount, section, location, matched_transaction_id";

fn statement_row_from_row(row: &Row<'_>) -> rusqlite::Result<StatementRow> {
    Ok(StatementRow {
        id: row.get(0)?,
        statement_id: row.get(1)?,
        reference: row.get(2)?,
        ordinal: row.get(3)?,
        date: parse_date(&row.get::<_, String>(4)?).unwrap_or_default(),
        description: row.get(5)?,
        currency: Currency::from_str(&row.get::<_, String>(6)?).unwrap_or(Currency::Crc),
        amount: parse_decimal(&row.get::<_, String>(7)?).unwrap_or_default(),
        section: StatementSection::from_str(&row.get::<_, String>(8)?).unwrap_or_default(),
        location: row.get(9)?,
        matched_transaction_id: row.get(10)?,
    })
}

impl Database {
    /// Persist a parsed statement and its rows. Returns the statement id,
    /// or the existing id when this statement was already ingested.
    pub fn save_statement(
        &self,
        profile_id: &str,
        parsed: &ParsedStatement,
    ) -> Result<(i64, bool)> {
        let mut conn = self.conn()?;

        if let Some(existing) = conn
            .query_row(
                "SELECT id FROM bank_statement WHERE statement_key = ?",
                params![parsed.statement_key(profile_id)],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
        {
            return Ok((existing, false));
        }

        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO bank_statement (
                profile_id, bank, kind, statement_key, period_start, period_end,
                due_date, credit_limit, minimum_payment, total_rows
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                profile_id,
                parsed.bank.as_str(),
                parsed.kind.as_str(),
                parsed.statement_key(profile_id),
                parsed.period_start.to_string(),
                parsed.period_end.to_string(),
                parsed.due_date.map(|d| d.to_string()),
                parsed.credit_limit.map(|c| c.to_string()),
                parsed.minimum_payment.map(|m| m.to_string()),
                parsed.rows.len() as i64,
            ],
        )?;
        let statement_id = tx.last_insert_rowid();

        for row in &parsed.rows {
            tx.execute(
                r#"
                INSERT INTO statement_row (
                    statement_id, reference, ordinal, date, description,
                    currency, amount, section, location
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    statement_id,
                    row.reference,
                    row.ordinal,
                    row.date.to_string(),
                    row.description,
                    row.currency.as_str(),
                    row.amount.to_string(),
                    row.section.as_str(),
                    row.location,
                ],
            )?;
        }
        tx.commit()?;

        Ok((statement_id, true))
    }

    pub fn get_statement(&self, id: i64) -> Result<Option<BankStatement>> {
        let conn = self.conn()?;
        let statement = conn
            .query_row(
                &format!("SELECT {} FROM bank_statement WHERE id = ?", STATEMENT_COLS),
                params![id],
                statement_from_row,
            )
            .optional()?;
        Ok(statement)
    }

    pub fn list_statements(&self, profile_id: &str) -> Result<Vec<BankStatement>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bank_statement WHERE profile_id = ? ORDER BY period_end DESC",
            STATEMENT_COLS
        ))?;
        let statements = stmt
            .query_map(params![profile_id], statement_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(statements)
    }

    pub fn statement_rows(&self, statement_id: i64) -> Result<Vec<StatementRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM statement_row WHERE statement_id = ? ORDER BY ordinal",
            ROW_COLS
        ))?;
        let rows = stmt
            .query_map(params![statement_id], statement_row_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Link a statement row to the transaction it matched
    pub fn link_statement_row(&self, row_id: i64, transaction_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE statement_row SET matched_transaction_id = ? WHERE id = ?",
            params![transaction_id, row_id],
        )?;
        Ok(())
    }

    /// Record the outcome of a reconciliation run on the statement
    pub fn record_reconciliation(
        &self,
        statement_id: i64,
        matched_count: i64,
        match_percentage: f64,
        status: ReconciliationStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE bank_statement
             SET matched_count = ?, match_percentage = ?, reconciliation_status = ?,
                 reconciled_at = ?
             WHERE id = ?",
            params![
                matched_count,
                match_percentage,
                status.as_str(),
                format_datetime(&at),
                statement_id,
            ],
        )?;
        Ok(())
    }
}
