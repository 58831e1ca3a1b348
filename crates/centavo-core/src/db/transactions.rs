//! Transaction operations

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::str::FromStr;

use super::{format_datetime, parse_datetime, parse_decimal, Database};
use crate::error::{Error, Result};
use crate::models::{
    Bank, CategorySource, Currency, NewTransaction, Transaction, TxnKind, TxnStatus,
};

/// Result of inserting a transaction
#[derive(Debug, Clone)]
pub enum TransactionInsertResult {
    /// Transaction was inserted successfully, contains new transaction ID
    Inserted(i64),
    /// Transaction was a duplicate of an existing email_id
    Duplicate(i64),
}

const TXN_COLS: &str = "id, profile_id, email_id, bank, card_id, kind, merchant_raw, \
     merchant_id, amount_original, currency_original, fx_rate, amount_local, txn_time, \
     beneficiary, transfer_memo, subtype, bank_reference, bank_account_iban, \
     subcategory_id, category_confidence, category_source, ai_suggested_subcategory_id, \
     category_needs_review, category_confirmed_by_user, status, is_internal_transfer, \
     exclude_from_budget, is_ambiguous_merchant, is_international, is_anomaly, \
     anomaly_score, special_type, notes, context, adjustment_reason, reconciled_at, \
     statement_row_id, created_at";

fn txn_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let col_err = |i: usize, e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            i,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    };

    Ok(Transaction {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        email_id: row.get(2)?,
        bank: Bank::from_str(&row.get::<_, String>(3)?).map_err(|e| col_err(3, e))?,
        card_id: row.get(4)?,
        kind: TxnKind::from_str(&row.get::<_, String>(5)?).map_err(|e| col_err(5, e))?,
        merchant_raw: row.get(6)?,
        merchant_id: row.get(7)?,
        amount_original: parse_decimal(&row.get::<_, String>(8)?)
            .map_err(|e| col_err(8, e.to_string()))?,
        currency_original: Currency::from_str(&row.get::<_, String>(9)?)
            .map_err(|e| col_err(9, e))?,
        fx_rate: row
            .get::<_, Option<String>>(10)?
            .map(|s| parse_decimal(&s))
            .transpose()
            .map_err(|e| col_err(10, e.to_string()))?,
        amount_local: parse_decimal(&row.get::<_, String>(11)?)
            .map_err(|e| col_err(11, e.to_string()))?,
        txn_time: parse_datetime(&row.get::<_, String>(12)?),
        beneficiary: row.get(13)?,
        transfer_memo: row.get(14)?,
        subtype: row.get(15)?,
        bank_reference: row.get(16)?,
        bank_account_iban: row.get(17)?,
        subcategory_id: row.get(18)?,
        category_confidence: row.get(19)?,
        category_source: row
            .get::<_, Option<String>>(20)?
            .map(|s| CategorySource::from_str(&s))
            .transpose()
            .map_err(|e| col_err(20, e))?,
        ai_suggested_subcategory_id: row.get(21)?,
        category_needs_review: row.get(22)?,
        category_confirmed_by_user: row.get(23)?,
        status: TxnStatus::from_str(&row.get::<_, String>(24)?).map_err(|e| col_err(24, e))?,
        is_internal_transfer: row.get(25)?,
        exclude_from_budget: row.get(26)?,
        is_ambiguous_merchant: row.get(27)?,
        is_international: row.get(28)?,
        is_anomaly: row.get(29)?,
        anomaly_score: row.get(30)?,
        special_type: row.get(31)?,
        notes: row.get(32)?,
        context: row.get(33)?,
        adjustment_reason: row.get(34)?,
        reconciled_at: row.get::<_, Option<String>>(35)?.map(|s| parse_datetime(&s)),
        statement_row_id: row.get(36)?,
        created_at: parse_datetime(&row.get::<_, String>(37)?),
    })
}

impl Database {
    /// Insert a transaction, skipping duplicates on (profile_id, email_id).
    ///
    /// The unique index is the real guard; the pre-check just lets us return
    /// the existing id without hitting the constraint. If two concurrent
    /// inserts race, the loser gets the constraint violation and is reported
    /// as a duplicate too.
    pub fn insert_transaction(&self, tx: &NewTransaction) -> Result<TransactionInsertResult> {
        // Internal invariant: an internal transfer is always excluded from
        // budgets, and a converted amount must be present
        if tx.is_internal_transfer && !tx.exclude_from_budget {
            return Err(Error::Integrity(format!(
                "internal transfer {} not excluded from budget",
                tx.email_id
            )));
        }
        if !tx.currency_original.is_local() && tx.fx_rate.is_none() {
            return Err(Error::Integrity(format!(
                "foreign-currency transaction {} has no fx_rate",
                tx.email_id
            )));
        }

        let conn = self.conn()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM \"transaction\" WHERE profile_id = ? AND email_id = ?",
                params![tx.profile_id, tx.email_id],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(existing_id) = existing {
            return Ok(TransactionInsertResult::Duplicate(existing_id));
        }

        let inserted = conn.execute(
            r#"
            INSERT INTO "transaction" (
                profile_id, email_id, bank, card_id, kind, merchant_raw, merchant_id,
                amount_original, currency_original, fx_rate, amount_local, txn_time,
                beneficiary, transfer_memo, subtype, bank_reference, bank_account_iban,
                subcategory_id, category_confidence, category_source,
                ai_suggested_subcategory_id, category_needs_review, status,
                is_internal_transfer, exclude_from_budget, is_ambiguous_merchant,
                is_international, special_type
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                tx.profile_id,
                tx.email_id,
                tx.bank.as_str(),
                tx.card_id,
                tx.kind.as_str(),
                tx.merchant_raw,
                tx.merchant_id,
                tx.amount_original.to_string(),
                tx.currency_original.as_str(),
                tx.fx_rate.map(|r| r.to_string()),
                tx.amount_local.to_string(),
                format_datetime(&tx.txn_time),
                tx.beneficiary,
                tx.transfer_memo,
                tx.subtype,
                tx.bank_reference,
                tx.bank_account_iban,
                tx.subcategory_id,
                tx.category_confidence,
                tx.category_source.map(|s| s.as_str()),
                tx.ai_suggested_subcategory_id,
                tx.category_needs_review,
                tx.status.as_str(),
                tx.is_internal_transfer,
                tx.exclude_from_budget,
                tx.is_ambiguous_merchant,
                tx.is_international,
                tx.special_type,
            ],
        );

        match inserted {
            Ok(_) => Ok(TransactionInsertResult::Inserted(conn.last_insert_rowid())),
            // Unique-constraint race: another writer got there first.
            // Roll back this single row and report the duplicate.
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let existing_id: i64 = conn.query_row(
                    "SELECT id FROM \"transaction\" WHERE profile_id = ? AND email_id = ?",
                    params![tx.profile_id, tx.email_id],
                    |row| row.get(0),
                )?;
                Ok(TransactionInsertResult::Duplicate(existing_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let txn = conn
            .query_row(
                &format!("SELECT {} FROM \"transaction\" WHERE id = ?", TXN_COLS),
                params![id],
                txn_from_row,
            )
            .optional()?;
        Ok(txn)
    }

    /// List a profile's transactions within [start, end], sorted by txn_time
    pub fn transactions_in_period(
        &self,
        profile_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM \"transaction\"
             WHERE profile_id = ? AND txn_time >= ? AND txn_time < ?
             ORDER BY txn_time",
            TXN_COLS
        ))?;
        let txns = stmt
            .query_map(
                params![
                    profile_id,
                    format!("{} 00:00:00", start),
                    format!("{} 00:00:00", end + chrono::Duration::days(1)),
                ],
                txn_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(txns)
    }

    /// All transactions for a profile, sorted by txn_time
    pub fn list_transactions(&self, profile_id: &str) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM \"transaction\" WHERE profile_id = ? ORDER BY txn_time",
            TXN_COLS
        ))?;
        let txns = stmt
            .query_map(params![profile_id], txn_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(txns)
    }

    /// The most recent confirmed transaction for a merchant, for the
    /// history layer of the categorization cascade
    pub fn latest_confirmed_for_merchant(
        &self,
        profile_id: &str,
        merchant_id: i64,
    ) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let txn = conn
            .query_row(
                &format!(
                    "SELECT {} FROM \"transaction\"
                     WHERE profile_id = ? AND merchant_id = ?
                       AND subcategory_id IS NOT NULL AND category_needs_review = 0
                     ORDER BY txn_time DESC LIMIT 1",
                    TXN_COLS
                ),
                params![profile_id, merchant_id],
                txn_from_row,
            )
            .optional()?;
        Ok(txn)
    }

    /// Transactions awaiting category review (dashboard read path)
    pub fn transactions_needing_review(&self, profile_id: &str) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM \"transaction\"
             WHERE profile_id = ? AND category_needs_review = 1
             ORDER BY txn_time DESC",
            TXN_COLS
        ))?;
        let txns = stmt
            .query_map(params![profile_id], txn_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(txns)
    }

    /// Mark a transaction reconciled against a statement row.
    ///
    /// Reconciliation never overwrites transaction fields; it only sets
    /// the status, the timestamp, and the row link.
    pub fn mark_reconciled(
        &self,
        transaction_id: i64,
        statement_row_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE \"transaction\"
             SET status = ?, reconciled_at = ?, statement_row_id = ?
             WHERE id = ?",
            params![
                TxnStatus::Reconciled.as_str(),
                format_datetime(&at),
                statement_row_id,
                transaction_id,
            ],
        )?;
        Ok(())
    }

    /// Set the anomaly flag and score
    pub fn flag_anomaly(&self, transaction_id: i64, score: f64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE \"transaction\" SET is_anomaly = 1, anomaly_score = ? WHERE id = ?",
            params![score, transaction_id],
        )?;
        Ok(())
    }

    /// Count duplicates of an email_id (0 or 1 given the unique index)
    pub fn email_id_exists(&self, profile_id: &str, email_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM \"transaction\" WHERE profile_id = ? AND email_id = ?",
            params![profile_id, email_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
