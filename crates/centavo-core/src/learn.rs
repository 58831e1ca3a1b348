//! Pattern learning from user feedback
//!
//! When the user corrects a transaction's category, three writes happen in
//! one SQL transaction: the transaction itself, the per-profile learned
//! pattern, and the crowd-level suggestion. SINPE corrections additionally
//! upsert the per-profile contact. Row-level locking on
//! (profile_id, pattern_key) comes from the unique index plus the single
//! write transaction; a crash leaves either all four writes or none.

use chrono::Utc;
use regex::Regex;
use rusqlite::params;
use std::sync::OnceLock;
use tracing::info;

use crate::categorize::sinpe_contact_key;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{CategorySource, PatternSource, Transaction};

/// Derive the glob-generalized pattern key for a merchant descriptor.
///
/// SINPE keeps the first name and generalizes the rest; everything else
/// keys on the first word, or the first two when the first is too short
/// to identify anything:
///
/// - `"SINPE MARIA ROSA CRUZ"` → `"SINPE MARIA%"`
/// - `"UBER *TRIP 12345"` → `"UBER%"`
/// - `"AUTOMERCADO ESCAZU"` → `"AUTOMERCADO%"`
/// - `"MAS X MENOS"` → `"MAS X%"`
pub fn derive_pattern_key(merchant_raw: &str) -> String {
    let upper = merchant_raw.to_uppercase();
    let upper = upper.trim();

    if let Some(rest) = upper.strip_prefix("SINPE") {
        let first = rest
            .split_whitespace()
            .find(|w| !w.chars().all(|c| c.is_ascii_digit()));
        return match first {
            Some(name) => format!("SINPE {}%", name),
            None => "SINPE%".to_string(),
        };
    }

    let words: Vec<&str> = upper
        .split_whitespace()
        .map(|w| w.trim_matches('*'))
        .filter(|w| !w.is_empty())
        .collect();

    match words.as_slice() {
        [] => "%".to_string(),
        [first] => format!("{}%", first),
        [first, second, ..] if first.len() < 4 => format!("{} {}%", first, second),
        [first, ..] => format!("{}%", first),
    }
}

/// Extract the displayable SINPE contact name from a descriptor
fn sinpe_display_name(merchant_raw: &str) -> Option<String> {
    static NAME: OnceLock<Regex> = OnceLock::new();
    let regex = NAME.get_or_init(|| Regex::new(r"(?i)SINPE\s+(.+)").expect("static regex"));
    regex
        .captures(merchant_raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Records user corrections and keeps the learning tables current
pub struct FeedbackService {
    db: Database,
}

impl FeedbackService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Apply a user's category correction.
    ///
    /// Updates the transaction (new subcategory, review cleared, confirmed
    /// flag, original AI suggestion preserved in its own column), upserts
    /// the learned pattern, bumps the crowd suggestion, and for SINPE
    /// updates the contact. All in one committed unit.
    pub fn record_correction(
        &self,
        transaction_id: i64,
        new_subcategory_id: i64,
        user_label: Option<&str>,
    ) -> Result<Transaction> {
        let txn = self
            .db
            .get_transaction(transaction_id)?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", transaction_id)))?;

        let pattern_key = derive_pattern_key(&txn.merchant_raw);
        let now = Utc::now();

        let mut conn = self.db.conn()?;
        let sql_tx = conn.transaction()?;

        // 1. The transaction itself. The AI's original suggestion stays in
        // its dedicated column for accuracy tracking.
        sql_tx.execute(
            r#"
            UPDATE "transaction" SET
                subcategory_id = ?,
                category_needs_review = 0,
                category_confirmed_by_user = 1,
                category_source = ?,
                category_confidence = 100,
                is_ambiguous_merchant = 0
            WHERE id = ?
            "#,
            params![
                new_subcategory_id,
                CategorySource::UserPreference.as_str(),
                transaction_id,
            ],
        )?;

        // 2. Per-profile learned pattern
        Database::upsert_learned_pattern_on(
            &sql_tx,
            &txn.profile_id,
            &pattern_key,
            new_subcategory_id,
            user_label,
            PatternSource::Correction,
            now,
        )?;

        // 3. Crowd suggestion
        Database::upsert_global_suggestion_on(&sql_tx, &pattern_key, new_subcategory_id, now)?;

        // 4. SINPE contact
        if txn.merchant_raw.to_uppercase().contains("SINPE") {
            if let (Some(key), Some(name)) = (
                sinpe_contact_key(&txn.merchant_raw),
                sinpe_display_name(&txn.merchant_raw),
            ) {
                Database::upsert_contact_on(
                    &sql_tx,
                    &txn.profile_id,
                    &key,
                    &name,
                    Some(new_subcategory_id),
                    txn.amount_local,
                    now,
                )?;
            }
        }

        sql_tx.commit()?;

        info!(
            transaction_id,
            %pattern_key,
            subcategory = new_subcategory_id,
            "user correction recorded"
        );

        self.db
            .get_transaction(transaction_id)?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", transaction_id)))
    }
}
