//! Learned patterns, crowd suggestions, and SINPE contacts

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::str::FromStr;

use super::{format_datetime, parse_datetime, parse_decimal, Database};
use crate::error::Result;
use crate::models::{
    GlobalSuggestion, LearnedPattern, PatternSource, SinpeContact, SuggestionStatus,
};

/// Users needed before a crowd suggestion auto-approves
pub const AUTO_APPROVE_USER_COUNT: i64 = 5;

/// Confidence assigned to a freshly learned pattern. Must clear the
/// cascade's 0.70 floor so a single correction takes effect immediately.
const NEW_PATTERN_CONFIDENCE: &str = "0.80";

const PATTERN_COLS: &str = "id, profile_id, pattern_key, subcategory_id, user_label, \
     times_matched, times_confirmed, times_rejected, confidence, source, is_recurring, \
     recurring_cadence_days, avg_amount, min_amount, max_amount, last_seen_at";

fn pattern_from_row(row: &Row<'_>) -> rusqlite::Result<LearnedPattern> {
    Ok(LearnedPattern {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        pattern_key: row.get(2)?,
        subcategory_id: row.get(3)?,
        user_label: row.get(4)?,
        times_matched: row.get(5)?,
        times_confirmed: row.get(6)?,
        times_rejected: row.get(7)?,
        confidence: parse_decimal(&row.get::<_, String>(8)?).unwrap_or_default(),
        source: PatternSource::from_str(&row.get::<_, String>(9)?)
            .unwrap_or(PatternSource::Correction),
        is_recurring: row.get(10)?,
        recurring_cadence_days: row.get(11)?,
        avg_amount: row
            .get::<_, Option<String>>(12)?
            .and_then(|s| parse_decimal(&s).ok()),
        min_amount: row
            .get::<_, Option<String>>(13)?
            .and_then(|s| parse_decimal(&s).ok()),
        max_amount: row
            .get::<_, Option<String>>(14)?
            .and_then(|s| parse_decimal(&s).ok()),
        last_seen_at: row.get::<_, Option<String>>(15)?.map(|s| parse_datetime(&s)),
    })
}

const SUGGESTION_COLS: &str =
    "id, pattern_key, suggested_subcategory_id, user_count, confidence, status, approved_at";

fn suggestion_from_row(row: &Row<'_>) -> rusqlite::Result<GlobalSuggestion> {
    Ok(GlobalSuggestion {
        id: row.get(0)?,
        pattern_key: row.get(1)?,
        suggested_subcategory_id: row.get(2)?,
        user_count: row.get(3)?,
        confidence: parse_decimal(&row.get::<_, String>(4)?).unwrap_or_default(),
        status: SuggestionStatus::from_str(&row.get::<_, String>(5)?)
            .unwrap_or(SuggestionStatus::Pending),
        approved_at: row.get::<_, Option<String>>(6)?.map(|s| parse_datetime(&s)),
    })
}

const CONTACT_COLS: &str = "id, profile_id, contact_key, display_name, default_subcategory_id, \
     total_transactions, total_amount, last_transaction_at";

fn contact_from_row(row: &Row<'_>) -> rusqlite::Result<SinpeContact> {
    Ok(SinpeContact {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        contact_key: row.get(2)?,
        display_name: row.get(3)?,
        default_subcategory_id: row.get(4)?,
        total_transactions: row.get(5)?,
        total_amount: parse_decimal(&row.get::<_, String>(6)?).unwrap_or_default(),
        last_transaction_at: row.get::<_, Option<String>>(7)?.map(|s| parse_datetime(&s)),
    })
}

impl Database {
    /// Find the learned pattern whose (possibly glob-suffixed) key matches
    /// a normalized merchant key. The longest matching pattern wins.
    ///
    /// SQL LIKE does the glob work: the stored pattern IS the LIKE pattern
    /// ("SINPE MARIA%"), and the merchant key is the matched value.
    pub fn find_matching_pattern(
        &self,
        profile_id: &str,
        merchant_key: &str,
    ) -> Result<Option<LearnedPattern>> {
        let conn = self.conn()?;
        let pattern = conn
            .query_row(
                &format!(
                    "SELECT {} FROM learned_pattern
                     WHERE profile_id = ? AND ? LIKE pattern_key
                     ORDER BY LENGTH(pattern_key) DESC LIMIT 1",
                    PATTERN_COLS
                ),
                params![profile_id, merchant_key],
                pattern_from_row,
            )
            .optional()?;
        Ok(pattern)
    }

    pub fn get_pattern(&self, profile_id: &str, pattern_key: &str) -> Result<Option<LearnedPattern>> {
        let conn = self.conn()?;
        let pattern = conn
            .query_row(
                &format!(
                    "SELECT {} FROM learned_pattern WHERE profile_id = ? AND pattern_key = ?",
                    PATTERN_COLS
                ),
                params![profile_id, pattern_key],
                pattern_from_row,
            )
            .optional()?;
        Ok(pattern)
    }

    /// Record a cascade hit against a pattern: bump times_matched and the
    /// amount envelope.
    pub fn record_pattern_match(&self, pattern_id: i64, amount: Decimal) -> Result<()> {
        let conn = self.conn()?;
        let amount_str = amount.to_string();
        conn.execute(
            r#"
            UPDATE learned_pattern SET
                times_matched = times_matched + 1,
                min_amount = CASE
                    WHEN min_amount IS NULL OR CAST(? AS REAL) < CAST(min_amount AS REAL)
                    THEN ? ELSE min_amount END,
                max_amount = CASE
                    WHEN max_amount IS NULL OR CAST(? AS REAL) > CAST(max_amount AS REAL)
                    THEN ? ELSE max_amount END,
                last_seen_at = ?
            WHERE id = ?
            "#,
            params![
                amount_str,
                amount_str,
                amount_str,
                amount_str,
                format_datetime(&Utc::now()),
                pattern_id,
            ],
        )?;
        Ok(())
    }

    /// Upsert a learned pattern from a user correction.
    ///
    /// Existing rows keep their counters and gain +0.01 confidence
    /// (capped at 0.99); new rows start above the cascade floor.
    /// Runs inside the caller-provided connection so the feedback triple
    /// write stays atomic.
    pub(crate) fn upsert_learned_pattern_on(
        conn: &rusqlite::Connection,
        profile_id: &str,
        pattern_key: &str,
        subcategory_id: i64,
        user_label: Option<&str>,
        source: PatternSource,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let updated = conn.execute(
            r#"
            UPDATE learned_pattern SET
                subcategory_id = ?,
                user_label = COALESCE(?, user_label),
                times_matched = times_matched + 1,
                times_confirmed = times_confirmed + 1,
                confidence = CAST(MIN(0.99, CAST(confidence AS REAL) + 0.01) AS TEXT),
                last_seen_at = ?
            WHERE profile_id = ? AND pattern_key = ?
            "#,
            params![
                subcategory_id,
                user_label,
                format_datetime(&now),
                profile_id,
                pattern_key,
            ],
        )?;

        if updated == 0 {
            conn.execute(
                r#"
                INSERT INTO learned_pattern (
                    profile_id, pattern_key, subcategory_id, user_label,
                    times_matched, times_confirmed, confidence, source, last_seen_at
                ) VALUES (?, ?, ?, ?, 1, 1, ?, ?, ?)
                "#,
                params![
                    profile_id,
                    pattern_key,
                    subcategory_id,
                    user_label,
                    NEW_PATTERN_CONFIDENCE,
                    source.as_str(),
                    format_datetime(&now),
                ],
            )?;
        }
        Ok(())
    }

    /// Upsert the crowd suggestion for a pattern key.
    ///
    /// New rows start at confidence 0.75 with one user. Existing rows gain
    /// a user and recompute confidence as 0.70 + 0.05 x user_count (capped
    /// at 0.99); once user_count reaches the threshold the row
    /// auto-approves.
    pub(crate) fn upsert_global_suggestion_on(
        conn: &rusqlite::Connection,
        pattern_key: &str,
        subcategory_id: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let updated = conn.execute(
            r#"
            UPDATE global_suggestion SET
                user_count = user_count + 1,
                confidence = CAST(MIN(0.99, 0.70 + 0.05 * (user_count + 1)) AS TEXT),
                status = CASE
                    WHEN user_count + 1 >= ? AND status = 'pending' THEN 'auto_approved'
                    ELSE status END,
                approved_at = CASE
                    WHEN user_count + 1 >= ? AND status = 'pending' THEN ?
                    ELSE approved_at END
            WHERE pattern_key = ?
            "#,
            params![
                AUTO_APPROVE_USER_COUNT,
                AUTO_APPROVE_USER_COUNT,
                format_datetime(&now),
                pattern_key,
            ],
        )?;

        if updated == 0 {
            conn.execute(
                "INSERT INTO global_suggestion
                     (pattern_key, suggested_subcategory_id, user_count, confidence, status)
                 VALUES (?, ?, 1, '0.75', 'pending')",
                params![pattern_key, subcategory_id],
            )?;
        }
        Ok(())
    }

    /// Auto-approved crowd suggestion matching a merchant key, if any
    pub fn find_approved_suggestion(&self, merchant_key: &str) -> Result<Option<GlobalSuggestion>> {
        let conn = self.conn()?;
        let suggestion = conn
            .query_row(
                &format!(
                    "SELECT {} FROM global_suggestion
                     WHERE ? LIKE pattern_key
                       AND status IN ('approved', 'auto_approved')
                       AND user_count >= ?
                     ORDER BY user_count DESC LIMIT 1",
                    SUGGESTION_COLS
                ),
                params![merchant_key, AUTO_APPROVE_USER_COUNT],
                suggestion_from_row,
            )
            .optional()?;
        Ok(suggestion)
    }

    pub fn get_global_suggestion(&self, pattern_key: &str) -> Result<Option<GlobalSuggestion>> {
        let conn = self.conn()?;
        let suggestion = conn
            .query_row(
                &format!(
                    "SELECT {} FROM global_suggestion WHERE pattern_key = ?",
                    SUGGESTION_COLS
                ),
                params![pattern_key],
                suggestion_from_row,
            )
            .optional()?;
        Ok(suggestion)
    }

    /// Find the SINPE contact for a key (phone number or name prefix)
    pub fn get_contact(&self, profile_id: &str, contact_key: &str) -> Result<Option<SinpeContact>> {
        let conn = self.conn()?;
        let contact = conn
            .query_row(
                &format!(
                    "SELECT {} FROM contact WHERE profile_id = ? AND contact_key = ?",
                    CONTACT_COLS
                ),
                params![profile_id, contact_key],
                contact_from_row,
            )
            .optional()?;
        Ok(contact)
    }

    /// Upsert a SINPE contact, accumulating transaction totals
    pub(crate) fn upsert_contact_on(
        conn: &rusqlite::Connection,
        profile_id: &str,
        contact_key: &str,
        display_name: &str,
        default_subcategory_id: Option<i64>,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let updated = conn.execute(
            r#"
            UPDATE contact SET
                display_name = ?,
                default_subcategory_id = COALESCE(?, default_subcategory_id),
                total_transactions = total_transactions + 1,
                total_amount = CAST(CAST(total_amount AS REAL) + CAST(? AS REAL) AS TEXT),
                last_transaction_at = ?
            WHERE profile_id = ? AND contact_key = ?
            "#,
            params![
                display_name,
                default_subcategory_id,
                amount.to_string(),
                format_datetime(&now),
                profile_id,
                contact_key,
            ],
        )?;

        if updated == 0 {
            conn.execute(
                r#"
                INSERT INTO contact (
                    profile_id, contact_key, display_name, default_subcategory_id,
                    total_transactions, total_amount, last_transaction_at
                ) VALUES (?, ?, ?, ?, 1, ?, ?)
                "#,
                params![
                    profile_id,
                    contact_key,
                    display_name,
                    default_subcategory_id,
                    amount.to_string(),
                    format_datetime(&now),
                ],
            )?;
        }
        Ok(())
    }

    pub fn list_patterns(&self, profile_id: &str) -> Result<Vec<LearnedPattern>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM learned_pattern WHERE profile_id = ? ORDER BY pattern_key",
            PATTERN_COLS
        ))?;
        let patterns = stmt
            .query_map(params![profile_id], pattern_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(patterns)
    }
}
