//! Detected recurring charges

use rusqlite::{params, Row};
use std::str::FromStr;

use super::{parse_date, parse_datetime, parse_decimal, Database};
use crate::error::Result;
use crate::models::{Cadence, Subscription};
use crate::recurring::DetectedSubscription;

const SUB_COLS: &str = "id, profile_id, merchant_key, merchant_id, avg_amount, min_amount, \
     max_amount, cadence, first_seen, last_seen, next_expected, confidence, occurrences, \
     active, created_at";

fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        merchant_key: row.get(2)?,
        merchant_id: row.get(3)?,
        avg_amount: parse_decimal(&row.get::<_, String>(4)?).unwrap_or_default(),
        min_amount: parse_decimal(&row.get::<_, String>(5)?).unwrap_or_default(),
        max_amount: parse_decimal(&row.get::<_, String>(6)?).unwrap_or_default(),
        cadence: Cadence::from_str(&row.get::<_, String>(7)?).unwrap_or(Cadence::Monthly),
        first_seen: parse_date(&row.get::<_, String>(8)?).unwrap_or_default(),
        last_seen: parse_date(&row.get::<_, String>(9)?).unwrap_or_default(),
        next_expected: parse_date(&row.get::<_, String>(10)?).unwrap_or_default(),
        confidence: row.get(11)?,
        occurrences: row.get(12)?,
        active: row.get(13)?,
        created_at: parse_datetime(&row.get::<_, String>(14)?),
    })
}

impl Database {
    /// Insert or refresh a detected subscription for (profile, merchant_key)
    pub fn upsert_subscription(
        &self,
        profile_id: &str,
        detected: &DetectedSubscription,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO subscription (
                profile_id, merchant_key, merchant_id, avg_amount, min_amount, max_amount,
                cadence, first_seen, last_seen, next_expected, confidence, occurrences, active
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            ON CONFLICT(profile_id, merchant_key) DO UPDATE SET
                merchant_id = excluded.merchant_id,
                avg_amount = excluded.avg_amount,
                min_amount = excluded.min_amount,
                max_amount = excluded.max_amount,
                cadence = excluded.cadence,
                first_seen = excluded.first_seen,
                last_seen = excluded.last_seen,
                next_expected = excluded.next_expected,
                confidence = excluded.confidence,
                occurrences = excluded.occurrences,
                active = 1
            "#,
            params![
                profile_id,
                detected.merchant_key,
                detected.merchant_id,
                detected.avg_amount.to_string(),
                detected.min_amount.to_string(),
                detected.max_amount.to_string(),
                detected.cadence.as_str(),
                detected.first_seen.to_string(),
                detected.last_seen.to_string(),
                detected.next_expected.to_string(),
                detected.confidence,
                detected.occurrences,
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM subscription WHERE profile_id = ? AND merchant_key = ?",
            params![profile_id, detected.merchant_key],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn list_subscriptions(&self, profile_id: &str) -> Result<Vec<Subscription>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM subscription WHERE profile_id = ? AND active = 1
             ORDER BY next_expected",
            SUB_COLS
        ))?;
        let subs = stmt
            .query_map(params![profile_id], subscription_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(subs)
    }

    /// Deactivate subscriptions not re-detected in the latest run
    pub fn deactivate_missing_subscriptions(
        &self,
        profile_id: &str,
        detected_keys: &[String],
    ) -> Result<usize> {
        let conn = self.conn()?;
        if detected_keys.is_empty() {
            let count = conn.execute(
                "UPDATE subscription SET active = 0 WHERE profile_id = ? AND active = 1",
                params![profile_id],
            )?;
            return Ok(count);
        }

        let placeholders: Vec<&str> = detected_keys.iter().map(|_| "?").collect();
        let sql = format!(
            "UPDATE subscription SET active = 0
             WHERE profile_id = ? AND active = 1 AND merchant_key NOT IN ({})",
            placeholders.join(", ")
        );
        let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&profile_id];
        for key in detected_keys {
            params_vec.push(key);
        }
        let count = conn.execute(&sql, params_vec.as_slice())?;
        Ok(count)
    }
}
