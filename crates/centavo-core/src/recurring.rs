//! Recurring-expense detection and projection
//!
//! The offline detector is the canonical subscription writer: it groups
//! the last six months of budget-relevant transactions by merchant, tests
//! each group for a stable cadence and amount, scores its confidence, and
//! persists the survivors. Projections then produce upcoming-charge
//! alerts at fixed lead times.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::Result;
use crate::merchant::normalize_merchant;
use crate::models::{Cadence, Subscription, Transaction};

/// Analysis window
const WINDOW_DAYS: i64 = 180;

/// Minimum charges before a pattern is worth testing
const MIN_OCCURRENCES: usize = 2;

/// Mean absolute gap deviation allowed (days)
const MAX_GAP_DEVIATION_DAYS: f64 = 5.0;

/// Amount spread allowed: (max - min) / mean
const MAX_AMOUNT_SPREAD: f64 = 0.10;

/// Groups scoring below this are discarded
const MIN_CONFIDENCE: i64 = 50;

/// Alert lead times, in days before the expected charge
const ALERT_LEAD_DAYS: [i64; 4] = [7, 3, 1, 0];

/// A detected recurring charge, before persistence
#[derive(Debug, Clone)]
pub struct DetectedSubscription {
    pub merchant_key: String,
    pub merchant_id: Option<i64>,
    pub avg_amount: Decimal,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub cadence: Cadence,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
    pub next_expected: NaiveDate,
    /// 0-100
    pub confidence: i64,
    pub occurrences: i64,
}

/// Outcome of a detection run
#[derive(Debug, Default)]
pub struct RecurringSyncStats {
    pub detected: usize,
    pub persisted: usize,
    pub deactivated: usize,
}

/// An upcoming or overdue projected charge
#[derive(Debug, Clone)]
pub struct SubscriptionAlert {
    pub subscription_id: i64,
    pub merchant_key: String,
    pub expected_on: NaiveDate,
    pub amount: Decimal,
    /// Days until the expected charge; negative means overdue
    pub days_until: i64,
    pub urgent: bool,
}

pub struct RecurringDetector {
    db: Database,
}

impl RecurringDetector {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Detect recurring patterns in the last six months of activity
    pub fn detect(&self, profile_id: &str, today: NaiveDate) -> Result<Vec<DetectedSubscription>> {
        let window_start = today - chrono::Duration::days(WINDOW_DAYS);
        let transactions = self
            .db
            .transactions_in_period(profile_id, window_start, today)?;

        // Group by merchant identity; fall back to the normalized key for
        // rows that never resolved a merchant id
        let mut groups: HashMap<String, Vec<&Transaction>> = HashMap::new();
        for tx in &transactions {
            if tx.exclude_from_budget {
                continue;
            }
            let key = match tx.merchant_id {
                Some(id) => format!("m:{}", id),
                None => normalize_merchant(&tx.merchant_raw),
            };
            groups.entry(key).or_default().push(tx);
        }

        let mut detected = Vec::new();
        for (_, group) in groups {
            if group.len() < MIN_OCCURRENCES {
                continue;
            }
            if let Some(subscription) = analyze_group(&group) {
                detected.push(subscription);
            }
        }

        debug!(profile_id, detected = detected.len(), "recurring patterns detected");
        Ok(detected)
    }

    /// Detect and persist, deactivating subscriptions that no longer
    /// re-detect
    pub fn sync(&self, profile_id: &str, today: NaiveDate) -> Result<RecurringSyncStats> {
        let detected = self.detect(profile_id, today)?;
        let mut stats = RecurringSyncStats {
            detected: detected.len(),
            ..Default::default()
        };

        let mut keys = Vec::with_capacity(detected.len());
        for subscription in &detected {
            self.db.upsert_subscription(profile_id, subscription)?;
            keys.push(subscription.merchant_key.clone());
            stats.persisted += 1;
        }
        stats.deactivated = self.db.deactivate_missing_subscriptions(profile_id, &keys)?;

        info!(
            profile_id,
            persisted = stats.persisted,
            deactivated = stats.deactivated,
            "subscriptions synced"
        );
        Ok(stats)
    }

    /// Alerts for projected charges at 7/3/1/0 days before, plus an
    /// urgent alert once the expected date has passed.
    pub fn upcoming_alerts(
        &self,
        profile_id: &str,
        today: NaiveDate,
    ) -> Result<Vec<SubscriptionAlert>> {
        let mut alerts = Vec::new();
        for subscription in self.db.list_subscriptions(profile_id)? {
            let days_until = (subscription.next_expected - today).num_days();
            if ALERT_LEAD_DAYS.contains(&days_until) {
                alerts.push(alert_for(&subscription, days_until, false));
            } else if days_until < 0 {
                alerts.push(alert_for(&subscription, days_until, true));
            }
        }
        Ok(alerts)
    }
}

fn alert_for(subscription: &Subscription, days_until: i64, urgent: bool) -> SubscriptionAlert {
    SubscriptionAlert {
        subscription_id: subscription.id,
        merchant_key: subscription.merchant_key.clone(),
        expected_on: subscription.next_expected,
        amount: subscription.avg_amount,
        days_until,
        urgent,
    }
}

/// Test one merchant group for a recurring pattern.
///
/// Requirements: stable gaps (mean absolute deviation within tolerance),
/// stable amounts (spread within 10% of the mean), and a mean gap that
/// snaps to a named cadence. Confidence combines occurrence count (10
/// points each up to 40), interval consistency (up to 30), and amount
/// consistency (up to 30); groups below 50 are discarded.
fn analyze_group(group: &[&Transaction]) -> Option<DetectedSubscription> {
    let mut sorted: Vec<&Transaction> = group.to_vec();
    sorted.sort_by_key(|t| t.txn_time);

    let dates: Vec<NaiveDate> = sorted.iter().map(|t| t.txn_time.date_naive()).collect();
    let first_seen = *dates.first()?;
    let last_seen = *dates.last()?;

    let gaps: Vec<f64> = dates
        .windows(2)
        .map(|w| (w[1] - w[0]).num_days() as f64)
        .collect();
    if gaps.is_empty() {
        return None;
    }

    let mean_gap = gaps.iter().sum::<f64>() / gaps.len() as f64;
    if mean_gap < 1.0 {
        return None; // Same-day repeats are dedup territory, not recurrence
    }
    let gap_deviation = gaps.iter().map(|g| (g - mean_gap).abs()).sum::<f64>() / gaps.len() as f64;
    if gap_deviation > MAX_GAP_DEVIATION_DAYS {
        return None;
    }

    let amounts: Vec<Decimal> = sorted.iter().map(|t| t.amount_local.abs()).collect();
    let min_amount = *amounts.iter().min()?;
    let max_amount = *amounts.iter().max()?;
    let mean_amount = amounts.iter().sum::<Decimal>() / Decimal::from(amounts.len());
    if mean_amount.is_zero() {
        return None;
    }
    let spread = ((max_amount - min_amount) / mean_amount).to_f64().unwrap_or(1.0);
    if spread > MAX_AMOUNT_SPREAD {
        return None;
    }

    let cadence = Cadence::from_mean_gap(mean_gap)?;

    // Confidence: occurrences + interval consistency + amount consistency
    let occurrence_score = ((sorted.len() as i64) * 10).min(40);
    let interval_score = ((30.0 - gap_deviation * 6.0).max(0.0)) as i64;
    let amount_score = ((30.0 - spread * 300.0).max(0.0)) as i64;
    let confidence = occurrence_score + interval_score + amount_score;
    if confidence < MIN_CONFIDENCE {
        return None;
    }

    let merchant_key = match sorted[0].merchant_id {
        Some(id) => format!("m:{}", id),
        None => normalize_merchant(&sorted[0].merchant_raw),
    };

    Some(DetectedSubscription {
        merchant_key,
        merchant_id: sorted[0].merchant_id,
        avg_amount: mean_amount.round_dp(2),
        min_amount,
        max_amount,
        cadence,
        first_seen,
        last_seen,
        next_expected: last_seen + chrono::Duration::days(cadence.days()),
        confidence: confidence.min(100),
        occurrences: sorted.len() as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bank, Currency, TxnKind, TxnStatus};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn txn(id: i64, merchant: &str, amount: Decimal, date: NaiveDate) -> Transaction {
        Transaction {
            id,
            profile_id: "p1".to_string(),
            email_id: format!("e{}", id),
            bank: Bank::Bac,
            card_id: None,
            kind: TxnKind::Purchase,
            merchant_raw: merchant.to_string(),
            merchant_id: None,
            amount_original: amount,
            currency_original: Currency::Crc,
            fx_rate: None,
            amount_local: amount,
            txn_time: Utc.from_utc_datetime(&date.and_hms_opt(18, 0, 0).unwrap()),
            beneficiary: None,
            transfer_memo: None,
            subtype: None,
            bank_reference: None,
            bank_account_iban: None,
            subcategory_id: None,
            category_confidence: None,
            category_source: None,
            ai_suggested_subcategory_id: None,
            category_needs_review: false,
            category_confirmed_by_user: false,
            status: TxnStatus::Confirmed,
            is_internal_transfer: false,
            exclude_from_budget: false,
            is_ambiguous_merchant: false,
            is_international: false,
            is_anomaly: false,
            anomaly_score: None,
            special_type: None,
            notes: None,
            context: None,
            adjustment_reason: None,
            reconciled_at: None,
            statement_row_id: None,
            created_at: Utc::now(),
        }
    }

    fn monthly_charges(merchant: &str, base: Decimal, months: usize) -> Vec<Transaction> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        (0..months)
            .map(|i| {
                // 30/31-day spacing with a tiny amount wobble, like a real
                // billing cycle
                let date = start + chrono::Duration::days((i as i64) * 30 + (i as i64 % 2));
                let amount = base + Decimal::from(i as i64 % 2 * 50);
                txn(i as i64, merchant, amount, date)
            })
            .collect()
    }

    #[test]
    fn test_netflix_eight_months_detected() {
        let txns = monthly_charges("NETFLIX.COM", dec!(5500), 8);
        let refs: Vec<&Transaction> = txns.iter().collect();
        let detected = analyze_group(&refs).unwrap();

        assert_eq!(detected.cadence, Cadence::Monthly);
        assert!(detected.confidence >= 80);
        assert_eq!(detected.occurrences, 8);
        assert_eq!(
            detected.next_expected,
            detected.last_seen + chrono::Duration::days(30)
        );
    }

    #[test]
    fn test_two_occurrences_minimum() {
        let txns = monthly_charges("SPOTIFY", dec!(3900), 2);
        let refs: Vec<&Transaction> = txns.iter().collect();
        // Two occurrences can match the cadence but score at most
        // 20 + 30 + 30 = 80; still above the floor
        assert!(analyze_group(&refs).is_some());
    }

    #[test]
    fn test_variable_amounts_rejected() {
        let mut txns = monthly_charges("RESTAURANTE X", dec!(10000), 6);
        txns[3].amount_local = dec!(25000); // 150% above the rest
        let refs: Vec<&Transaction> = txns.iter().collect();
        assert!(analyze_group(&refs).is_none());
    }

    #[test]
    fn test_irregular_gaps_rejected() {
        let dates = [1, 4, 40, 47, 120];
        let txns: Vec<Transaction> = dates
            .iter()
            .enumerate()
            .map(|(i, offset)| {
                let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                    + chrono::Duration::days(*offset);
                txn(i as i64, "SODA LOCAL", dec!(3000), date)
            })
            .collect();
        let refs: Vec<&Transaction> = txns.iter().collect();
        assert!(analyze_group(&refs).is_none());
    }

    #[test]
    fn test_sync_persists_and_projects() {
        let db = Database::in_memory().unwrap();
        db.create_profile("p1", "Personal", "u@example.com").unwrap();

        let today = NaiveDate::from_ymd_opt(2024, 8, 10).unwrap();
        for (i, month) in (2..8).enumerate() {
            let date = NaiveDate::from_ymd_opt(2024, month, 5).unwrap();
            let mut t = txn(i as i64, "NETFLIX.COM", dec!(5500), date);
            t.email_id = format!("netflix-{}", i);
            let new_txn = crate::models::NewTransaction {
                profile_id: t.profile_id.clone(),
                email_id: t.email_id.clone(),
                bank: t.bank,
                card_id: None,
                kind: t.kind,
                merchant_raw: t.merchant_raw.clone(),
                merchant_id: None,
                amount_original: t.amount_original,
                currency_original: t.currency_original,
                fx_rate: None,
                amount_local: t.amount_local,
                txn_time: t.txn_time,
                beneficiary: None,
                transfer_memo: None,
                subtype: None,
                bank_reference: None,
                bank_account_iban: None,
                subcategory_id: None,
                category_confidence: None,
                category_source: None,
                ai_suggested_subcategory_id: None,
                category_needs_review: false,
                status: TxnStatus::Confirmed,
                is_internal_transfer: false,
                exclude_from_budget: false,
                is_ambiguous_merchant: false,
                is_international: false,
                special_type: None,
            };
            db.insert_transaction(&new_txn).unwrap();
        }

        let detector = RecurringDetector::new(db.clone());
        let stats = detector.sync("p1", today).unwrap();
        assert_eq!(stats.persisted, 1);

        let subs = db.list_subscriptions("p1").unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].cadence, Cadence::Monthly);
        assert_eq!(
            subs[0].next_expected,
            NaiveDate::from_ymd_opt(2024, 7, 5).unwrap() + chrono::Duration::days(30)
        );

        // 7-day lead alert fires when today is a week before the charge
        let alert_day = subs[0].next_expected - chrono::Duration::days(7);
        let alerts = detector.upcoming_alerts("p1", alert_day).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].days_until, 7);
        assert!(!alerts[0].urgent);
    }
}
