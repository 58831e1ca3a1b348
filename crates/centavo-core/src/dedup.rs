//! Deduplication and content-addressed identity
//!
//! Every record gets an `email_id` derived from its source: the upstream
//! message id for email-sourced transactions, and a compound hash for
//! statement rows (a bank reference number alone may reproduce across
//! statements, so the statement key, ordinal, description, and amount all
//! participate).
//!
//! A second-level fuzzy detector runs offline and scores candidate pairs
//! on a 100-point scale. Matches are reported with reasons for the user
//! to resolve; nothing is auto-merged.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::merchant::normalize_merchant;
use crate::models::Transaction;

/// Minimum score for a pair to be reported
const DUPLICATE_THRESHOLD: i64 = 50;

/// Amount difference beyond which a pair is never a duplicate
const MAX_AMOUNT_DIFF_PCT: f64 = 5.0;

/// Derive the content-addressed id for an email-sourced transaction
pub fn email_source_id(message_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"email|");
    hasher.update(message_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derive the content-addressed id for a statement-row transaction.
///
/// The compound is necessary because a single reference number may
/// reproduce across statements; the ordinal keeps two identical rows in
/// the same statement distinct.
pub fn statement_row_id(
    statement_key: &str,
    row_reference: &str,
    ordinal: i64,
    description: &str,
    amount: Decimal,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"pdf|");
    hasher.update(statement_key.as_bytes());
    hasher.update(b"|");
    hasher.update(row_reference.as_bytes());
    hasher.update(b"|");
    hasher.update(ordinal.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(description.as_bytes());
    hasher.update(b"|");
    hasher.update(amount.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Account identity for tie-breaking: card for card transactions, IBAN
/// for deposit transactions.
fn account_identity(tx: &Transaction) -> Option<String> {
    match tx.card_id {
        Some(card) => Some(format!("card:{}", card)),
        None => tx.bank_account_iban.as_ref().map(|iban| format!("iban:{}", iban)),
    }
}

/// A reported fuzzy-duplicate pair
#[derive(Debug, Clone)]
pub struct DuplicateMatch {
    pub transaction_a: i64,
    pub transaction_b: i64,
    /// 0-100
    pub similarity_score: i64,
    /// Matched fields, strongest first, for the user to audit
    pub reasons: Vec<String>,
}

/// Score one candidate pair. Returns None when the pair cannot be a
/// duplicate (different merchants, amounts too far apart, or a total
/// below the reporting threshold).
pub fn score_pair(a: &Transaction, b: &Transaction) -> Option<DuplicateMatch> {
    // Different merchant families are never duplicates
    let merchant_a = normalize_merchant(&a.merchant_raw);
    let merchant_b = normalize_merchant(&b.merchant_raw);
    if !merchant_a.eq_ignore_ascii_case(&merchant_b) {
        return None;
    }

    let amount_a = a.amount_local;
    let amount_b = b.amount_local;
    let base = amount_a.abs().max(amount_b.abs());
    if base.is_zero() {
        return None;
    }
    let diff_pct = ((amount_a - amount_b).abs() / base * Decimal::ONE_HUNDRED)
        .to_f64()
        .unwrap_or(f64::MAX);
    if diff_pct > MAX_AMOUNT_DIFF_PCT {
        return None;
    }

    let mut score: i64 = 0;
    let mut reasons = Vec::new();

    // Amount: exact 40, <1% 30, <=5% 20
    if amount_a == amount_b {
        score += 40;
        reasons.push("exact amount".to_string());
    } else if diff_pct < 1.0 {
        score += 30;
        reasons.push(format!("amount within 1% ({:.2}%)", diff_pct));
    } else {
        score += 20;
        reasons.push(format!("amount within 5% ({:.2}%)", diff_pct));
    }

    // Merchant equality was the gate; it also contributes
    score += 30;
    reasons.insert(0, "exact merchant".to_string());

    // Date proximity: same day 30, adjacent 20, within 3 days 10
    let days_apart = (a.txn_time.date_naive() - b.txn_time.date_naive())
        .num_days()
        .abs();
    match days_apart {
        0 => {
            score += 30;
            reasons.push("same date".to_string());
        }
        1 => {
            score += 20;
            reasons.push("adjacent day".to_string());
        }
        2 | 3 => {
            score += 10;
            reasons.push(format!("{} days apart", days_apart));
        }
        _ => {}
    }

    // Same account identity is a weak extra signal
    if let (Some(acct_a), Some(acct_b)) = (account_identity(a), account_identity(b)) {
        if acct_a == acct_b {
            score = (score + 5).min(100);
            reasons.push("same account".to_string());
        }
    }

    if score < DUPLICATE_THRESHOLD {
        return None;
    }

    Some(DuplicateMatch {
        transaction_a: a.id,
        transaction_b: b.id,
        similarity_score: score,
        reasons,
    })
}

/// Scan a profile's transactions for fuzzy-duplicate pairs.
///
/// Pairs sharing an email_id are the same record and are skipped; the
/// scan window is bounded by the scorer's 3-day date term, so only
/// near-in-time pairs are compared.
pub fn find_duplicates(transactions: &[Transaction]) -> Vec<DuplicateMatch> {
    let mut sorted: Vec<&Transaction> = transactions.iter().collect();
    sorted.sort_by_key(|t| t.txn_time);

    let mut matches = Vec::new();
    for (i, a) in sorted.iter().enumerate() {
        for b in sorted.iter().skip(i + 1) {
            let gap = (b.txn_time.date_naive() - a.txn_time.date_naive()).num_days();
            if gap > 3 {
                break; // Sorted by time: nothing further can score
            }
            if a.email_id == b.email_id {
                continue;
            }
            if let Some(found) = score_pair(a, b) {
                matches.push(found);
            }
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bank, Currency, TxnKind, TxnStatus};
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn txn(id: i64, merchant: &str, amount: Decimal, date: NaiveDate) -> Transaction {
        Transaction {
            id,
            profile_id: "p1".to_string(),
            email_id: format!("email-{}", id),
            bank: Bank::Bac,
            card_id: None,
            kind: TxnKind::Purchase,
            merchant_raw: merchant.to_string(),
            merchant_id: None,
            amount_original: amount,
            currency_original: Currency::Crc,
            fx_rate: None,
            amount_local: amount,
            txn_time: Utc
                .from_utc_datetime(&date.and_hms_opt(18, 0, 0).unwrap()),
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

    #[test]
    fn test_email_ids_are_stable_and_distinct() {
        assert_eq!(email_source_id("msg-1"), email_source_id("msg-1"));
        assert_ne!(email_source_id("msg-1"), email_source_id("msg-2"));
        // Same reference in two statements must not collide
        let a = statement_row_id("stmt-a", "123456", 0, "COMPRA", dec!(100));
        let b = statement_row_id("stmt-b", "123456", 0, "COMPRA", dec!(100));
        assert_ne!(a, b);
        // Two identical rows in one statement differ by ordinal
        let c = statement_row_id("stmt-a", "123456", 1, "COMPRA", dec!(100));
        assert_ne!(a, c);
    }

    #[test]
    fn test_exact_duplicate_scores_high() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let a = txn(1, "WALMART HEREDIA", dec!(15000), date);
        let b = txn(2, "WALMART HEREDIA", dec!(15000), date);

        let found = score_pair(&a, &b).unwrap();
        assert!(found.similarity_score >= 90);
        assert!(found.reasons.iter().any(|r| r == "exact merchant"));
        assert!(found.reasons.iter().any(|r| r == "exact amount"));
        assert!(found.reasons.iter().any(|r| r == "same date"));
    }

    #[test]
    fn test_different_merchant_not_duplicate() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let a = txn(1, "WALMART", dec!(15000), date);
        let b = txn(2, "AUTOMERCADO", dec!(15000), date);
        assert!(score_pair(&a, &b).is_none());
    }

    #[test]
    fn test_amount_over_five_percent_not_duplicate() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let a = txn(1, "WALMART", dec!(15000), date);
        let b = txn(2, "WALMART", dec!(16000), date);
        assert!(score_pair(&a, &b).is_none());
    }

    #[test]
    fn test_adjacent_day_scores_medium() {
        let a = txn(1, "WALMART", dec!(15000), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        let b = txn(2, "WALMART", dec!(15000), NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
        let found = score_pair(&a, &b).unwrap();
        assert!((70..=90).contains(&found.similarity_score));
    }

    #[test]
    fn test_same_card_bonus() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let mut a = txn(1, "WALMART", dec!(15000), date);
        let mut b = txn(2, "WALMART", dec!(15050), date);
        let without = score_pair(&a, &b).unwrap().similarity_score;

        a.card_id = Some(7);
        b.card_id = Some(7);
        let with = score_pair(&a, &b).unwrap().similarity_score;
        assert!(with > without);
    }

    #[test]
    fn test_find_duplicates_scans_pairs() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let txns = vec![
            txn(1, "WALMART HEREDIA", dec!(15000), date),
            txn(2, "WALMART HEREDIA", dec!(15000), date),
            txn(3, "UBER TRIP", dec!(4500), date),
        ];
        let matches = find_duplicates(&txns);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].similarity_score, 100);
    }
}
