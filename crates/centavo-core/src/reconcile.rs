//! Statement reconciliation
//!
//! Matches statement rows against stored email-derived transactions for
//! the statement period plus a small traslape on each side. Matching is
//! tiered by confidence; every match carries ranked reasons so the user
//! can audit it. Matches never overwrite transaction fields: they set the
//! reconciled status, the timestamp, and the row link.
//!
//! Rows with no counterpart ("only in PDF") are offered for one-click add
//! through the regular ingestion path, so an accepted row is
//! indistinguishable from email-sourced data.

use chrono::{NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::merchant::{keys_equivalent, normalize_merchant};
use crate::models::{ReconciliationStatus, StatementRow, Transaction};

/// High-confidence tier floor
const HIGH_CONFIDENCE: f64 = 0.90;
/// Medium tier floor
const MEDIUM_CONFIDENCE: f64 = 0.70;
/// Low tier floor; below this a candidate is not a match
const LOW_CONFIDENCE: f64 = 0.50;

/// Amount divergence that turns a strong match into a reported mismatch
const AMOUNT_MISMATCH_PCT: f64 = 0.5;

/// One matched row
#[derive(Debug, Clone)]
pub struct RowMatch {
    pub row_id: i64,
    pub transaction_id: i64,
    /// 0.0 - 1.0
    pub confidence: f64,
    /// Matched fields, strongest first
    pub reasons: Vec<String>,
}

/// A strong merchant/date match whose amounts disagree
#[derive(Debug, Clone)]
pub struct AmountMismatch {
    pub row_id: i64,
    pub transaction_id: i64,
    pub row_amount: Decimal,
    pub transaction_amount: Decimal,
}

/// The reconciliation outcome for one statement
#[derive(Debug)]
pub struct ReconciliationReport {
    pub statement_id: i64,
    pub total_pdf: i64,
    pub total_system: i64,
    pub matched: Vec<RowMatch>,
    pub amount_mismatches: Vec<AmountMismatch>,
    /// Statement rows with no stored counterpart (ordinals)
    pub only_in_pdf: Vec<StatementRow>,
    /// Stored transactions with no statement counterpart
    pub only_in_system: Vec<i64>,
    pub match_percentage: f64,
    pub status: ReconciliationStatus,
}

/// Reconciliation engine. The traslape is injected by the sync layer;
/// nothing here re-derives it.
pub struct ReconciliationEngine {
    db: Database,
    traslape_days: i64,
}

impl ReconciliationEngine {
    pub fn new(db: Database, traslape_days: i64) -> Self {
        Self { db, traslape_days }
    }

    /// Reconcile one stored statement against the profile's transactions.
    ///
    /// Re-running on a fully reconciled statement is a no-op that reports
    /// 100%: already-linked rows count as matched and produce no writes.
    pub fn reconcile(&self, profile_id: &str, statement_id: i64) -> Result<ReconciliationReport> {
        let statement = self
            .db
            .get_statement(statement_id)?
            .ok_or_else(|| Error::NotFound(format!("statement {}", statement_id)))?;
        let rows = self.db.statement_rows(statement_id)?;

        let window_start = statement.period_start - chrono::Duration::days(self.traslape_days);
        let window_end = statement.period_end + chrono::Duration::days(self.traslape_days);
        let candidates = self
            .db
            .transactions_in_period(profile_id, window_start, window_end)?;

        let mut matched = Vec::new();
        let mut amount_mismatches = Vec::new();
        let mut only_in_pdf = Vec::new();
        let mut claimed: HashSet<i64> = HashSet::new();

        for row in &rows {
            // Previously reconciled rows keep their link
            if let Some(txn_id) = row.matched_transaction_id {
                claimed.insert(txn_id);
                matched.push(RowMatch {
                    row_id: row.id,
                    transaction_id: txn_id,
                    confidence: 1.0,
                    reasons: vec!["previously reconciled".to_string()],
                });
                continue;
            }

            match best_match(row, &candidates, &claimed) {
                Some(Candidate::Match(txn_id, confidence, reasons)) => {
                    claimed.insert(txn_id);
                    self.db.mark_reconciled(txn_id, row.id, Utc::now())?;
                    self.db.link_statement_row(row.id, txn_id)?;
                    matched.push(RowMatch {
                        row_id: row.id,
                        transaction_id: txn_id,
                        confidence,
                        reasons,
                    });
                }
                Some(Candidate::AmountMismatch(txn_id, txn_amount)) => {
                    amount_mismatches.push(AmountMismatch {
                        row_id: row.id,
                        transaction_id: txn_id,
                        row_amount: row.amount,
                        transaction_amount: txn_amount,
                    });
                }
                None => only_in_pdf.push(row.clone()),
            }
        }

        // Stored transactions inside the period proper that nothing claimed
        let in_period = self.db.transactions_in_period(
            profile_id,
            statement.period_start,
            statement.period_end,
        )?;
        let only_in_system: Vec<i64> = in_period
            .iter()
            .filter(|t| !claimed.contains(&t.id) && t.reconciled_at.is_none())
            .map(|t| t.id)
            .collect();

        let total_pdf = rows.len() as i64;
        let match_percentage = if total_pdf == 0 {
            100.0
        } else {
            matched.len() as f64 / total_pdf as f64 * 100.0
        };
        let status = ReconciliationStatus::from_percentage(match_percentage);

        self.db.record_reconciliation(
            statement_id,
            matched.len() as i64,
            match_percentage,
            status,
            Utc::now(),
        )?;

        info!(
            statement_id,
            total_pdf,
            matched = matched.len(),
            pct = match_percentage,
            status = status.as_str(),
            "reconciliation complete"
        );

        Ok(ReconciliationReport {
            statement_id,
            total_pdf,
            total_system: in_period.len() as i64,
            matched,
            amount_mismatches,
            only_in_pdf,
            only_in_system,
            match_percentage,
            status,
        })
    }
}

enum Candidate {
    Match(i64, f64, Vec<String>),
    AmountMismatch(i64, Decimal),
}

/// Amount relevant for comparing a row to a transaction: original when the
/// currencies agree, local otherwise.
fn comparable_amount(row: &StatementRow, txn: &Transaction) -> Decimal {
    if row.currency == txn.currency_original {
        txn.amount_original.abs()
    } else {
        txn.amount_local.abs()
    }
}

fn amount_diff_pct(a: Decimal, b: Decimal) -> f64 {
    let base = a.abs().max(b.abs());
    if base.is_zero() {
        return f64::MAX;
    }
    ((a - b).abs() / base * Decimal::ONE_HUNDRED)
        .to_f64()
        .unwrap_or(f64::MAX)
}

fn days_apart(row_date: NaiveDate, txn: &Transaction) -> i64 {
    (row_date - txn.txn_time.date_naive()).num_days().abs()
}

/// Shared significant token between two merchant keys
fn shares_significant_token(a: &str, b: &str) -> bool {
    let tokens_a: HashSet<&str> = a
        .split_whitespace()
        .filter(|t| t.len() >= 4 && !t.chars().all(|c| c.is_ascii_digit()))
        .collect();
    b.split_whitespace().any(|t| tokens_a.contains(t))
}

/// Find the best unclaimed candidate for a row.
///
/// Tiers: high (amount equal, merchant equivalent, <=2 days), medium
/// (amount equal, shared token, <=5 days), low (amount within 1%, similar
/// merchant, <=5 days). A strong merchant+date pairing whose amounts
/// diverge beyond half a percent is reported as a mismatch instead.
fn best_match(
    row: &StatementRow,
    candidates: &[Transaction],
    claimed: &HashSet<i64>,
) -> Option<Candidate> {
    let row_key = normalize_merchant(&row.description);
    let row_amount = row.amount.abs();

    let mut best: Option<(f64, &Transaction, Vec<String>)> = None;
    let mut mismatch: Option<(i64, Decimal)> = None;

    for txn in candidates {
        if claimed.contains(&txn.id) || txn.reconciled_at.is_some() {
            continue;
        }

        let txn_key = normalize_merchant(&txn.merchant_raw);
        let txn_amount = comparable_amount(row, txn);
        let diff_pct = amount_diff_pct(row_amount, txn_amount);
        let days = days_apart(row.date, txn);

        let merchant_exact = keys_equivalent(&row_key, &txn_key);
        let merchant_fuzzy = merchant_exact || shares_significant_token(&row_key, &txn_key);

        let (confidence, reasons) = if row_amount == txn_amount && merchant_exact && days <= 2 {
            (
                0.95,
                vec![
                    "amount equal".to_string(),
                    "merchant equivalent".to_string(),
                    format!("{} days apart", days),
                ],
            )
        } else if row_amount == txn_amount && merchant_fuzzy && days <= 5 {
            (
                0.80,
                vec![
                    "amount equal".to_string(),
                    "merchant token shared".to_string(),
                    format!("{} days apart", days),
                ],
            )
        } else if merchant_exact && days <= 2 && diff_pct > AMOUNT_MISMATCH_PCT {
            // Strong identity, wrong amount: report, don't match. Checked
            // before the low tier so a 0.5-1% divergence on an exact
            // merchant/date pairing surfaces for correction instead of
            // slipping through as a weak match.
            if mismatch.is_none() {
                mismatch = Some((txn.id, txn_amount));
            }
            continue;
        } else if diff_pct < 1.0 && merchant_fuzzy && days <= 5 {
            (
                0.60,
                vec![
                    format!("amount within 1% ({:.2}%)", diff_pct),
                    "merchant similar".to_string(),
                    format!("{} days apart", days),
                ],
            )
        } else {
            continue;
        };

        if confidence < LOW_CONFIDENCE {
            continue;
        }
        match &best {
            Some((best_confidence, _, _)) if *best_confidence >= confidence => {}
            _ => best = Some((confidence, txn, reasons)),
        }
    }

    match best {
        Some((confidence, txn, reasons)) => {
            debug!(
                row = %row.reference,
                txn = txn.id,
                confidence,
                "statement row matched"
            );
            let tier = if confidence >= HIGH_CONFIDENCE {
                "high"
            } else if confidence >= MEDIUM_CONFIDENCE {
                "medium"
            } else {
                "low"
            };
            let mut reasons = reasons;
            reasons.push(format!("{} confidence tier", tier));
            Some(Candidate::Match(txn.id, confidence, reasons))
        }
        None => mismatch.map(|(txn_id, amount)| Candidate::AmountMismatch(txn_id, amount)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bank, Currency, StatementSection, TxnKind, TxnStatus};
    use rust_decimal_macros::dec;

    fn row(id: i64, description: &str, amount: Decimal, date: NaiveDate) -> StatementRow {
        StatementRow {
            id,
            statement_id: 1,
            reference: format!("{:06}", id),
            ordinal: id,
            date,
            description: description.to_string(),
            currency: Currency::Crc,
            amount,
            section: StatementSection::Purchases,
            location: None,
            matched_transaction_id: None,
        }
    }

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
            txn_time: chrono::TimeZone::from_utc_datetime(
                &Utc,
                &date.and_hms_opt(18, 0, 0).unwrap(),
            ),
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
    fn test_high_confidence_match() {
        let date = NaiveDate::from_ymd_opt(2024, 11, 5).unwrap();
        let r = row(1, "AUTOMERCADO ESCAZU", dec!(15000), date);
        let candidates = vec![txn(10, "AUTOMERCADO ESCAZU 00291", dec!(15000), date)];

        match best_match(&r, &candidates, &HashSet::new()) {
            Some(Candidate::Match(txn_id, confidence, reasons)) => {
                assert_eq!(txn_id, 10);
                assert!(confidence >= 0.90);
                assert!(reasons.iter().any(|r| r == "amount equal"));
            }
            _ => panic!("expected high-confidence match"),
        }
    }

    #[test]
    fn test_medium_match_on_shared_token() {
        let date = NaiveDate::from_ymd_opt(2024, 11, 5).unwrap();
        let r = row(1, "UBER TRIP HELP.UBER.COM", dec!(4500), date);
        let candidates = vec![txn(
            10,
            "UBER TRIP",
            dec!(4500),
            date + chrono::Duration::days(3),
        )];

        match best_match(&r, &candidates, &HashSet::new()) {
            Some(Candidate::Match(_, confidence, _)) => {
                assert!((MEDIUM_CONFIDENCE..HIGH_CONFIDENCE).contains(&confidence));
            }
            _ => panic!("expected medium match"),
        }
    }

    #[test]
    fn test_amount_mismatch_reported() {
        let date = NaiveDate::from_ymd_opt(2024, 11, 5).unwrap();
        let r = row(1, "AUTOMERCADO ESCAZU", dec!(15000), date);
        // Same merchant and date, amount 3% apart
        let candidates = vec![txn(10, "AUTOMERCADO ESCAZU", dec!(15450), date)];

        match best_match(&r, &candidates, &HashSet::new()) {
            Some(Candidate::AmountMismatch(txn_id, amount)) => {
                assert_eq!(txn_id, 10);
                assert_eq!(amount, dec!(15450));
            }
            _ => panic!("expected amount mismatch"),
        }
    }

    #[test]
    fn test_small_divergence_is_mismatch_not_weak_match() {
        let date = NaiveDate::from_ymd_opt(2024, 11, 5).unwrap();
        let r = row(1, "AUTOMERCADO ESCAZU", dec!(15000), date);
        // Exact merchant and date, amount 0.7% apart: inside the low
        // tier's 1% window but past the mismatch threshold
        let candidates = vec![txn(10, "AUTOMERCADO ESCAZU", dec!(15105), date)];

        match best_match(&r, &candidates, &HashSet::new()) {
            Some(Candidate::AmountMismatch(txn_id, amount)) => {
                assert_eq!(txn_id, 10);
                assert_eq!(amount, dec!(15105));
            }
            _ => panic!("expected amount mismatch, not a low-confidence match"),
        }
    }

    #[test]
    fn test_no_candidate_is_only_in_pdf() {
        let date = NaiveDate::from_ymd_opt(2024, 11, 5).unwrap();
        let r = row(1, "SUPERMERCADO EFECTIVO", dec!(8000), date);
        let candidates = vec![txn(10, "NETFLIX.COM", dec!(5500), date)];
        assert!(best_match(&r, &candidates, &HashSet::new()).is_none());
    }

    #[test]
    fn test_claimed_candidates_are_skipped() {
        let date = NaiveDate::from_ymd_opt(2024, 11, 5).unwrap();
        let r = row(1, "AUTOMERCADO", dec!(15000), date);
        let candidates = vec![txn(10, "AUTOMERCADO", dec!(15000), date)];
        let claimed: HashSet<i64> = [10].into_iter().collect();
        assert!(best_match(&r, &candidates, &claimed).is_none());
    }
}
