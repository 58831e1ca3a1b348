//! Internal-transfer and statistical-anomaly detection
//!
//! Internal transfers (card payments, own-account moves, programmed
//! savings) are money shuffles, not spending: they get flagged, excluded
//! from budgets, and card payments additionally pay down the matching
//! card's running balance.
//!
//! Statistical anomalies compare each transaction against a rolling
//! 90-day mean and sample standard deviation for its (profile,
//! subcategory); anything beyond three sigmas is flagged with its score.

use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::Result;
use crate::models::{Card, CardKind, Transaction};

/// Sigma multiplier for the outlier flag
const ANOMALY_SIGMA: f64 = 3.0;

/// Rolling window for the baseline
const ANOMALY_WINDOW_DAYS: i64 = 90;

/// Minimum samples before a baseline is trustworthy
const ANOMALY_MIN_SAMPLES: usize = 5;

/// Balance-pairing tolerance when a payment carries no card digits (CRC)
const BALANCE_PAIR_TOLERANCE: &str = "1000";

/// Internal-transfer descriptor family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFamily {
    CardPayment,
    OwnAccount,
    Savings,
}

impl TransferFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CardPayment => "card_payment",
            Self::OwnAccount => "own_account",
            Self::Savings => "savings",
        }
    }
}

/// A positive descriptor match
#[derive(Debug, Clone)]
pub struct TransferDetection {
    pub family: TransferFamily,
    /// 0-100, per pattern, adjusted by card resolution
    pub confidence: i64,
    pub last_four: Option<String>,
}

struct PatternFamily {
    regex: Regex,
    family: TransferFamily,
    confidence: i64,
}

fn pattern_families() -> &'static Vec<PatternFamily> {
    static FAMILIES: OnceLock<Vec<PatternFamily>> = OnceLock::new();
    FAMILIES.get_or_init(|| {
        let build = |pattern: &str, family, confidence| PatternFamily {
            regex: Regex::new(pattern).expect("static regex"),
            family,
            confidence,
        };
        vec![
            build(
                r"PAGO\s+(?:A\s+)?(?:SU\s+)?TARJETA(?:\s+DE)?(?:\s+CREDITO)?",
                TransferFamily::CardPayment,
                95,
            ),
            build(r"PAGO\s+T\.?C\.?", TransferFamily::CardPayment, 90),
            build(r"PAGO\s+VISA", TransferFamily::CardPayment, 90),
            build(r"PAGO\s+MASTERCARD", TransferFamily::CardPayment, 90),
            build(r"PAGO\s+AMEX", TransferFamily::CardPayment, 90),
            build(r"ABONO\s+(?:A\s+)?TARJETA", TransferFamily::CardPayment, 80),
            build(
                r"TRANSF(?:ERENCIA)?\s+(?:A\s+)?CTA\s+PROPIA",
                TransferFamily::OwnAccount,
                95,
            ),
            build(
                r"TRANSF(?:ERENCIA)?\s+ENTRE\s+CUENTAS",
                TransferFamily::OwnAccount,
                90,
            ),
            build(
                r"TRASLADO\s+(?:A\s+)?(?:MI\s+)?CUENTA",
                TransferFamily::OwnAccount,
                85,
            ),
            build(r"AHORRO\s+PROGRAMADO", TransferFamily::Savings, 90),
            build(r"INVERSION\s+AUTOMATICA", TransferFamily::Savings, 85),
        ]
    })
}

fn last_four_regexes() -> &'static (Regex, Regex) {
    static REGEXES: OnceLock<(Regex, Regex)> = OnceLock::new();
    REGEXES.get_or_init(|| {
        (
            Regex::new(r"(?:\*{4}|\d{4}[-\s])(\d{4})").expect("static regex"),
            Regex::new(r"(\d{4})\s*$").expect("static regex"),
        )
    })
}

/// Extract trailing card digits from a descriptor
fn extract_last_four(descriptor: &str) -> Option<String> {
    let (primary, trailing) = last_four_regexes();
    primary
        .captures(descriptor)
        .or_else(|| trailing.captures(descriptor))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Match a raw descriptor against the known internal-transfer families.
/// Pure function; no storage involved.
pub fn detect_internal_transfer(descriptor: &str) -> Option<TransferDetection> {
    let upper = descriptor.to_uppercase();
    for family in pattern_families() {
        if family.regex.is_match(&upper) {
            return Some(TransferDetection {
                family: family.family,
                confidence: family.confidence,
                last_four: extract_last_four(&upper),
            });
        }
    }
    None
}

/// Storage-aware side of transfer detection: card resolution and balance
/// updates
pub struct InternalTransferDetector {
    db: Database,
}

impl InternalTransferDetector {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Resolve the card a payment belongs to and pay down its balance.
    ///
    /// Digits resolve directly; without digits the best-matching credit
    /// card balance is paired heuristically. Returns the card id when one
    /// was found.
    pub fn resolve_card_payment(
        &self,
        profile_id: &str,
        detection: &TransferDetection,
        amount: Decimal,
    ) -> Result<Option<i64>> {
        if detection.family != TransferFamily::CardPayment {
            return Ok(None);
        }

        let card = match &detection.last_four {
            Some(digits) => self.db.get_card_by_last_four(profile_id, digits)?,
            None => self.pair_card_by_balance(profile_id, amount)?,
        };

        match card {
            Some(card) => {
                self.db.apply_card_payment(card.id, amount.abs())?;
                debug!(
                    card = %card.last_four,
                    amount = %amount,
                    "card payment applied to balance"
                );
                Ok(Some(card.id))
            }
            None => Ok(None),
        }
    }

    /// Without digits, pair the payment with the credit card whose running
    /// balance sits closest to the paid amount (a full payoff is the
    /// common case).
    fn pair_card_by_balance(&self, profile_id: &str, amount: Decimal) -> Result<Option<Card>> {
        let tolerance: Decimal = BALANCE_PAIR_TOLERANCE.parse().expect("static tolerance");
        let mut best: Option<(Decimal, Card)> = None;

        for card in self.db.list_cards(profile_id)? {
            if card.kind != CardKind::Credit {
                continue;
            }
            let Some(balance) = card.current_balance else {
                continue;
            };
            let diff = (balance - amount.abs()).abs();
            if diff > tolerance {
                continue;
            }
            match &best {
                Some((best_diff, _)) if *best_diff <= diff => {}
                _ => best = Some((diff, card)),
            }
        }
        Ok(best.map(|(_, card)| card))
    }
}

/// Statistical outlier detection over a profile's recent transactions
pub struct AnomalyDetector {
    db: Database,
}

impl AnomalyDetector {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Flag transactions whose amount deviates more than three sigmas
    /// from the rolling 90-day mean of their (profile, subcategory).
    /// Returns the number of newly flagged transactions.
    pub fn detect(&self, profile_id: &str, today: chrono::NaiveDate) -> Result<usize> {
        let window_start = today - chrono::Duration::days(ANOMALY_WINDOW_DAYS);
        let transactions = self.db.transactions_in_period(profile_id, window_start, today)?;

        // Group budget-relevant spending by subcategory
        let mut by_subcategory: HashMap<i64, Vec<&Transaction>> = HashMap::new();
        for tx in &transactions {
            if tx.exclude_from_budget {
                continue;
            }
            if let Some(subcategory_id) = tx.subcategory_id {
                by_subcategory.entry(subcategory_id).or_default().push(tx);
            }
        }

        let mut flagged = 0;
        for (subcategory_id, group) in by_subcategory {
            if group.len() < ANOMALY_MIN_SAMPLES {
                continue;
            }

            let amounts: Vec<f64> = group
                .iter()
                .map(|t| t.amount_local.abs().to_f64().unwrap_or(0.0))
                .collect();
            let mean = amounts.iter().sum::<f64>() / amounts.len() as f64;
            // Sample standard deviation
            let variance = amounts
                .iter()
                .map(|a| (a - mean).powi(2))
                .sum::<f64>()
                / (amounts.len() - 1) as f64;
            let sigma = variance.sqrt();
            if sigma <= f64::EPSILON {
                continue;
            }

            for tx in group {
                if tx.is_anomaly {
                    continue;
                }
                let amount = tx.amount_local.abs().to_f64().unwrap_or(0.0);
                let z = (amount - mean).abs() / sigma;
                if z > ANOMALY_SIGMA {
                    self.db.flag_anomaly(tx.id, z)?;
                    debug!(
                        txn = tx.id,
                        subcategory_id,
                        z,
                        "anomaly flagged"
                    );
                    flagged += 1;
                }
            }
        }

        if flagged > 0 {
            info!(profile_id, flagged, "statistical anomalies flagged");
        }
        Ok(flagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_card_payment_patterns() {
        let detection = detect_internal_transfer("PAGO TARJETA DE CREDITO ****9887").unwrap();
        assert_eq!(detection.family, TransferFamily::CardPayment);
        assert_eq!(detection.confidence, 95);
        assert_eq!(detection.last_four.as_deref(), Some("9887"));

        let detection = detect_internal_transfer("PAGO TC 4521").unwrap();
        assert_eq!(detection.family, TransferFamily::CardPayment);
        assert_eq!(detection.last_four.as_deref(), Some("4521"));

        assert!(detect_internal_transfer("pago visa online").is_some());
    }

    #[test]
    fn test_own_account_patterns() {
        let detection = detect_internal_transfer("TRANSFERENCIA A CTA PROPIA").unwrap();
        assert_eq!(detection.family, TransferFamily::OwnAccount);

        let detection = detect_internal_transfer("AHORRO PROGRAMADO NOVIEMBRE").unwrap();
        assert_eq!(detection.family, TransferFamily::Savings);
    }

    #[test]
    fn test_ordinary_purchase_not_detected() {
        assert!(detect_internal_transfer("AUTOMERCADO ESCAZU").is_none());
        assert!(detect_internal_transfer("NETFLIX.COM").is_none());
    }

    #[test]
    fn test_card_resolution_decrements_balance() {
        let db = Database::in_memory().unwrap();
        db.create_profile("p1", "Personal", "u@example.com").unwrap();
        let card_id = db
            .create_card("p1", crate::models::Bank::Bac, "9887", CardKind::Credit, Some(dec!(300000)))
            .unwrap();

        let detector = InternalTransferDetector::new(db.clone());
        let detection = detect_internal_transfer("PAGO TARJETA ****9887").unwrap();
        let resolved = detector
            .resolve_card_payment("p1", &detection, dec!(250000))
            .unwrap();
        assert_eq!(resolved, Some(card_id));

        let card = db.get_card_by_last_four("p1", "9887").unwrap().unwrap();
        assert_eq!(card.current_balance, Some(dec!(50000)));
    }

    #[test]
    fn test_balance_pairing_without_digits() {
        let db = Database::in_memory().unwrap();
        db.create_profile("p1", "Personal", "u@example.com").unwrap();
        db.create_card("p1", crate::models::Bank::Bac, "1111", CardKind::Credit, Some(dec!(98000)))
            .unwrap();
        db.create_card("p1", crate::models::Bank::Bac, "2222", CardKind::Credit, Some(dec!(500000)))
            .unwrap();

        let detector = InternalTransferDetector::new(db.clone());
        // "PAGO DE TARJETA" with no digits: picks the 98k card for a 98.5k payment
        let detection = TransferDetection {
            family: TransferFamily::CardPayment,
            confidence: 95,
            last_four: None,
        };
        let resolved = detector
            .resolve_card_payment("p1", &detection, dec!(98500))
            .unwrap();
        let card = db.get_card_by_last_four("p1", "1111").unwrap().unwrap();
        assert!(resolved.is_some());
        assert_eq!(card.current_balance, Some(dec!(0)));
    }
}
