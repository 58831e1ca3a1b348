//! Transaction ingestion pipeline
//!
//! One direction, per record: parse → normalize merchant → derive identity
//! → convert currency → flag internal transfers → categorize → persist.
//! Everything that can be skipped is skipped per-record; a single bad
//! message never fails a batch. The only aborting errors are internal
//! invariants (`Error::Integrity`), which indicate a bug.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::anomaly::{detect_internal_transfer, InternalTransferDetector, TransferFamily};
use crate::categorize::{Categorizer, CategoryDecision};
use crate::db::{Database, TransactionInsertResult};
use crate::dedup;
use crate::error::{Error, Result};
use crate::fx::ExchangeRateCache;
use crate::mail::RawMessage;
use crate::merchant::MerchantNormalizer;
use crate::models::{IngestStats, NewTransaction, TxnKind, TxnStatus};
use crate::parse::{self, statement::ParsedStatement, ParsedTransaction};

/// The per-record ingestion pipeline
pub struct TransactionProcessor {
    db: Database,
    fx: Arc<ExchangeRateCache>,
    categorizer: Categorizer,
    normalizer: MerchantNormalizer,
    transfers: InternalTransferDetector,
}

impl TransactionProcessor {
    pub fn new(db: Database, fx: Arc<ExchangeRateCache>, categorizer: Categorizer) -> Self {
        Self {
            normalizer: MerchantNormalizer::new(db.clone()),
            transfers: InternalTransferDetector::new(db.clone()),
            db,
            fx,
            categorizer,
        }
    }

    /// Ingest a batch of raw messages for a profile.
    ///
    /// Returns per-bucket counters; the caller decides what to surface.
    pub async fn process_messages(
        &self,
        profile_id: &str,
        messages: &[RawMessage],
    ) -> Result<IngestStats> {
        let mut stats = IngestStats::default();

        for message in messages {
            let Some(parsed) = parse::parse_message(message) else {
                stats.skipped_non_transaction += 1;
                continue;
            };

            let email_id = dedup::email_source_id(&message.id);
            match self.ingest_one(profile_id, &email_id, parsed, &mut stats).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    // Parse/validation/storage problems skip the record
                    warn!(message_id = %message.id, error = %e, "message skipped");
                    stats.errors += 1;
                }
            }
        }

        info!(
            profile_id,
            processed = stats.processed,
            duplicates = stats.duplicates,
            errors = stats.errors,
            needs_review = stats.needs_review,
            "email batch ingested"
        );
        Ok(stats)
    }

    /// Ingest the rows of a parsed statement through the same pipeline, so
    /// statement-sourced transactions are indistinguishable from
    /// email-sourced ones. `only_rows` restricts ingestion to specific row
    /// ordinals (the reconciliation "add missing" path); None ingests all.
    pub async fn process_statement_rows(
        &self,
        profile_id: &str,
        statement: &ParsedStatement,
        only_rows: Option<&[i64]>,
    ) -> Result<IngestStats> {
        let mut stats = IngestStats::default();
        let statement_key = statement.statement_key(profile_id);

        for row in &statement.rows {
            if let Some(wanted) = only_rows {
                if !wanted.contains(&row.ordinal) {
                    continue;
                }
            }

            let email_id = dedup::statement_row_id(
                &statement_key,
                &row.reference,
                row.ordinal,
                &row.description,
                row.amount,
            );

            let parsed = ParsedTransaction {
                bank: statement.bank,
                kind: row.section.txn_kind(),
                merchant_raw: row.description.clone(),
                amount: row.amount,
                currency: row.currency,
                txn_time: parse::local_noon(row.date),
                city: row.location.clone(),
                country: None,
                card_last_four: None,
                is_international: false,
                metadata: Default::default(),
            };

            match self.ingest_one(profile_id, &email_id, parsed, &mut stats).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(reference = %row.reference, error = %e, "statement row skipped");
                    stats.errors += 1;
                }
            }
        }

        info!(
            profile_id,
            processed = stats.processed,
            duplicates = stats.duplicates,
            "statement rows ingested"
        );
        Ok(stats)
    }

    /// Ingest already-persisted statement rows (the reconcile add-missing
    /// path operating on a stored statement). Identity derivation matches
    /// `process_statement_rows` exactly, so a row added here deduplicates
    /// against one added there.
    pub async fn process_stored_rows(
        &self,
        profile_id: &str,
        statement: &crate::models::BankStatement,
        rows: &[crate::models::StatementRow],
    ) -> Result<IngestStats> {
        let mut stats = IngestStats::default();

        for row in rows {
            let email_id = dedup::statement_row_id(
                &statement.statement_key,
                &row.reference,
                row.ordinal,
                &row.description,
                row.amount,
            );

            let parsed = ParsedTransaction {
                bank: statement.bank,
                kind: row.section.txn_kind(),
                merchant_raw: row.description.clone(),
                amount: row.amount,
                currency: row.currency,
                txn_time: parse::local_noon(row.date),
                city: row.location.clone(),
                country: None,
                card_last_four: None,
                is_international: false,
                metadata: Default::default(),
            };

            match self.ingest_one(profile_id, &email_id, parsed, &mut stats).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(reference = %row.reference, error = %e, "stored row skipped");
                    stats.errors += 1;
                }
            }
        }
        Ok(stats)
    }

    /// The shared per-record pipeline
    async fn ingest_one(
        &self,
        profile_id: &str,
        email_id: &str,
        parsed: ParsedTransaction,
        stats: &mut IngestStats,
    ) -> Result<()> {
        // Validation before any side effects
        if parsed.amount.is_zero() {
            return Err(Error::InvalidData("zero amount".to_string()));
        }
        let today = chrono::Utc::now().date_naive();
        if parsed.txn_time.date_naive() > today + chrono::Duration::days(1) {
            return Err(Error::InvalidData(format!(
                "transaction dated in the future: {}",
                parsed.txn_time.date_naive()
            )));
        }

        // Fast duplicate check; the unique index is the real guard
        if self.db.email_id_exists(profile_id, email_id)? {
            stats.duplicates += 1;
            debug!(%email_id, "duplicate source, no-op");
            return Ok(());
        }

        // Merchant identity
        let merchant = self.normalizer.find_or_create(
            &parsed.merchant_raw,
            parsed.city.as_deref(),
            parsed.country.as_deref(),
        )?;

        // Currency conversion (cached; one provider call per date under
        // contention)
        let txn_date = parsed.txn_time.date_naive();
        let (fx_rate, amount_local) = self
            .fx
            .convert(parsed.amount, parsed.currency, txn_date)
            .await?;
        if fx_rate.is_some() {
            stats.fx_converted += 1;
        }

        // Internal-transfer detection: parser metadata first, descriptor
        // families second
        let mut is_internal = parsed.metadata.is_own_transfer;
        let mut special_type = is_internal.then(|| TransferFamily::OwnAccount.as_str().to_string());
        let mut card_id = None;
        let mut kind = parsed.kind;

        if let Some(detection) = detect_internal_transfer(&parsed.merchant_raw) {
            is_internal = true;
            special_type = Some(detection.family.as_str().to_string());
            if detection.family == TransferFamily::CardPayment {
                kind = TxnKind::CardPayment;
                card_id = self
                    .transfers
                    .resolve_card_payment(profile_id, &detection, amount_local)?;
            }
        }
        if card_id.is_none() {
            if let Some(digits) = &parsed.card_last_four {
                card_id = self.db.get_card_by_last_four(profile_id, digits)?.map(|c| c.id);
            }
        }
        if is_internal {
            stats.internal_transfers += 1;
        }

        // Categorization. Internal transfers and ambiguous SINPEs skip the
        // cascade: the former are not spending, the latter wait for the
        // user to clarify.
        let decision = if is_internal {
            CategoryDecision::Uncategorized
        } else if parsed.metadata.needs_reconciliation {
            CategoryDecision::Uncategorized
        } else {
            self.categorizer
                .categorize(
                    profile_id,
                    &parsed.merchant_raw,
                    Some(merchant.id),
                    amount_local,
                    kind,
                )
                .await?
        };

        let (subcategory_id, category_source, category_confidence, needs_review, alternatives) =
            match &decision {
                CategoryDecision::Hit {
                    subcategory_id,
                    source,
                    confidence,
                } => (Some(*subcategory_id), Some(*source), Some(*confidence), false, None),
                CategoryDecision::NeedsReview {
                    subcategory_id,
                    source,
                    confidence,
                    alternatives,
                } => (
                    *subcategory_id,
                    Some(*source),
                    Some(*confidence),
                    true,
                    Some(alternatives.clone()),
                ),
                CategoryDecision::Uncategorized => (None, None, None, !is_internal, None),
            };

        match &decision {
            CategoryDecision::Hit { .. } => stats.auto_categorized += 1,
            _ if needs_review => stats.needs_review += 1,
            _ => {}
        }

        let ambiguous = parsed.metadata.needs_reconciliation;
        let new_txn = NewTransaction {
            profile_id: profile_id.to_string(),
            email_id: email_id.to_string(),
            bank: parsed.bank,
            card_id,
            kind,
            merchant_raw: parsed.merchant_raw.clone(),
            merchant_id: Some(merchant.id),
            amount_original: parsed.amount,
            currency_original: parsed.currency,
            fx_rate,
            amount_local,
            txn_time: parsed.txn_time,
            beneficiary: parsed.metadata.beneficiary.clone(),
            transfer_memo: parsed.metadata.concepto.clone(),
            subtype: parsed.metadata.subtype.clone(),
            bank_reference: parsed.metadata.bank_reference.clone(),
            bank_account_iban: parsed
                .metadata
                .bank_reference
                .as_ref()
                .filter(|r| r.starts_with("CR"))
                .cloned(),
            subcategory_id,
            category_confidence,
            category_source,
            ai_suggested_subcategory_id: (category_source == Some(crate::models::CategorySource::Llm))
                .then_some(subcategory_id)
                .flatten(),
            category_needs_review: needs_review,
            status: TxnStatus::Confirmed,
            is_internal_transfer: is_internal,
            // Invariant: internal transfers never count against budgets
            exclude_from_budget: is_internal,
            is_ambiguous_merchant: ambiguous,
            is_international: parsed.is_international,
            special_type,
        };

        // Consistency check after conversion (invariant kind: fail loudly)
        verify_amount_invariant(&new_txn)?;

        match self.db.insert_transaction(&new_txn)? {
            TransactionInsertResult::Inserted(id) => {
                stats.processed += 1;
                if let Some(alts) = alternatives {
                    if !alts.is_empty() {
                        debug!(txn = id, alternatives = ?alts, "review alternatives recorded");
                    }
                }
            }
            TransactionInsertResult::Duplicate(_) => {
                stats.duplicates += 1;
            }
        }
        Ok(())
    }
}

/// The conversion invariant: local amounts follow the original amount and
/// rate exactly (half-up, two digits); local-currency rows carry no rate.
fn verify_amount_invariant(tx: &NewTransaction) -> Result<()> {
    match tx.fx_rate {
        None => {
            if tx.amount_local != tx.amount_original {
                return Err(Error::Integrity(format!(
                    "local transaction {} has amount_local {} != amount_original {}",
                    tx.email_id, tx.amount_local, tx.amount_original
                )));
            }
        }
        Some(rate) => {
            let expected = (tx.amount_original * rate).round_dp_with_strategy(
                2,
                rust_decimal::RoundingStrategy::MidpointAwayFromZero,
            );
            if (tx.amount_local - expected).abs() > Decimal::new(1, 2) {
                return Err(Error::Integrity(format!(
                    "converted transaction {} has amount_local {} != {} x {}",
                    tx.email_id, tx.amount_local, tx.amount_original, rate
                )));
            }
        }
    }
    Ok(())
}
