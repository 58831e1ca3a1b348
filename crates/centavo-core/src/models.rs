//! Domain models for centavo

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A data-isolation boundary: one user, or one "Personal"/"Business" slice.
///
/// Profiles are created during onboarding and never destroyed; `active`
/// is a soft-disable flag. Sync metadata lives here and is committed as a
/// single row after each successful sync phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub mail_address: String,
    pub active: bool,
    /// Cut date of the most recently ingested statement
    pub last_statement_date: Option<NaiveDate>,
    /// Last day covered by a successful email sync
    pub last_sync_date: Option<NaiveDate>,
    /// Estimated statement cadence in days (default 30 until inferred)
    pub statement_cycle_days: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Supported banks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bank {
    Bac,
    Popular,
}

impl Bank {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bac => "bac",
            Self::Popular => "popular",
        }
    }
}

impl std::str::FromStr for Bank {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bac" | "baccredomatic" => Ok(Self::Bac),
            "popular" | "bancopopular" => Ok(Self::Popular),
            _ => Err(format!("Unknown bank: {}", s)),
        }
    }
}

impl std::fmt::Display for Bank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction currency. CRC is the local currency; everything else is
/// converted through the exchange-rate cache at ingestion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Crc,
    Usd,
    Eur,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crc => "CRC",
            Self::Usd => "USD",
            Self::Eur => "EUR",
        }
    }

    /// Whether this is the local currency (no FX conversion needed).
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Crc)
    }
}

impl std::str::FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CRC" | "COLONES" | "₡" => Ok(Self::Crc),
            "USD" | "DOLARES" | "DÓLARES" | "$" => Ok(Self::Usd),
            "EUR" | "EUROS" | "€" => Ok(Self::Eur),
            _ => Err(format!("Unknown currency: {}", s)),
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnKind {
    Purchase,
    Transfer,
    Sinpe,
    Deposit,
    Withdrawal,
    InterestEarned,
    InterestCharge,
    ServicePayment,
    Insurance,
    CardPayment,
    Adjustment,
    Other,
}

impl TxnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Transfer => "transfer",
            Self::Sinpe => "sinpe",
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::InterestEarned => "interest_earned",
            Self::InterestCharge => "interest_charge",
            Self::ServicePayment => "service_payment",
            Self::Insurance => "insurance",
            Self::CardPayment => "card_payment",
            Self::Adjustment => "adjustment",
            Self::Other => "other",
        }
    }
}

impl std::str::FromStr for TxnKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "purchase" => Ok(Self::Purchase),
            "transfer" => Ok(Self::Transfer),
            "sinpe" => Ok(Self::Sinpe),
            "deposit" => Ok(Self::Deposit),
            "withdrawal" => Ok(Self::Withdrawal),
            "interest_earned" => Ok(Self::InterestEarned),
            "interest_charge" => Ok(Self::InterestCharge),
            "service_payment" => Ok(Self::ServicePayment),
            "insurance" => Ok(Self::Insurance),
            "card_payment" => Ok(Self::CardPayment),
            "adjustment" => Ok(Self::Adjustment),
            "other" => Ok(Self::Other),
            _ => Err(format!("Unknown transaction kind: {}", s)),
        }
    }
}

impl std::fmt::Display for TxnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TxnStatus {
    Pending,
    #[default]
    Confirmed,
    Reconciled,
    Cancelled,
    /// Statement row with no email counterpart that the user chose to keep
    Orphan,
}

impl TxnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Reconciled => "reconciled",
            Self::Cancelled => "cancelled",
            Self::Orphan => "orphan",
        }
    }
}

impl std::str::FromStr for TxnStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "reconciled" => Ok(Self::Reconciled),
            "cancelled" => Ok(Self::Cancelled),
            "orphan" => Ok(Self::Orphan),
            _ => Err(format!("Unknown transaction status: {}", s)),
        }
    }
}

impl std::fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which cascade layer produced a category suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorySource {
    /// Per-profile learned pattern (highest priority)
    UserPreference,
    /// SINPE contact default
    SinpeContact,
    /// Most recent confirmed transaction for the same merchant
    History,
    /// Keyword rules indexed by subcategory
    Keyword,
    /// Auto-approved crowd-sourced suggestion
    Crowd,
    /// LLM fallback
    Llm,
}

impl CategorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserPreference => "user_preference",
            Self::SinpeContact => "sinpe_contact",
            Self::History => "history",
            Self::Keyword => "keyword",
            Self::Crowd => "crowd",
            Self::Llm => "llm",
        }
    }
}

impl std::str::FromStr for CategorySource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user_preference" => Ok(Self::UserPreference),
            "sinpe_contact" => Ok(Self::SinpeContact),
            "history" => Ok(Self::History),
            "keyword" => Ok(Self::Keyword),
            "crowd" => Ok(Self::Crowd),
            "llm" => Ok(Self::Llm),
            _ => Err(format!("Unknown category source: {}", s)),
        }
    }
}

impl std::fmt::Display for CategorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The canonical transaction record.
///
/// `email_id` is the content-addressed identity: unique per profile,
/// derived from the upstream message id for email-sourced rows and from
/// a compound statement hash for PDF-sourced rows. Re-ingesting the same
/// source is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub profile_id: String,
    /// Content-addressed source identity; the dedup key
    pub email_id: String,
    pub bank: Bank,
    pub card_id: Option<i64>,
    pub kind: TxnKind,
    /// Raw descriptor as it appeared in the source
    pub merchant_raw: String,
    /// Link to the normalized merchant, once resolved
    pub merchant_id: Option<i64>,
    pub amount_original: Decimal,
    pub currency_original: Currency,
    /// Null when the original currency is local
    pub fx_rate: Option<Decimal>,
    /// Always in local currency (CRC), half-up rounded to 2 digits
    pub amount_local: Decimal,
    /// UTC instant; date-only sources are pinned to local noon
    pub txn_time: DateTime<Utc>,
    pub beneficiary: Option<String>,
    pub transfer_memo: Option<String>,
    pub subtype: Option<String>,
    pub bank_reference: Option<String>,
    /// Account identity for deposit transactions (dedup tie-breaking)
    pub bank_account_iban: Option<String>,
    pub subcategory_id: Option<i64>,
    /// 0-100; only meaningful when subcategory_id is set
    pub category_confidence: Option<i64>,
    pub category_source: Option<CategorySource>,
    /// The original AI suggestion, preserved across user corrections
    pub ai_suggested_subcategory_id: Option<i64>,
    pub category_needs_review: bool,
    pub category_confirmed_by_user: bool,
    pub status: TxnStatus,
    pub is_internal_transfer: bool,
    pub exclude_from_budget: bool,
    pub is_ambiguous_merchant: bool,
    pub is_international: bool,
    pub is_anomaly: bool,
    pub anomaly_score: Option<f64>,
    /// Internal-transfer family (card_payment, own_account, savings...)
    pub special_type: Option<String>,
    pub notes: Option<String>,
    pub context: Option<String>,
    pub adjustment_reason: Option<String>,
    pub reconciled_at: Option<DateTime<Utc>>,
    /// Statement row this transaction was reconciled against
    pub statement_row_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A new transaction ready for insertion (before DB assignment of id)
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub profile_id: String,
    pub email_id: String,
    pub bank: Bank,
    pub card_id: Option<i64>,
    pub kind: TxnKind,
    pub merchant_raw: String,
    pub merchant_id: Option<i64>,
    pub amount_original: Decimal,
    pub currency_original: Currency,
    pub fx_rate: Option<Decimal>,
    pub amount_local: Decimal,
    pub txn_time: DateTime<Utc>,
    pub beneficiary: Option<String>,
    pub transfer_memo: Option<String>,
    pub subtype: Option<String>,
    pub bank_reference: Option<String>,
    pub bank_account_iban: Option<String>,
    pub subcategory_id: Option<i64>,
    pub category_confidence: Option<i64>,
    pub category_source: Option<CategorySource>,
    pub ai_suggested_subcategory_id: Option<i64>,
    pub category_needs_review: bool,
    pub status: TxnStatus,
    pub is_internal_transfer: bool,
    pub exclude_from_budget: bool,
    pub is_ambiguous_merchant: bool,
    pub is_international: bool,
    pub special_type: Option<String>,
}

/// Canonical form of a vendor across descriptor variants.
///
/// Created on first sighting, merged when the normalizer determines
/// equivalence, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merchant {
    pub id: i64,
    /// Normalization-pipeline output; the lookup key
    pub normalized_name: String,
    pub display_name: String,
    pub city: Option<String>,
    pub country: Option<String>,
    /// Raw descriptor variants that resolved to this merchant
    pub aliases: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A spending subcategory with its keyword index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subcategory {
    pub id: i64,
    pub category: String,
    pub name: String,
    pub description: Option<String>,
    /// Comma-separated keywords for the rule-based cascade layer
    pub keywords: Option<String>,
}

impl Subcategory {
    /// "Category/Subcategory" display form
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }
}

/// Card kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardKind {
    Credit,
    Debit,
}

impl CardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
        }
    }
}

impl std::str::FromStr for CardKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "credit" => Ok(Self::Credit),
            "debit" => Ok(Self::Debit),
            _ => Err(format!("Unknown card kind: {}", s)),
        }
    }
}

/// A bank card registered to a profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: i64,
    pub profile_id: String,
    pub bank: Bank,
    pub last_four: String,
    pub kind: CardKind,
    /// Running balance, decremented when card payments are detected
    pub current_balance: Option<Decimal>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// How a learned pattern came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSource {
    UserExplicit,
    Correction,
    Imported,
}

impl PatternSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserExplicit => "user_explicit",
            Self::Correction => "correction",
            Self::Imported => "imported",
        }
    }
}

impl std::str::FromStr for PatternSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user_explicit" => Ok(Self::UserExplicit),
            "correction" => Ok(Self::Correction),
            "imported" => Ok(Self::Imported),
            _ => Err(format!("Unknown pattern source: {}", s)),
        }
    }
}

/// What the system has learned for a profile about a merchant family.
///
/// `pattern_key` is normalized and may carry a trailing glob
/// (e.g. `"SINPE MARIA%"`, `"UBER%"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub id: i64,
    pub profile_id: String,
    pub pattern_key: String,
    pub subcategory_id: i64,
    pub user_label: Option<String>,
    pub times_matched: i64,
    pub times_confirmed: i64,
    pub times_rejected: i64,
    /// 0.0 - 1.0
    pub confidence: Decimal,
    pub source: PatternSource,
    pub is_recurring: bool,
    pub recurring_cadence_days: Option<i64>,
    pub avg_amount: Option<Decimal>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Crowd-sourced suggestion status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    #[default]
    Pending,
    Approved,
    AutoApproved,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::AutoApproved => "auto_approved",
        }
    }
}

impl std::str::FromStr for SuggestionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "auto_approved" => Ok(Self::AutoApproved),
            _ => Err(format!("Unknown suggestion status: {}", s)),
        }
    }
}

/// Crowd-sourced categorization overlay, keyed by pattern.
///
/// Auto-approved once five distinct users have confirmed the same mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSuggestion {
    pub id: i64,
    pub pattern_key: String,
    pub suggested_subcategory_id: i64,
    pub user_count: i64,
    pub confidence: Decimal,
    pub status: SuggestionStatus,
    pub approved_at: Option<DateTime<Utc>>,
}

/// A learned SINPE contact for a profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinpeContact {
    pub id: i64,
    pub profile_id: String,
    /// Phone number when extractable, otherwise a name prefix
    pub contact_key: String,
    pub display_name: String,
    pub default_subcategory_id: Option<i64>,
    pub total_transactions: i64,
    pub total_amount: Decimal,
    pub last_transaction_at: Option<DateTime<Utc>>,
}

/// Recurrence cadence, snapped to named periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Weekly,
    Biweekly,
    Monthly,
    Bimonthly,
    Quarterly,
    Semiannual,
    Annual,
}

impl Cadence {
    pub fn days(&self) -> i64 {
        match self {
            Self::Weekly => 7,
            Self::Biweekly => 14,
            Self::Monthly => 30,
            Self::Bimonthly => 60,
            Self::Quarterly => 90,
            Self::Semiannual => 180,
            Self::Annual => 365,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Biweekly => "biweekly",
            Self::Monthly => "monthly",
            Self::Bimonthly => "bimonthly",
            Self::Quarterly => "quarterly",
            Self::Semiannual => "semiannual",
            Self::Annual => "annual",
        }
    }

    /// Snap a mean gap (in days) to the nearest named cadence.
    ///
    /// Monthly gets a ±5 day tolerance; other scales allow a few days
    /// proportional to their length. Returns None when the gap fits
    /// nothing.
    pub fn from_mean_gap(mean_gap: f64) -> Option<Self> {
        const CADENCES: [Cadence; 7] = [
            Cadence::Weekly,
            Cadence::Biweekly,
            Cadence::Monthly,
            Cadence::Bimonthly,
            Cadence::Quarterly,
            Cadence::Semiannual,
            Cadence::Annual,
        ];
        for cadence in CADENCES {
            let tolerance = match cadence {
                Cadence::Weekly | Cadence::Biweekly => 3.0,
                Cadence::Monthly => 5.0,
                Cadence::Bimonthly | Cadence::Quarterly => 7.0,
                Cadence::Semiannual => 15.0,
                Cadence::Annual => 30.0,
            };
            if (mean_gap - cadence.days() as f64).abs() <= tolerance {
                return Some(cadence);
            }
        }
        None
    }
}

impl std::str::FromStr for Cadence {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weekly" => Ok(Self::Weekly),
            "biweekly" => Ok(Self::Biweekly),
            "monthly" => Ok(Self::Monthly),
            "bimonthly" => Ok(Self::Bimonthly),
            "quarterly" => Ok(Self::Quarterly),
            "semiannual" => Ok(Self::Semiannual),
            "annual" => Ok(Self::Annual),
            _ => Err(format!("Unknown cadence: {}", s)),
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A detected recurring charge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub profile_id: String,
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
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Reconciliation outcome status for a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    /// 100% matched
    Perfect,
    /// >= 95% matched
    Good,
    /// < 95% matched
    NeedsReview,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Perfect => "perfect",
            Self::Good => "good",
            Self::NeedsReview => "needs_review",
        }
    }

    pub fn from_percentage(pct: f64) -> Self {
        if pct >= 100.0 {
            Self::Perfect
        } else if pct >= 95.0 {
            Self::Good
        } else {
            Self::NeedsReview
        }
    }
}

impl std::str::FromStr for ReconciliationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "perfect" => Ok(Self::Perfect),
            "good" => Ok(Self::Good),
            "needs_review" => Ok(Self::NeedsReview),
            _ => Err(format!("Unknown reconciliation status: {}", s)),
        }
    }
}

/// Statement variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    CreditCard,
    DepositAccount,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditCard => "credit_card",
            Self::DepositAccount => "deposit_account",
        }
    }
}

impl std::str::FromStr for StatementKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "credit_card" => Ok(Self::CreditCard),
            "deposit_account" => Ok(Self::DepositAccount),
            _ => Err(format!("Unknown statement kind: {}", s)),
        }
    }
}

/// An ingested bank statement and its reconciliation outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankStatement {
    pub id: i64,
    pub profile_id: String,
    pub bank: Bank,
    pub kind: StatementKind,
    /// Stable identity derived from (profile, bank, cut date)
    pub statement_key: String,
    pub period_start: NaiveDate,
    /// The statement cut: last day of the covered period
    pub period_end: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub credit_limit: Option<Decimal>,
    pub minimum_payment: Option<Decimal>,
    pub total_rows: i64,
    pub matched_count: i64,
    pub match_percentage: f64,
    pub reconciliation_status: Option<ReconciliationStatus>,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Statement sections recognized by the credit-card parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatementSection {
    #[default]
    Purchases,
    Interest,
    Charges,
    ProductsAndServices,
    Payments,
}

impl StatementSection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchases => "purchases",
            Self::Interest => "interest",
            Self::Charges => "charges",
            Self::ProductsAndServices => "products_and_services",
            Self::Payments => "payments",
        }
    }

    /// Transaction kind implied by rows in this section
    pub fn txn_kind(&self) -> TxnKind {
        match self {
            Self::Purchases => TxnKind::Purchase,
            Self::Interest => TxnKind::InterestCharge,
            Self::Charges => TxnKind::Adjustment,
            Self::ProductsAndServices => TxnKind::ServicePayment,
            Self::Payments => TxnKind::CardPayment,
        }
    }
}

impl std::str::FromStr for StatementSection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "purchases" => Ok(Self::Purchases),
            "interest" => Ok(Self::Interest),
            "charges" => Ok(Self::Charges),
            "products_and_services" => Ok(Self::ProductsAndServices),
            "payments" => Ok(Self::Payments),
            _ => Err(format!("Unknown statement section: {}", s)),
        }
    }
}

/// One extracted statement row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementRow {
    pub id: i64,
    pub statement_id: i64,
    /// Bank reference number; may repeat across statements
    pub reference: String,
    /// Position within the statement, part of the identity compound
    pub ordinal: i64,
    pub date: NaiveDate,
    pub description: String,
    pub currency: Currency,
    pub amount: Decimal,
    pub section: StatementSection,
    /// Location/currency tag column, when present
    pub location: Option<String>,
    /// Transaction this row reconciled against, if any
    pub matched_transaction_id: Option<i64>,
}

/// A monthly budget for a subcategory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub id: i64,
    pub profile_id: String,
    pub subcategory_id: i64,
    pub monthly_amount: Decimal,
    pub active: bool,
}

/// Per-bucket counters for one ingestion batch.
///
/// Everything that can be skipped is skipped per-record; these counters
/// are how a run reports what happened without surfacing each skip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub processed: i64,
    pub duplicates: i64,
    pub errors: i64,
    pub fx_converted: i64,
    pub auto_categorized: i64,
    pub needs_review: i64,
    pub internal_transfers: i64,
    pub skipped_non_transaction: i64,
}

impl IngestStats {
    pub fn merge(&mut self, other: &IngestStats) {
        self.processed += other.processed;
        self.duplicates += other.duplicates;
        self.errors += other.errors;
        self.fx_converted += other.fx_converted;
        self.auto_categorized += other.auto_categorized;
        self.needs_review += other.needs_review;
        self.internal_transfers += other.internal_transfers;
        self.skipped_non_transaction += other.skipped_non_transaction;
    }
}
