//! Centavo Core Library
//!
//! Shared functionality for the centavo personal finance sync engine:
//! - Database access and migrations
//! - Mail provider client with subject filtering
//! - Email and statement parsers for supported banks
//! - Two-tier exchange-rate cache with per-date single-flight
//! - Merchant normalization and fuzzy merge
//! - Layered categorization cascade with LLM fallback
//! - Content-addressed dedup and fuzzy duplicate detection
//! - Statement reconciliation
//! - Sync strategy (onboarding / daily / monthly) and scheduling
//! - Pattern learning from user corrections
//! - Recurring-expense, internal-transfer, and anomaly detectors
//! - Cached read models for the dashboard surface

pub mod anomaly;
pub mod cache;
pub mod categorize;
pub mod db;
pub mod dedup;
pub mod error;
pub mod fx;
pub mod ingest;
pub mod learn;
pub mod llm;
pub mod mail;
pub mod merchant;
pub mod models;
pub mod parse;
pub mod reconcile;
pub mod recurring;
pub mod sync;
pub mod views;

pub use anomaly::{detect_internal_transfer, AnomalyDetector, InternalTransferDetector};
pub use cache::ReadCache;
pub use categorize::{Categorizer, CategoryDecision};
pub use db::{Database, TransactionInsertResult};
pub use dedup::{find_duplicates, DuplicateMatch};
pub use error::{Error, Result};
pub use fx::{ExchangeRateCache, RateProvider, RateSource, StaticDefaultProvider};
pub use ingest::TransactionProcessor;
pub use learn::FeedbackService;
pub use llm::{LlmBackend, LlmClient, MockBackend};
pub use mail::{MailClient, MailConfig, RawMessage};
pub use merchant::MerchantNormalizer;
pub use parse::statement::{PlainTextExtractor, StatementParser, TextExtractor};
pub use reconcile::{ReconciliationEngine, ReconciliationReport};
pub use recurring::RecurringDetector;
pub use sync::{SyncConfig, SyncEngine, SyncMode, SyncScheduler};
pub use views::Views;
