//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `profiles` - Profile lifecycle and sync metadata commits
//! - `transactions` - Transaction insert-or-duplicate and queries
//! - `merchants` - Canonical merchant records and aliases
//! - `subcategories` - Subcategory catalog and keyword index
//! - `patterns` - Learned patterns, global suggestions, SINPE contacts
//! - `cards` - Card registry and running balances
//! - `statements` - Bank statements, rows, reconciliation outcomes
//! - `subscriptions` - Detected recurring charges
//! - `rates` - Durable exchange-rate cache
//! - `budgets` - Monthly budgets per subcategory

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rust_decimal::Decimal;
use tracing::info;

use crate::error::{Error, Result};

mod budgets;
mod cards;
mod merchants;
mod patterns;
mod profiles;
mod rates;
mod statements;
mod subcategories;
mod subscriptions;
mod transactions;

#[cfg(test)]
mod tests;

pub use transactions::TransactionInsertResult;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "CENTAVO_DB_KEY";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the
/// same key, regardless of database path. This allows moving/renaming/
/// restoring the database freely.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Fixed application salt - changing this would invalidate all existing
    // encrypted databases
    const APP_SALT: &[u8; 16] = b"centavo-salt-v1.";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a stored "YYYY-MM-DD" date
pub(crate) fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::InvalidData(format!("Bad stored date '{}': {}", s, e)))
}

/// Parse a stored decimal amount
pub(crate) fn parse_decimal(s: &str) -> Result<Decimal> {
    s.parse::<Decimal>()
        .map_err(|e| Error::InvalidData(format!("Bad stored decimal '{}': {}", s, e)))
}

/// Format a DateTime for SQLite storage
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `CENTAVO_DB_KEY` environment variable to be set. The
    /// database will be encrypted using SQLCipher with a key derived from
    /// the passphrase via Argon2.
    ///
    /// Returns an error if `CENTAVO_DB_KEY` is not set. Use
    /// `new_unencrypted()` for development/testing without encryption.
    pub fn new(path: &str) -> Result<Self> {
        let encryption_key = std::env::var(DB_KEY_ENV).ok();
        match encryption_key {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    ///
    /// WARNING: This creates an unencrypted database. Only use for
    /// development or testing.
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        let pool = if let Some(pass) = passphrase {
            let key = derive_key(pass)?;
            let key_pragma = format!("PRAGMA key = 'x\"{}\"';", key);

            // Set the key on every new connection
            let manager = manager.with_init(move |conn| {
                conn.execute_batch(&key_pragma)?;
                Ok(())
            });

            Pool::builder().max_size(10).build(manager)?
        } else {
            Pool::builder().max_size(10).build(manager)?
        };

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create an in-memory database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because SQLCipher
    /// has issues with in-memory databases in the connection pool.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = format!(
            "{}/centavo_test_{}_{}.db",
            std::env::temp_dir().display(),
            std::process::id(),
            id
        );

        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- WAL mode: readers don't block writers; ingestion never blocks
            -- the read path
            PRAGMA journal_mode = WAL;
            PRAGMA cache_size = 2000;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Profiles (data isolation boundaries; sync metadata lives here)
            CREATE TABLE IF NOT EXISTS profile (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                mail_address TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT 1,
                last_statement_date DATE,
                last_sync_date DATE,
                statement_cycle_days INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Canonical merchants (never deleted; aliases accumulate)
            CREATE TABLE IF NOT EXISTS merchant (
                id INTEGER PRIMARY KEY,
                normalized_name TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                city TEXT,
                country TEXT,
                aliases TEXT NOT NULL DEFAULT '[]',   -- JSON array of raw variants
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Subcategory catalog with keyword index for the rule layer
            CREATE TABLE IF NOT EXISTS subcategory (
                id INTEGER PRIMARY KEY,
                category TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                keywords TEXT,                        -- comma-separated
                UNIQUE(category, name)
            );

            -- Cards registered to a profile
            CREATE TABLE IF NOT EXISTS card (
                id INTEGER PRIMARY KEY,
                profile_id TEXT NOT NULL REFERENCES profile(id),
                bank TEXT NOT NULL,
                last_four TEXT NOT NULL,
                kind TEXT NOT NULL,                   -- credit, debit
                current_balance TEXT,                 -- decimal as text
                active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(profile_id, last_four)
            );

            -- Transactions (the canonical unit)
            CREATE TABLE IF NOT EXISTS "transaction" (
                id INTEGER PRIMARY KEY,
                profile_id TEXT NOT NULL REFERENCES profile(id),
                email_id TEXT NOT NULL,
                bank TEXT NOT NULL,
                card_id INTEGER REFERENCES card(id),
                kind TEXT NOT NULL,
                merchant_raw TEXT NOT NULL,
                merchant_id INTEGER REFERENCES merchant(id),
                amount_original TEXT NOT NULL,        -- decimal as text
                currency_original TEXT NOT NULL,
                fx_rate TEXT,                         -- NULL when local currency
                amount_local TEXT NOT NULL,
                txn_time DATETIME NOT NULL,
                beneficiary TEXT,
                transfer_memo TEXT,
                subtype TEXT,
                bank_reference TEXT,
                bank_account_iban TEXT,
                subcategory_id INTEGER REFERENCES subcategory(id),
                category_confidence INTEGER,
                category_source TEXT,
                ai_suggested_subcategory_id INTEGER REFERENCES subcategory(id),
                category_needs_review BOOLEAN NOT NULL DEFAULT 0,
                category_confirmed_by_user BOOLEAN NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'confirmed',
                is_internal_transfer BOOLEAN NOT NULL DEFAULT 0,
                exclude_from_budget BOOLEAN NOT NULL DEFAULT 0,
                is_ambiguous_merchant BOOLEAN NOT NULL DEFAULT 0,
                is_international BOOLEAN NOT NULL DEFAULT 0,
                is_anomaly BOOLEAN NOT NULL DEFAULT 0,
                anomaly_score REAL,
                special_type TEXT,
                notes TEXT,
                context TEXT,
                adjustment_reason TEXT,
                reconciled_at DATETIME,
                statement_row_id INTEGER REFERENCES statement_row(id),
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(profile_id, email_id)
            );

            CREATE INDEX IF NOT EXISTS idx_txn_profile_time
                ON "transaction"(profile_id, txn_time);
            CREATE INDEX IF NOT EXISTS idx_txn_profile_merchant_time
                ON "transaction"(profile_id, merchant_id, txn_time);
            CREATE INDEX IF NOT EXISTS idx_txn_profile_review
                ON "transaction"(profile_id, category_needs_review);
            CREATE INDEX IF NOT EXISTS idx_txn_profile_status
                ON "transaction"(profile_id, status);

            -- Learned categorization patterns per profile
            CREATE TABLE IF NOT EXISTS learned_pattern (
                id INTEGER PRIMARY KEY,
                profile_id TEXT NOT NULL REFERENCES profile(id),
                pattern_key TEXT NOT NULL,
                subcategory_id INTEGER NOT NULL REFERENCES subcategory(id),
                user_label TEXT,
                times_matched INTEGER NOT NULL DEFAULT 0,
                times_confirmed INTEGER NOT NULL DEFAULT 0,
                times_rejected INTEGER NOT NULL DEFAULT 0,
                confidence TEXT NOT NULL DEFAULT '0.5',
                source TEXT NOT NULL DEFAULT 'correction',
                is_recurring BOOLEAN NOT NULL DEFAULT 0,
                recurring_cadence_days INTEGER,
                avg_amount TEXT,
                min_amount TEXT,
                max_amount TEXT,
                last_seen_at DATETIME,
                UNIQUE(profile_id, pattern_key)
            );

            -- Crowd-sourced suggestions (cross-profile overlay)
            CREATE TABLE IF NOT EXISTS global_suggestion (
                id INTEGER PRIMARY KEY,
                pattern_key TEXT NOT NULL UNIQUE,
                suggested_subcategory_id INTEGER NOT NULL REFERENCES subcategory(id),
                user_count INTEGER NOT NULL DEFAULT 1,
                confidence TEXT NOT NULL DEFAULT '0.75',
                status TEXT NOT NULL DEFAULT 'pending',
                approved_at DATETIME
            );

            -- Learned SINPE contacts per profile
            CREATE TABLE IF NOT EXISTS contact (
                id INTEGER PRIMARY KEY,
                profile_id TEXT NOT NULL REFERENCES profile(id),
                contact_key TEXT NOT NULL,
                display_name TEXT NOT NULL,
                default_subcategory_id INTEGER REFERENCES subcategory(id),
                total_transactions INTEGER NOT NULL DEFAULT 0,
                total_amount TEXT NOT NULL DEFAULT '0',
                last_transaction_at DATETIME,
                UNIQUE(profile_id, contact_key)
            );

            -- Detected recurring charges
            CREATE TABLE IF NOT EXISTS subscription (
                id INTEGER PRIMARY KEY,
                profile_id TEXT NOT NULL REFERENCES profile(id),
                merchant_key TEXT NOT NULL,
                merchant_id INTEGER REFERENCES merchant(id),
                avg_amount TEXT NOT NULL,
                min_amount TEXT NOT NULL,
                max_amount TEXT NOT NULL,
                cadence TEXT NOT NULL,
                first_seen DATE NOT NULL,
                last_seen DATE NOT NULL,
                next_expected DATE NOT NULL,
                confidence INTEGER NOT NULL,
                occurrences INTEGER NOT NULL,
                active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(profile_id, merchant_key)
            );

            -- Ingested bank statements and their reconciliation outcomes
            CREATE TABLE IF NOT EXISTS bank_statement (
                id INTEGER PRIMARY KEY,
                profile_id TEXT NOT NULL REFERENCES profile(id),
                bank TEXT NOT NULL,
                kind TEXT NOT NULL,
                statement_key TEXT NOT NULL UNIQUE,
                period_start DATE NOT NULL,
                period_end DATE NOT NULL,
                due_date DATE,
                credit_limit TEXT,
                minimum_payment TEXT,
                total_rows INTEGER NOT NULL DEFAULT 0,
                matched_count INTEGER NOT NULL DEFAULT 0,
                match_percentage REAL NOT NULL DEFAULT 0,
                reconciliation_status TEXT,
                reconciled_at DATETIME,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS statement_row (
                id INTEGER PRIMARY KEY,
                statement_id INTEGER NOT NULL REFERENCES bank_statement(id) ON DELETE CASCADE,
                reference TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                date DATE NOT NULL,
                description TEXT NOT NULL,
                currency TEXT NOT NULL,
                amount TEXT NOT NULL,
                section TEXT NOT NULL,
                location TEXT,
                matched_transaction_id INTEGER REFERENCES "transaction"(id)
            );

            CREATE INDEX IF NOT EXISTS idx_statement_row_statement
                ON statement_row(statement_id);

            -- Monthly budgets
            CREATE TABLE IF NOT EXISTS budget (
                id INTEGER PRIMARY KEY,
                profile_id TEXT NOT NULL REFERENCES profile(id),
                subcategory_id INTEGER NOT NULL REFERENCES subcategory(id),
                monthly_amount TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT 1,
                UNIQUE(profile_id, subcategory_id)
            );

            -- Durable exchange-rate cache (tier 2)
            CREATE TABLE IF NOT EXISTS exchange_rate_cache (
                rate_date DATE NOT NULL,
                currency TEXT NOT NULL,
                rate TEXT NOT NULL,
                source TEXT NOT NULL,                 -- official, fallback, default
                fetched_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (rate_date, currency)
            );
            "#,
        )?;

        Ok(())
    }

    /// Soft reset: clear all transactional data but preserve configuration
    ///
    /// Clears: transactions, statements and rows, subscriptions, learned
    ///         patterns, contacts, exchange-rate cache
    /// Preserves: profiles, merchants, subcategories, cards, budgets
    pub fn soft_reset(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            DELETE FROM statement_row;
            DELETE FROM bank_statement;
            DELETE FROM subscription;
            DELETE FROM learned_pattern;
            DELETE FROM contact;
            DELETE FROM "transaction";
            DELETE FROM exchange_rate_cache;
            "#,
        )?;

        info!("Database soft reset complete");
        Ok(())
    }
}
