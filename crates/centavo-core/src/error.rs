//! Error types for centavo
//!
//! Variants are grouped by recovery policy: transient errors retry with
//! backoff, auth errors abort the run, parse/validation errors skip the
//! record, quota errors fall through to the next cascade layer, and
//! integrity errors abort and roll back.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Mail provider authentication failed: {0}")]
    MailAuth(String),

    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Provider quota exhausted: {0}")]
    Quota(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Internal invariant violated: {0}")]
    Integrity(String),
}

impl Error {
    /// Whether a retry with backoff is worth attempting.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Auth failures are never retried; they abort the task.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::MailAuth(_))
    }

    /// Integrity errors are the only kind that aborts a whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
