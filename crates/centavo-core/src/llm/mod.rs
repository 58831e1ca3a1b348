//! Pluggable LLM backend abstraction
//!
//! The vendor LLM is used in exactly two places: the last layer of the
//! categorization cascade, and row extraction for deposit-account
//! statements whose text layer defeats the heuristic parser. No call is
//! load-bearing; every caller has a deterministic fallback, and quota or
//! parse failures fall through rather than failing ingestion.
//!
//! # Architecture
//!
//! - `LlmBackend` trait: defines the interface for LLM operations
//! - `LlmClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backend implementations: `HttpBackend`, `MockBackend`
//!
//! # Configuration
//!
//! Environment variables:
//! - `CENTAVO_LLM_URL`: Vendor endpoint (required for the http backend)
//! - `CENTAVO_LLM_API_KEY`: API key
//! - `CENTAVO_LLM_MODEL`: Model name (default: vendor default)

mod http;
mod mock;

pub use http::HttpBackend;
pub use mock::MockBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A subcategory option shown to the model: names and descriptions only,
/// never user data.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryOption {
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// Model response for a categorization request
#[derive(Debug, Clone, Deserialize)]
pub struct LlmCategorization {
    pub subcategory_id: Option<i64>,
    pub suggested_name: String,
    /// 0-100
    pub confidence: i64,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

/// One statement row extracted by the model. Must conform to this schema
/// exactly; non-conforming responses are rejected.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmStatementRow {
    pub reference: String,
    /// DD-MON-YY with Spanish month abbreviations, as printed
    pub date: String,
    pub description: String,
    pub currency: String,
    pub amount: String,
}

/// Trait defining the interface for all LLM backends
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Categorize a merchant given the available subcategories
    async fn categorize(
        &self,
        merchant_raw: &str,
        amount_local: &str,
        options: &[CategoryOption],
    ) -> Result<LlmCategorization>;

    /// Extract structured rows from deposit-statement text
    async fn extract_statement_rows(&self, text: &str) -> Result<Vec<LlmStatementRow>>;

    /// Model identifier (for logging)
    fn model(&self) -> &str;
}

/// Concrete LLM client enum
///
/// Provides Clone and compile-time dispatch without Box<dyn> overhead.
#[derive(Clone)]
pub enum LlmClient {
    Http(HttpBackend),
    Mock(MockBackend),
}

impl LlmClient {
    /// Create a client from environment variables.
    ///
    /// Returns None when no endpoint is configured; callers treat an
    /// absent client as "skip the LLM layer".
    pub fn from_env() -> Option<Self> {
        HttpBackend::from_env().map(LlmClient::Http)
    }

    /// Mock backend for tests
    pub fn mock() -> Self {
        LlmClient::Mock(MockBackend::new())
    }
}

#[async_trait]
impl LlmBackend for LlmClient {
    async fn categorize(
        &self,
        merchant_raw: &str,
        amount_local: &str,
        options: &[CategoryOption],
    ) -> Result<LlmCategorization> {
        match self {
            LlmClient::Http(b) => b.categorize(merchant_raw, amount_local, options).await,
            LlmClient::Mock(b) => b.categorize(merchant_raw, amount_local, options).await,
        }
    }

    async fn extract_statement_rows(&self, text: &str) -> Result<Vec<LlmStatementRow>> {
        match self {
            LlmClient::Http(b) => b.extract_statement_rows(text).await,
            LlmClient::Mock(b) => b.extract_statement_rows(text).await,
        }
    }

    fn model(&self) -> &str {
        match self {
            LlmClient::Http(b) => b.model(),
            LlmClient::Mock(b) => b.model(),
        }
    }
}
