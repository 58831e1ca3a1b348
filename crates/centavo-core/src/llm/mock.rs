//! Mock LLM backend for testing

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::{CategoryOption, LlmBackend, LlmCategorization, LlmStatementRow};
use crate::error::{Error, Result};

/// Deterministic mock backend.
///
/// By default it answers every categorization with the first offered
/// option at fixed confidence. Tests can queue canned responses or force
/// failures to exercise the fall-through paths.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    canned_categorizations: Vec<LlmCategorization>,
    canned_rows: Vec<Vec<LlmStatementRow>>,
    fail_with_quota: bool,
    calls: u32,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a canned categorization (consumed in order)
    pub fn push_categorization(&self, response: LlmCategorization) {
        self.state
            .lock()
            .expect("mock state lock")
            .canned_categorizations
            .push(response);
    }

    /// Queue a canned statement-row extraction
    pub fn push_rows(&self, rows: Vec<LlmStatementRow>) {
        self.state.lock().expect("mock state lock").canned_rows.push(rows);
    }

    /// Make every call fail with a quota error
    pub fn fail_with_quota(&self) {
        self.state.lock().expect("mock state lock").fail_with_quota = true;
    }

    pub fn call_count(&self) -> u32 {
        self.state.lock().expect("mock state lock").calls
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn categorize(
        &self,
        _merchant_raw: &str,
        _amount_local: &str,
        options: &[CategoryOption],
    ) -> Result<LlmCategorization> {
        let mut state = self.state.lock().expect("mock state lock");
        state.calls += 1;
        if state.fail_with_quota {
            return Err(Error::Quota("mock quota exhausted".to_string()));
        }
        if !state.canned_categorizations.is_empty() {
            return Ok(state.canned_categorizations.remove(0));
        }
        let first = options.first();
        Ok(LlmCategorization {
            subcategory_id: first.map(|o| o.id),
            suggested_name: first.map(|o| o.name.clone()).unwrap_or_default(),
            confidence: 85,
            alternatives: Vec::new(),
            reason: "mock".to_string(),
        })
    }

    async fn extract_statement_rows(&self, _text: &str) -> Result<Vec<LlmStatementRow>> {
        let mut state = self.state.lock().expect("mock state lock");
        state.calls += 1;
        if state.fail_with_quota {
            return Err(Error::Quota("mock quota exhausted".to_string()));
        }
        if !state.canned_rows.is_empty() {
            return Ok(state.canned_rows.remove(0));
        }
        Ok(Vec::new())
    }

    fn model(&self) -> &str {
        "mock"
    }
}
