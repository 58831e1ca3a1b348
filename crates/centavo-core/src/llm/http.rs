//! Vendor HTTP backend

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{CategoryOption, LlmBackend, LlmCategorization, LlmStatementRow};
use crate::error::{Error, Result};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MODEL: &str = "claude-haiku";
const MAX_TOKENS: u32 = 1024;

/// HTTPS JSON backend against the vendor messages API
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("CENTAVO_LLM_URL").ok()?;
        let api_key = std::env::var("CENTAVO_LLM_API_KEY").ok()?;
        let model =
            std::env::var("CENTAVO_LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Some(Self::new(&base_url, &api_key, &model))
    }

    /// One prompt round-trip returning the model's text content.
    ///
    /// Quota responses map to `Error::Quota` so the cascade can fall
    /// through instead of failing the batch.
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "temperature": 0,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::Quota("LLM provider rate-limited".to_string()));
        }
        if status.is_server_error() {
            return Err(Error::Transient(format!("LLM provider returned {}", status)));
        }
        if !status.is_success() {
            return Err(Error::InvalidData(format!(
                "LLM provider returned {}",
                status
            )));
        }

        let payload: Value = response.json().await?;
        let text = payload["content"][0]["text"]
            .as_str()
            .ok_or_else(|| Error::Parse("LLM response missing text content".to_string()))?;
        Ok(text.to_string())
    }
}

/// Strip a markdown code fence if the model wrapped its JSON in one
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[async_trait]
impl LlmBackend for HttpBackend {
    async fn categorize(
        &self,
        merchant_raw: &str,
        amount_local: &str,
        options: &[CategoryOption],
    ) -> Result<LlmCategorization> {
        let catalog = serde_json::to_string_pretty(options)?;
        let prompt = format!(
            "Eres un asistente experto en categorización de gastos personales en Costa Rica.\n\n\
             TRANSACCIÓN:\n- Comercio: {merchant_raw}\n- Monto: ₡{amount_local}\n\n\
             CATEGORÍAS DISPONIBLES:\n{catalog}\n\n\
             Responde ÚNICAMENTE con un JSON válido:\n\
             {{\"subcategory_id\": <id o null>, \"suggested_name\": \"Categoría/Subcategoría\", \
             \"confidence\": <0-100>, \"alternatives\": [\"...\"], \"reason\": \"...\"}}"
        );

        let text = self.complete(&prompt).await?;
        let result: LlmCategorization = serde_json::from_str(strip_code_fence(&text))
            .map_err(|e| Error::Parse(format!("LLM categorization JSON invalid: {}", e)))?;
        debug!(merchant_raw, confidence = result.confidence, "LLM categorized");
        Ok(result)
    }

    async fn extract_statement_rows(&self, text: &str) -> Result<Vec<LlmStatementRow>> {
        let prompt = format!(
            "Extrae las transacciones del siguiente estado de cuenta bancario.\n\n\
             {text}\n\n\
             Responde ÚNICAMENTE con un arreglo JSON donde cada elemento tiene \
             exactamente estas llaves: reference, date (DD-MON-YY), description, \
             currency (CRC o USD), amount. Sin texto adicional."
        );

        let response = self.complete(&prompt).await?;
        let rows: Vec<LlmStatementRow> = serde_json::from_str(strip_code_fence(&response))
            .map_err(|e| Error::Parse(format!("LLM statement JSON invalid: {}", e)))?;
        Ok(rows)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n[]\n```"), "[]");
    }
}
