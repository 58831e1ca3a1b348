//! Mail provider client
//!
//! Pulls bank notification emails from the remote HTTPS mail API using
//! server-side date and sender filters. The fetcher does not parse message
//! bodies; it returns opaque `RawMessage` records for the parser layer.
//!
//! A subject-level filter drops marketing and configuration notices using a
//! two-list rule: reject on exclusion terms, then accept only on inclusion
//! terms. The bank's dedicated notification address bypasses the exclusion
//! heuristics but must still match the inclusion list.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Outbound call timeout
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry attempts for transient failures
const MAX_ATTEMPTS: u32 = 3;

/// The dedicated transaction-notification sender. Messages from this
/// address skip the exclusion list.
const NOTIFICATION_SENDER: &str = "notificacion@notificacionesbaccr.com";

/// Subject terms that mark a message as marketing or a configuration
/// notice, never a money movement.
const EXCLUDE_TERMS: &[&str] = &[
    "promoción",
    "promocion",
    "oferta",
    "descuento",
    "ganate",
    "gánate",
    "premio",
    "sorteo",
    "evento",
    "renueva",
    "buenas noticias",
    "marchamo",
    "inscripción de promoción",
    "inscripcion de promocion",
    "doble oportunidad",
    "festejamos",
    "cambio de pin",
    "cambio de clave",
    "afiliación",
    "afiliacion",
    "desafiliación",
    "desafiliacion",
    "le informa",
];

/// Subject terms that mark a money movement
const INCLUDE_TERMS: &[&str] = &[
    "notificación de transacción",
    "notificacion de transaccion",
    "notificación de transferencia",
    "notificacion de transferencia",
    "compra",
    "pago",
    "cargo",
    "débito",
    "debito",
    "abono",
    "retiro",
    "depósito",
    "deposito",
    "consumo",
    "transferencia",
];

/// An opaque message as returned by the mail provider
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub subject: String,
    #[serde(rename = "from")]
    pub from: MessageFrom,
    #[serde(rename = "receivedDateTime")]
    pub received: DateTime<Utc>,
    pub body: MessageBody,
    #[serde(default)]
    pub attachments: Vec<MailAttachment>,
}

impl RawMessage {
    pub fn sender_address(&self) -> &str {
        &self.from.email_address.address
    }

    pub fn received_date(&self) -> NaiveDate {
        self.received.date_naive()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageFrom {
    #[serde(rename = "emailAddress")]
    pub email_address: MessageAddress,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageAddress {
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageBody {
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub content: String,
}

/// A statement PDF riding on a message
#[derive(Debug, Clone, Deserialize)]
pub struct MailAttachment {
    pub name: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
    /// Base64-encoded attachment bytes
    #[serde(rename = "contentBytes")]
    pub content_bytes: String,
}

#[derive(Debug, Deserialize)]
struct MessagePage {
    value: Vec<RawMessage>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Mail provider configuration, read from the environment by the
/// composition root
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub base_url: String,
    pub bearer_token: String,
}

impl MailConfig {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("CENTAVO_MAIL_URL").ok()?;
        let bearer_token = std::env::var("CENTAVO_MAIL_TOKEN").ok()?;
        Some(Self {
            base_url,
            bearer_token,
        })
    }
}

/// HTTPS mail client with retry and subject filtering
pub struct MailClient {
    http: reqwest::Client,
    config: MailConfig,
}

impl MailClient {
    pub fn new(config: MailConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { http, config })
    }

    /// Fetch transaction-notification messages received on or after `since`
    /// from any of the allowlisted senders.
    ///
    /// The date and sender filters are applied server-side; the subject
    /// filter runs locally because the provider's search is too coarse to
    /// separate marketing from money movements.
    pub async fn fetch(
        &self,
        since: NaiveDate,
        sender_allowlist: &HashSet<String>,
    ) -> Result<Vec<RawMessage>> {
        let filter = format!("receivedDateTime ge {}T00:00:00Z", since);
        let mut url = format!(
            "{}/me/messages?$filter={}&$top=100",
            self.config.base_url, filter
        );

        let mut messages = Vec::new();
        loop {
            let page = self.get_page(&url).await?;
            messages.extend(page.value);
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        let total = messages.len();
        let kept: Vec<RawMessage> = messages
            .into_iter()
            .filter(|m| sender_allowlist.contains(m.sender_address()))
            .filter(|m| is_transaction_subject(&m.subject, m.sender_address()))
            .collect();

        debug!(total, kept = kept.len(), since = %since, "fetched mail");
        Ok(kept)
    }

    /// Fetch statement emails (PDF attachments) from the last `days_back`
    /// days, newest first.
    pub async fn fetch_statements(&self, days_back: i64) -> Result<Vec<RawMessage>> {
        let since = Utc::now().date_naive() - chrono::Duration::days(days_back);
        let filter = format!(
            "receivedDateTime ge {}T00:00:00Z and hasAttachments eq true",
            since
        );
        let mut url = format!(
            "{}/me/messages?$filter={}&$expand=attachments&$top=50",
            self.config.base_url, filter
        );

        let mut messages = Vec::new();
        loop {
            let page = self.get_page(&url).await?;
            messages.extend(page.value);
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        let mut statements: Vec<RawMessage> = messages
            .into_iter()
            .filter(|m| {
                m.attachments
                    .iter()
                    .any(|a| a.content_type == "application/pdf")
            })
            .collect();
        statements.sort_by(|a, b| b.received.cmp(&a.received));

        debug!(count = statements.len(), days_back, "fetched statement mail");
        Ok(statements)
    }

    /// One page with retry. Transient errors (5xx, timeouts) back off
    /// exponentially; auth errors abort immediately.
    async fn get_page(&self, url: &str) -> Result<MessagePage> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_get_page(url).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                    warn!(attempt, error = %e, "mail fetch failed, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_get_page(&self, url: &str) -> Result<MessagePage> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.config.bearer_token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::MailAuth(format!("mail provider returned {}", status)));
        }
        if status.is_server_error() {
            return Err(Error::Transient(format!("mail provider returned {}", status)));
        }
        if !status.is_success() {
            return Err(Error::InvalidData(format!(
                "mail provider returned {}",
                status
            )));
        }

        Ok(response.json::<MessagePage>().await?)
    }
}

/// Two-list subject classification.
///
/// Exclusion wins first, except for the dedicated notification sender,
/// which skips exclusion entirely. Either way the subject must contain an
/// inclusion term to be accepted.
pub fn is_transaction_subject(subject: &str, sender: &str) -> bool {
    let subject_lower = subject.to_lowercase();

    if sender != NOTIFICATION_SENDER
        && EXCLUDE_TERMS.iter().any(|term| subject_lower.contains(term))
    {
        return false;
    }

    INCLUDE_TERMS.iter().any(|term| subject_lower.contains(term))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_filter_accepts_purchases() {
        assert!(is_transaction_subject(
            "Notificación de transacción",
            "alerta@baccredomatic.com"
        ));
        assert!(is_transaction_subject(
            "Compra realizada en AUTOMERCADO",
            "alerta@baccredomatic.com"
        ));
    }

    #[test]
    fn test_subject_filter_rejects_marketing() {
        assert!(!is_transaction_subject(
            "Gran promoción de verano",
            "Mercadeo@bancopopularinforma.fi.cr"
        ));
        assert!(!is_transaction_subject(
            "Cambio de PIN exitoso",
            "alerta@baccredomatic.com"
        ));
    }

    #[test]
    fn test_subject_filter_rejects_unrelated() {
        // No inclusion term: not a money movement even without exclusions
        assert!(!is_transaction_subject(
            "Estimado cliente",
            "alerta@baccredomatic.com"
        ));
    }

    #[test]
    fn test_notification_sender_bypasses_exclusion() {
        // "le informa" is excluded for ordinary senders...
        assert!(!is_transaction_subject(
            "BAC le informa: compra aprobada",
            "alerta@baccredomatic.com"
        ));
        // ...but the notification address bypasses the exclusion list
        assert!(is_transaction_subject(
            "BAC le informa: compra aprobada",
            NOTIFICATION_SENDER
        ));
        // The inclusion list still applies to the notification address
        assert!(!is_transaction_subject(
            "Encuesta de servicio",
            NOTIFICATION_SENDER
        ));
    }
}
