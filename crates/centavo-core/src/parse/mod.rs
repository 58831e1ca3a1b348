//! Email and statement parsers
//!
//! One parser per bank × message variant. Parsers are pure functions:
//! `RawMessage` in, `Option<ParsedTransaction>` out, no side effects.
//! They tolerate whitespace and encoding variation and fill whatever
//! fields the message carries; downstream code lifts the metadata bag
//! into dedicated transaction columns.

pub mod bac;
pub mod popular;
pub mod statement;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::mail::RawMessage;
use crate::models::{Bank, Currency, TxnKind};

/// Local offset (Costa Rica, UTC-6, no DST)
const LOCAL_OFFSET_HOURS: i64 = 6;

/// Everything a parser could extract beyond the core columns
#[derive(Debug, Clone, Default)]
pub struct ParsedMetadata {
    pub beneficiary: Option<String>,
    /// Transfer memo (concepto) as typed by the sender
    pub concepto: Option<String>,
    pub subtype: Option<String>,
    pub bank_reference: Option<String>,
    /// Movement between the user's own accounts
    pub is_own_transfer: bool,
    /// SINPE descriptor too ambiguous to categorize (numeric reference)
    pub needs_reconciliation: bool,
}

/// Parser output; fields mirror the transaction columns a parser can fill
#[derive(Debug, Clone)]
pub struct ParsedTransaction {
    pub bank: Bank,
    pub kind: TxnKind,
    pub merchant_raw: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub txn_time: DateTime<Utc>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub card_last_four: Option<String>,
    pub is_international: bool,
    pub metadata: ParsedMetadata,
}

/// Try every known parser against a message. Returns None when no parser
/// recognizes it (the message is counted, not failed).
pub fn parse_message(message: &RawMessage) -> Option<ParsedTransaction> {
    let sender = message.sender_address();

    if sender.contains("bac") || sender.contains("notificacionesbaccr") {
        return bac::parse_purchase(message).or_else(|| bac::parse_transfer(message));
    }
    if sender.contains("popular") {
        return popular::parse_notification(message);
    }
    None
}

/// Pin a date-only source to local noon so the UTC instant never drifts
/// into the neighboring day.
pub fn local_noon(date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_hms_opt(12, 0, 0).expect("noon is always valid");
    Utc.from_utc_datetime(&(naive + chrono::Duration::hours(LOCAL_OFFSET_HOURS)))
}

/// Reduce an HTML body to plain text for regex field extraction.
/// Good enough for bank notification templates; not a general HTML parser.
pub(crate) fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                // Tag boundaries act as whitespace so fields don't glue together
                out.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&aacute;", "á")
        .replace("&eacute;", "é")
        .replace("&iacute;", "í")
        .replace("&oacute;", "ó")
        .replace("&uacute;", "ú")
        .replace("&ntilde;", "ñ");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a currency-tagged amount ("CRC 15,000.00", "USD 25.99").
pub(crate) fn parse_amount(raw: &str) -> Option<(Currency, Decimal)> {
    let raw = raw.trim();
    let (currency_str, amount_str) = raw.split_once(' ')?;
    let currency: Currency = currency_str.parse().ok()?;
    let cleaned = amount_str.replace(',', "");
    let amount = cleaned.parse::<Decimal>().ok()?;
    Some((currency, amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_strip_html() {
        let html = "<html><body><b>Comercio:</b> AUTOMERCADO<br/>Monto: CRC 5,500.00</body></html>";
        let text = strip_html(html);
        assert!(text.contains("Comercio: AUTOMERCADO"));
        assert!(text.contains("Monto: CRC 5,500.00"));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(
            parse_amount("CRC 15,000.00"),
            Some((Currency::Crc, dec!(15000.00)))
        );
        assert_eq!(parse_amount("USD 25.99"), Some((Currency::Usd, dec!(25.99))));
        assert_eq!(parse_amount("garbage"), None);
    }

    #[test]
    fn test_local_noon_stays_on_the_day() {
        let date = NaiveDate::from_ymd_opt(2024, 11, 7).unwrap();
        let instant = local_noon(date);
        // 12:00 UTC-6 = 18:00 UTC, same calendar day
        assert_eq!(instant.date_naive(), date);
        assert_eq!(instant.format("%H:%M").to_string(), "18:00");
    }
}
