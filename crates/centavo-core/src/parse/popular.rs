//! Banco Popular notification parser
//!
//! Popular uses one plain template for debits and deposits; the movement
//! type is a labeled field rather than a separate email variant.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

use super::{local_noon, parse_amount, strip_html, ParsedMetadata, ParsedTransaction};
use crate::mail::RawMessage;
use crate::models::{Bank, TxnKind};

fn fields() -> &'static NotificationRegexes {
    static REGEXES: OnceLock<NotificationRegexes> = OnceLock::new();
    REGEXES.get_or_init(|| NotificationRegexes {
        movement: Regex::new(r"(?i)Tipo de movimiento:\s*(.+?)(?:\s+Comercio|\s+Detalle|\s+Fecha|\s+Monto|$)")
            .expect("static regex"),
        detail: Regex::new(r"(?i)(?:Comercio|Detalle):\s*(.+?)(?:\s+Fecha|\s+Monto|\s+Cuenta|$)")
            .expect("static regex"),
        date: Regex::new(r"(?i)Fecha:\s*(\d{2})-(\d{2})-(\d{4})").expect("static regex"),
        amount: Regex::new(r"(?i)Monto:\s*([A-Z]{3}\s*[\d,]+\.\d{2})").expect("static regex"),
        account: Regex::new(r"(?i)Cuenta:\s*(CR\d{2}[\d ]{10,})").expect("static regex"),
    })
}

struct NotificationRegexes {
    movement: Regex,
    detail: Regex,
    date: Regex,
    amount: Regex,
    account: Regex,
}

fn movement_kind(movement: &str) -> TxnKind {
    let upper = movement.to_uppercase();
    if upper.contains("RETIRO") {
        TxnKind::Withdrawal
    } else if upper.contains("DEPOSITO") || upper.contains("DEPÓSITO") {
        TxnKind::Deposit
    } else if upper.contains("INTERES") || upper.contains("INTERÉS") {
        TxnKind::InterestEarned
    } else if upper.contains("SERVICIO") {
        TxnKind::ServicePayment
    } else if upper.contains("TRANSFERENCIA") {
        TxnKind::Transfer
    } else {
        TxnKind::Purchase
    }
}

/// Parse a Banco Popular account notification
pub fn parse_notification(message: &RawMessage) -> Option<ParsedTransaction> {
    let text = strip_html(&message.body.content);
    let regexes = fields();

    let (currency, amount) = parse_amount(regexes.amount.captures(&text)?.get(1)?.as_str())?;
    let merchant_raw = regexes
        .detail
        .captures(&text)?
        .get(1)?
        .as_str()
        .trim()
        .to_string();

    let movement = regexes
        .movement
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string());
    let kind = movement.as_deref().map(movement_kind).unwrap_or(TxnKind::Purchase);

    let txn_time = regexes
        .date
        .captures(&text)
        .and_then(|caps| {
            let day: u32 = caps.get(1)?.as_str().parse().ok()?;
            let month: u32 = caps.get(2)?.as_str().parse().ok()?;
            let year: i32 = caps.get(3)?.as_str().parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        })
        .map(local_noon)
        .unwrap_or(message.received);

    let iban = regexes
        .account
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace(' ', ""));

    Some(ParsedTransaction {
        bank: Bank::Popular,
        kind,
        merchant_raw,
        amount,
        currency,
        txn_time,
        city: None,
        country: None,
        card_last_four: None,
        is_international: false,
        metadata: ParsedMetadata {
            subtype: movement,
            bank_reference: iban,
            ..Default::default()
        },
    })
}
