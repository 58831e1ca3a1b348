//! BAC Credomatic notification parsers
//!
//! Two templates: card purchase notifications ("Notificación de
//! transacción") and transfer notifications ("Notificación de
//! transferencia"), which cover SINPE Móvil, own-account moves, and
//! third-party transfers.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

use super::{local_noon, parse_amount, strip_html, ParsedMetadata, ParsedTransaction};
use crate::mail::RawMessage;
use crate::models::{Bank, TxnKind};

fn purchase_fields() -> &'static PurchaseRegexes {
    static REGEXES: OnceLock<PurchaseRegexes> = OnceLock::new();
    REGEXES.get_or_init(|| PurchaseRegexes {
        merchant: Regex::new(r"(?i)Comercio:\s*(.+?)(?:\s+Ciudad|\s+Fecha|\s+VISA|\s+Monto|$)")
            .expect("static regex"),
        city_country: Regex::new(r"(?i)Ciudad y pa[ií]s:\s*([^,]+),\s*([A-Za-zÁ-ú ]+?)(?:\s+Fecha|\s+Monto|$)")
            .expect("static regex"),
        date: Regex::new(r"(?i)Fecha:\s*(\d{1,2})/(\d{1,2})/(\d{4})").expect("static regex"),
        amount: Regex::new(r"(?i)Monto:\s*([A-Z]{3}\s*[\d,]+\.\d{2})").expect("static regex"),
        card: Regex::new(r"(?i)(?:VISA|MASTERCARD|AMEX)\s*\*+(\d{4})").expect("static regex"),
        kind: Regex::new(r"(?i)Tipo de Transacci[oó]n:\s*([A-ZÁÉÍÓÚÑ ]+?)(?:\s+Monto:|\s*$)")
            .expect("static regex"),
    })
}

struct PurchaseRegexes {
    merchant: Regex,
    city_country: Regex,
    date: Regex,
    amount: Regex,
    card: Regex,
    kind: Regex,
}

/// Parse a BAC card purchase notification.
///
/// Returns None when the body does not carry the purchase template
/// (wrong subject, missing merchant or amount).
pub fn parse_purchase(message: &RawMessage) -> Option<ParsedTransaction> {
    let subject = message.subject.to_lowercase();
    if !subject.contains("transacci") && !subject.contains("compra") {
        return None;
    }

    let text = strip_html(&message.body.content);
    let regexes = purchase_fields();

    let merchant_raw = regexes
        .merchant
        .captures(&text)?
        .get(1)?
        .as_str()
        .trim()
        .to_string();
    let (currency, amount) = parse_amount(regexes.amount.captures(&text)?.get(1)?.as_str())?;

    let (city, country) = match regexes.city_country.captures(&text) {
        Some(caps) => (
            Some(caps.get(1)?.as_str().trim().to_string()),
            Some(caps.get(2)?.as_str().trim().to_string()),
        ),
        None => (None, None),
    };

    // The template prints the local date; fall back to the received
    // timestamp when the field is missing or malformed
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

    let card_last_four = regexes
        .card
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    let subtype = regexes
        .kind
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string());

    let is_international = country
        .as_deref()
        .map(|c| !c.eq_ignore_ascii_case("Costa Rica"))
        .unwrap_or(false);

    Some(ParsedTransaction {
        bank: Bank::Bac,
        kind: TxnKind::Purchase,
        merchant_raw,
        amount,
        currency,
        txn_time,
        city,
        country,
        card_last_four,
        is_international,
        metadata: ParsedMetadata {
            subtype,
            ..Default::default()
        },
    })
}

fn transfer_fields() -> &'static TransferRegexes {
    static REGEXES: OnceLock<TransferRegexes> = OnceLock::new();
    REGEXES.get_or_init(|| TransferRegexes {
        amount: Regex::new(r"(?i)Monto(?:\s+transferido)?:\s*([A-Z]{3}\s*[\d,]+\.\d{2})")
            .expect("static regex"),
        beneficiary: Regex::new(
            r"(?i)(?:Beneficiario|A nombre de):\s*(.+?)(?:\s+Concepto|\s+Referencia|\s+Monto|$)",
        )
        .expect("static regex"),
        concepto: Regex::new(r"(?i)Concepto:\s*(.+?)(?:\s+Referencia|\s+Monto|$)")
            .expect("static regex"),
        reference: Regex::new(r"(?i)Referencia:\s*(\d+)").expect("static regex"),
        description: Regex::new(r"(?i)Descripci[oó]n:\s*(.+?)(?:\s+Beneficiario|\s+Concepto|\s+Referencia|$)")
            .expect("static regex"),
    })
}

struct TransferRegexes {
    amount: Regex,
    beneficiary: Regex,
    concepto: Regex,
    reference: Regex,
    description: Regex,
}

/// Own-account movement markers in transfer descriptions
const OWN_TRANSFER_MARKERS: &[&str] = &[
    "CUENTAS PROPIAS",
    "CTA PROPIA",
    "ENTRE CUENTAS",
    "AHORRO PROGRAMADO",
];

/// Parse a BAC transfer notification (SINPE Móvil or account transfer).
pub fn parse_transfer(message: &RawMessage) -> Option<ParsedTransaction> {
    let subject = message.subject.to_lowercase();
    if !subject.contains("transferencia") && !subject.contains("sinpe") {
        return None;
    }

    let text = strip_html(&message.body.content);
    let regexes = transfer_fields();

    let (currency, amount) = parse_amount(regexes.amount.captures(&text)?.get(1)?.as_str())?;

    let beneficiary = regexes
        .beneficiary
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string());
    let concepto = regexes
        .concepto
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string());
    let bank_reference = regexes
        .reference
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());
    let description = regexes
        .description
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string());

    let is_sinpe =
        subject.contains("sinpe") || description.as_deref().is_some_and(|d| d.to_uppercase().contains("SINPE"));

    let merchant_raw = if is_sinpe {
        match &beneficiary {
            Some(name) => format!("SINPE {}", name),
            // Reference-only SINPE: the user must clarify later
            None => format!(
                "SINPE {}",
                bank_reference.clone().unwrap_or_else(|| "DESCONOCIDO".to_string())
            ),
        }
    } else {
        description
            .clone()
            .or_else(|| beneficiary.clone())
            .unwrap_or_else(|| "TRANSFERENCIA".to_string())
    };

    let upper_desc = description.as_deref().unwrap_or("").to_uppercase();
    let is_own_transfer = OWN_TRANSFER_MARKERS
        .iter()
        .any(|marker| upper_desc.contains(marker));

    // A SINPE whose only identity is a numeric reference cannot be
    // categorized until the user clarifies who it went to
    let needs_reconciliation = is_sinpe
        && beneficiary
            .as_deref()
            .map(|b| b.chars().all(|c| c.is_ascii_digit() || c.is_whitespace()))
            .unwrap_or(true);

    Some(ParsedTransaction {
        bank: Bank::Bac,
        kind: if is_sinpe {
            TxnKind::Sinpe
        } else {
            TxnKind::Transfer
        },
        merchant_raw,
        amount,
        currency,
        txn_time: message.received,
        city: None,
        country: None,
        card_last_four: None,
        is_international: false,
        metadata: ParsedMetadata {
            beneficiary,
            concepto,
            subtype: description,
            bank_reference,
            is_own_transfer,
            needs_reconciliation,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::{MessageAddress, MessageBody, MessageFrom};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn message(subject: &str, body: &str) -> RawMessage {
        RawMessage {
            id: "msg-1".to_string(),
            subject: subject.to_string(),
            from: MessageFrom {
                email_address: MessageAddress {
                    address: "notificacion@notificacionesbaccr.com".to_string(),
                },
            },
            received: Utc.with_ymd_and_hms(2024, 11, 7, 16, 30, 0).unwrap(),
            body: MessageBody {
                content_type: "html".to_string(),
                content: body.to_string(),
            },
            attachments: Vec::new(),
        }
    }

    const PURCHASE_BODY: &str = r#"
        <html><body>
        <p>Estimado cliente:</p>
        <table>
        <tr><td>Comercio:</td><td>AUTOMERCADO ESCAZU</td></tr>
        <tr><td>Ciudad y país:</td><td>Escazú, Costa Rica</td></tr>
        <tr><td>Fecha:</td><td>7/11/2024</td></tr>
        <tr><td>VISA</td><td>****9887</td></tr>
        <tr><td>Tipo de Transacción:</td><td>COMPRA</td></tr>
        <tr><td>Monto:</td><td>CRC 15,000.00</td></tr>
        </table>
        </body></html>
    "#;

    #[test]
    fn test_parse_purchase() {
        let msg = message("Notificación de transacción", PURCHASE_BODY);
        let parsed = parse_purchase(&msg).unwrap();
        assert_eq!(parsed.merchant_raw, "AUTOMERCADO ESCAZU");
        assert_eq!(parsed.amount, dec!(15000.00));
        assert_eq!(parsed.kind, TxnKind::Purchase);
        assert_eq!(parsed.card_last_four.as_deref(), Some("9887"));
        assert_eq!(parsed.city.as_deref(), Some("Escazú"));
        // Date-only template pins to local noon, same calendar day
        assert_eq!(
            parsed.txn_time.date_naive(),
            chrono::NaiveDate::from_ymd_opt(2024, 11, 7).unwrap()
        );
    }

    #[test]
    fn test_parse_purchase_usd() {
        let body = PURCHASE_BODY.replace("CRC 15,000.00", "USD 25.99");
        let msg = message("Notificación de transacción", &body);
        let parsed = parse_purchase(&msg).unwrap();
        assert_eq!(parsed.currency, crate::models::Currency::Usd);
        assert_eq!(parsed.amount, dec!(25.99));
    }

    #[test]
    fn test_parse_purchase_rejects_other_templates() {
        let msg = message("Notificación de transacción", "<p>sin campos</p>");
        assert!(parse_purchase(&msg).is_none());
    }

    const SINPE_BODY: &str = r#"
        <html><body>
        <p>Descripción: SINPE MOVIL</p>
        <p>Beneficiario: MARIA ROSA CRUZ</p>
        <p>Concepto: Apoyo mensual</p>
        <p>Referencia: 2024110712345</p>
        <p>Monto transferido: CRC 50,000.00</p>
        </body></html>
    "#;

    #[test]
    fn test_parse_sinpe_transfer() {
        let msg = message("Notificación de transferencia SINPE", SINPE_BODY);
        let parsed = parse_transfer(&msg).unwrap();
        assert_eq!(parsed.kind, TxnKind::Sinpe);
        assert_eq!(parsed.merchant_raw, "SINPE MARIA ROSA CRUZ");
        assert_eq!(parsed.amount, dec!(50000.00));
        assert_eq!(parsed.metadata.beneficiary.as_deref(), Some("MARIA ROSA CRUZ"));
        assert_eq!(parsed.metadata.concepto.as_deref(), Some("Apoyo mensual"));
        assert_eq!(parsed.metadata.bank_reference.as_deref(), Some("2024110712345"));
        assert!(!parsed.metadata.needs_reconciliation);
        assert!(!parsed.metadata.is_own_transfer);
    }

    #[test]
    fn test_sinpe_numeric_beneficiary_needs_reconciliation() {
        let body = SINPE_BODY.replace("MARIA ROSA CRUZ", "8888 7777");
        let msg = message("Notificación de transferencia SINPE", &body);
        let parsed = parse_transfer(&msg).unwrap();
        assert!(parsed.metadata.needs_reconciliation);
    }

    #[test]
    fn test_own_transfer_flagged() {
        let body = r#"
            <p>Descripción: TRANSFERENCIA ENTRE CUENTAS PROPIAS</p>
            <p>Monto: CRC 200,000.00</p>
        "#;
        let msg = message("Notificación de transferencia", body);
        let parsed = parse_transfer(&msg).unwrap();
        assert!(parsed.metadata.is_own_transfer);
        assert_eq!(parsed.kind, TxnKind::Transfer);
    }
}
