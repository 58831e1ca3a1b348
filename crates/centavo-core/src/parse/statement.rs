//! Bank statement parsing
//!
//! Two variants: credit-card statements and deposit-account statements.
//! Both operate on the extracted text of the PDF; extraction itself sits
//! behind the `TextExtractor` seam so the heuristic text-layer reader and
//! any provider-backed extractor are interchangeable.
//!
//! Credit-card statements read a header region first (cut date, due date,
//! credit limit, minimum payment), then walk the body with a section state
//! machine: each "Detalle de ..." header switches the section tag applied
//! to subsequent rows. Unknown lines are skipped, never fatal.
//!
//! Deposit-account statements whose text layer defeats the grid heuristic
//! are handed to the LLM extractor, whose JSON response must conform to
//! the row schema exactly and is rejected otherwise.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::llm::{LlmBackend, LlmClient};
use crate::models::{Bank, Currency, StatementKind, StatementSection};

/// Extracts the text layer from statement bytes.
///
/// The default implementation treats the payload as already-decoded text
/// (the mail pipeline runs the PDF through its text filter upstream);
/// alternative extractors can wrap OCR-style providers.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8]) -> Result<String>;
}

/// Text-layer extractor: lossy UTF-8 over the payload
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, bytes: &[u8]) -> Result<String> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// One extracted row, before persistence
#[derive(Debug, Clone)]
pub struct ParsedStatementRow {
    pub reference: String,
    pub ordinal: i64,
    pub date: NaiveDate,
    pub description: String,
    pub currency: Currency,
    pub amount: Decimal,
    pub section: StatementSection,
    pub location: Option<String>,
}

/// A fully parsed statement
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    pub bank: Bank,
    pub kind: StatementKind,
    pub period_start: NaiveDate,
    /// The statement cut
    pub period_end: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub credit_limit: Option<Decimal>,
    pub minimum_payment: Option<Decimal>,
    pub rows: Vec<ParsedStatementRow>,
}

impl ParsedStatement {
    /// Stable identity for dedup across re-ingestion
    pub fn statement_key(&self, profile_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(profile_id.as_bytes());
        hasher.update(self.bank.as_str().as_bytes());
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(self.period_end.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Spanish month abbreviations as printed on statements
const SPANISH_MONTHS: &[(&str, u32)] = &[
    ("ENE", 1),
    ("FEB", 2),
    ("MAR", 3),
    ("ABR", 4),
    ("MAY", 5),
    ("JUN", 6),
    ("JUL", 7),
    ("AGO", 8),
    ("SET", 9),
    ("SEP", 9),
    ("OCT", 10),
    ("NOV", 11),
    ("DIC", 12),
];

/// Parse "15-NOV-24" against a known four-digit reference year.
///
/// Statement dates carry only two-digit years; the reference year (from
/// the filename or the cut) resolves the century. A December row on a
/// January-cut statement belongs to the prior year.
pub fn parse_spanish_date(raw: &str, reference_year: i32) -> Option<NaiveDate> {
    let parts: Vec<&str> = raw.trim().split('-').collect();
    if parts.len() != 3 {
        return None;
    }
    let day: u32 = parts[0].parse().ok()?;
    let month = SPANISH_MONTHS
        .iter()
        .find(|(name, _)| parts[1].eq_ignore_ascii_case(name))
        .map(|(_, m)| *m)?;
    let two_digit: i32 = parts[2].parse().ok()?;

    let century = reference_year - reference_year % 100;
    let mut year = century + two_digit;
    // A two-digit year far ahead of the reference belongs to the previous
    // century window (e.g. reference 2100, row "99")
    if year > reference_year + 1 {
        year -= 100;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Four-digit year embedded in the statement filename, if any
pub fn year_from_filename(filename: &str) -> Option<i32> {
    static YEAR: OnceLock<Regex> = OnceLock::new();
    let regex = YEAR.get_or_init(|| Regex::new(r"(20\d{2})").expect("static regex"));
    regex
        .captures(filename)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn parse_money(raw: &str) -> Option<Decimal> {
    let cleaned = raw.trim().replace(',', "");
    if let Some(negative) = cleaned.strip_suffix('-') {
        return negative.parse::<Decimal>().ok().map(|d| -d);
    }
    cleaned.parse::<Decimal>().ok()
}

struct HeaderRegexes {
    cut_date: Regex,
    due_date: Regex,
    credit_limit: Regex,
    minimum_payment: Regex,
    period: Regex,
}

fn header_regexes() -> &'static HeaderRegexes {
    static REGEXES: OnceLock<HeaderRegexes> = OnceLock::new();
    REGEXES.get_or_init(|| HeaderRegexes {
        cut_date: Regex::new(r"(?i)FECHA DE CORTE:?\s*(\d{1,2}-[A-ZÁÉa-záé]{3}-\d{2})")
            .expect("static regex"),
        due_date: Regex::new(
            r"(?i)FECHA (?:L[IÍ]MITE DE )?PAGO:?\s*(\d{1,2}-[A-ZÁÉa-záé]{3}-\d{2})",
        )
        .expect("static regex"),
        credit_limit: Regex::new(r"(?i)L[IÍ]MITE DE CR[EÉ]DITO:?\s*([\d,]+\.\d{2})")
            .expect("static regex"),
        minimum_payment: Regex::new(r"(?i)PAGO M[IÍ]NIMO:?\s*([\d,]+\.\d{2})")
            .expect("static regex"),
        period: Regex::new(
            r"(?i)DEL\s+(\d{1,2}-[A-ZÁÉa-záé]{3}-\d{2})\s+AL\s+(\d{1,2}-[A-ZÁÉa-záé]{3}-\d{2})",
        )
        .expect("static regex"),
    })
}

/// Section headers recognized in credit-card statements
fn section_for_line(line: &str) -> Option<StatementSection> {
    let upper = line.to_uppercase();
    if upper.contains("DETALLE DE COMPRAS") {
        Some(StatementSection::Purchases)
    } else if upper.contains("DETALLE DE INTERESES") {
        Some(StatementSection::Interest)
    } else if upper.contains("DETALLE DE CARGOS") {
        Some(StatementSection::Charges)
    } else if upper.contains("PRODUCTOS Y SERVICIOS") {
        Some(StatementSection::ProductsAndServices)
    } else if upper.contains("DETALLE DE PAGO") {
        Some(StatementSection::Payments)
    } else {
        None
    }
}

fn row_regex() -> &'static Regex {
    static ROW: OnceLock<Regex> = OnceLock::new();
    ROW.get_or_init(|| {
        // reference  date  description  [location/currency tag]  amount[-]
        Regex::new(
            r"(?x)^\s*
              (?P<ref>\d{5,})\s+
              (?P<date>\d{1,2}-[A-ZÁÉa-záé]{3}-\d{2})\s+
              (?P<desc>.+?)\s+
              (?:(?P<tag>[A-Z]{2,3})\s+)?
              (?P<amount>[\d,]+\.\d{2}-?)
              \s*$",
        )
        .expect("static regex")
    })
}

/// Statement parser over extracted text
pub struct StatementParser {
    llm: Option<LlmClient>,
}

impl StatementParser {
    pub fn new(llm: Option<LlmClient>) -> Self {
        Self { llm }
    }

    /// Parse a credit-card statement.
    ///
    /// The header region must at least yield a cut date; rows that do not
    /// match the grid are skipped.
    pub fn parse_credit_card(&self, text: &str, filename: &str) -> Result<ParsedStatement> {
        let headers = header_regexes();
        let reference_year = year_from_filename(filename)
            .unwrap_or_else(|| chrono::Utc::now().year());

        let cut_date = headers
            .cut_date
            .captures(text)
            .and_then(|caps| parse_spanish_date(caps.get(1)?.as_str(), reference_year))
            .ok_or_else(|| {
                Error::Parse(format!("statement {} has no readable cut date", filename))
            })?;
        let due_date = headers
            .due_date
            .captures(text)
            .and_then(|caps| parse_spanish_date(caps.get(1)?.as_str(), cut_date.year()));
        let credit_limit = headers
            .credit_limit
            .captures(text)
            .and_then(|caps| parse_money(caps.get(1)?.as_str()));
        let minimum_payment = headers
            .minimum_payment
            .captures(text)
            .and_then(|caps| parse_money(caps.get(1)?.as_str()));

        let rows = extract_rows(text, cut_date.year());

        let period_start = rows
            .iter()
            .map(|r| r.date)
            .min()
            .unwrap_or(cut_date - chrono::Duration::days(30));

        debug!(
            filename,
            rows = rows.len(),
            cut = %cut_date,
            "parsed credit-card statement"
        );

        Ok(ParsedStatement {
            bank: Bank::Bac,
            kind: StatementKind::CreditCard,
            period_start,
            period_end: cut_date,
            due_date,
            credit_limit,
            minimum_payment,
            rows,
        })
    }

    /// Parse a deposit-account statement.
    ///
    /// Tries the grid heuristic first; when the text layer yields nothing
    /// and an LLM is available, delegates extraction to it. The model's
    /// response must be valid JSON conforming to the row schema; anything
    /// else is a parse error and the statement is skipped upstream.
    pub async fn parse_deposit(&self, text: &str, filename: &str) -> Result<ParsedStatement> {
        let headers = header_regexes();
        let reference_year = year_from_filename(filename)
            .unwrap_or_else(|| chrono::Utc::now().year());

        let (period_start, period_end) = headers
            .period
            .captures(text)
            .and_then(|caps| {
                Some((
                    parse_spanish_date(caps.get(1)?.as_str(), reference_year)?,
                    parse_spanish_date(caps.get(2)?.as_str(), reference_year)?,
                ))
            })
            .ok_or_else(|| {
                Error::Parse(format!("statement {} has no readable period", filename))
            })?;

        let mut rows = extract_rows(text, period_end.year());

        if rows.is_empty() {
            if let Some(llm) = &self.llm {
                warn!(filename, "grid heuristic found no rows, delegating to LLM");
                rows = self.rows_from_llm(llm, text, period_end.year()).await?;
            }
        }

        Ok(ParsedStatement {
            bank: Bank::Bac,
            kind: StatementKind::DepositAccount,
            period_start,
            period_end,
            due_date: None,
            credit_limit: None,
            minimum_payment: None,
            rows,
        })
    }

    async fn rows_from_llm(
        &self,
        llm: &LlmClient,
        text: &str,
        reference_year: i32,
    ) -> Result<Vec<ParsedStatementRow>> {
        let raw_rows = llm.extract_statement_rows(text).await?;

        let mut rows = Vec::with_capacity(raw_rows.len());
        for (ordinal, raw) in raw_rows.iter().enumerate() {
            let date = parse_spanish_date(&raw.date, reference_year).ok_or_else(|| {
                Error::Parse(format!("LLM row has unparseable date '{}'", raw.date))
            })?;
            let currency = Currency::from_str(&raw.currency)
                .map_err(|e| Error::Parse(format!("LLM row has bad currency: {}", e)))?;
            let amount = parse_money(&raw.amount).ok_or_else(|| {
                Error::Parse(format!("LLM row has unparseable amount '{}'", raw.amount))
            })?;
            if raw.description.trim().is_empty() {
                return Err(Error::Parse("LLM row has empty description".to_string()));
            }

            rows.push(ParsedStatementRow {
                reference: raw.reference.clone(),
                ordinal: ordinal as i64,
                date,
                description: raw.description.trim().to_string(),
                currency,
                amount,
                section: StatementSection::Purchases,
                location: None,
            });
        }
        Ok(rows)
    }
}

/// Walk lines with the section state machine and collect grid rows
fn extract_rows(text: &str, reference_year: i32) -> Vec<ParsedStatementRow> {
    let regex = row_regex();
    let mut section = StatementSection::default();
    let mut rows = Vec::new();
    let mut ordinal = 0i64;

    for line in text.lines() {
        if let Some(new_section) = section_for_line(line) {
            section = new_section;
            continue;
        }

        let Some(caps) = regex.captures(line) else {
            continue; // Unknown line: skipped, not failed
        };
        let Some(date) = parse_spanish_date(&caps["date"], reference_year) else {
            continue;
        };
        let Some(amount) = parse_money(&caps["amount"]) else {
            continue;
        };

        let tag = caps.name("tag").map(|m| m.as_str().to_string());
        let (currency, location) = match tag.as_deref() {
            Some("USD") => (Currency::Usd, None),
            Some("CRC") => (Currency::Crc, None),
            other => (Currency::Crc, other.map(|s| s.to_string())),
        };

        rows.push(ParsedStatementRow {
            reference: caps["ref"].to_string(),
            ordinal,
            date,
            description: caps["desc"].trim().to_string(),
            currency,
            amount,
            section,
            location,
        });
        ordinal += 1;
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const CC_STATEMENT: &str = "\
ESTADO DE CUENTA TARJETA DE CREDITO
FECHA DE CORTE: 15-NOV-24
FECHA LIMITE DE PAGO: 05-DIC-24
LIMITE DE CREDITO: 2,500,000.00
PAGO MINIMO: 45,000.00

DETALLE DE COMPRAS
123456 02-NOV-24 AUTOMERCADO ESCAZU SJ 15,000.00
123457 05-NOV-24 NETFLIX.COM USD 15.99
123458 10-NOV-24 UBER TRIP SJ 4,500.00
linea que no es transaccion

DETALLE DE INTERESES
123459 15-NOV-24 INTERES ROTATIVO 2,310.45

DETALLE DE PAGO
123460 01-NOV-24 PAGO RECIBIDO 250,000.00-
";

    #[test]
    fn test_parse_credit_card_header() {
        let parser = StatementParser::new(None);
        let parsed = parser
            .parse_credit_card(CC_STATEMENT, "estado_2024_11.pdf")
            .unwrap();
        assert_eq!(
            parsed.period_end,
            NaiveDate::from_ymd_opt(2024, 11, 15).unwrap()
        );
        assert_eq!(
            parsed.due_date,
            Some(NaiveDate::from_ymd_opt(2024, 12, 5).unwrap())
        );
        assert_eq!(parsed.credit_limit, Some(dec!(2500000.00)));
        assert_eq!(parsed.minimum_payment, Some(dec!(45000.00)));
    }

    #[test]
    fn test_parse_credit_card_sections() {
        let parser = StatementParser::new(None);
        let parsed = parser
            .parse_credit_card(CC_STATEMENT, "estado_2024_11.pdf")
            .unwrap();
        assert_eq!(parsed.rows.len(), 5);

        assert_eq!(parsed.rows[0].section, StatementSection::Purchases);
        assert_eq!(parsed.rows[0].description, "AUTOMERCADO ESCAZU");
        assert_eq!(parsed.rows[0].location.as_deref(), Some("SJ"));
        assert_eq!(parsed.rows[0].amount, dec!(15000.00));

        // USD tag becomes the row currency, not a location
        assert_eq!(parsed.rows[1].currency, Currency::Usd);
        assert_eq!(parsed.rows[1].amount, dec!(15.99));

        assert_eq!(parsed.rows[3].section, StatementSection::Interest);
        assert_eq!(parsed.rows[4].section, StatementSection::Payments);
        // Trailing minus is a credit
        assert_eq!(parsed.rows[4].amount, dec!(-250000.00));
    }

    #[test]
    fn test_unknown_lines_are_skipped() {
        let parser = StatementParser::new(None);
        let parsed = parser
            .parse_credit_card(CC_STATEMENT, "estado_2024_11.pdf")
            .unwrap();
        assert!(!parsed
            .rows
            .iter()
            .any(|r| r.description.contains("linea que no es")));
    }

    #[test]
    fn test_missing_cut_date_is_parse_error() {
        let parser = StatementParser::new(None);
        let result = parser.parse_credit_card("texto sin encabezado", "x.pdf");
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_spanish_date_year_inference() {
        // Year resolved against the filename year
        assert_eq!(
            parse_spanish_date("15-NOV-24", 2024),
            NaiveDate::from_ymd_opt(2024, 11, 15)
        );
        // SET and SEP are both September
        assert_eq!(
            parse_spanish_date("01-SET-24", 2024),
            NaiveDate::from_ymd_opt(2024, 9, 1)
        );
        assert_eq!(
            parse_spanish_date("01-SEP-24", 2024),
            NaiveDate::from_ymd_opt(2024, 9, 1)
        );
        assert_eq!(parse_spanish_date("99-XXX-24", 2024), None);
    }

    #[test]
    fn test_year_from_filename() {
        assert_eq!(year_from_filename("estado_cuenta_2024_11.pdf"), Some(2024));
        assert_eq!(year_from_filename("estado.pdf"), None);
    }

    const DEPOSIT_STATEMENT: &str = "\
ESTADO DE CUENTA AHORROS
DEL 01-NOV-24 AL 30-NOV-24
12345 05-NOV-24 DEPOSITO SALARIO 850,000.00
12346 12-NOV-24 RETIRO ATM 50,000.00-
";

    #[tokio::test]
    async fn test_parse_deposit_heuristic() {
        let parser = StatementParser::new(None);
        let parsed = parser
            .parse_deposit(DEPOSIT_STATEMENT, "ahorro_2024.pdf")
            .await
            .unwrap();
        assert_eq!(parsed.kind, StatementKind::DepositAccount);
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[1].amount, dec!(-50000.00));
    }

    #[tokio::test]
    async fn test_deposit_llm_fallback_validates_schema() {
        use crate::llm::{LlmClient, LlmStatementRow, MockBackend};

        let mock = MockBackend::new();
        mock.push_rows(vec![LlmStatementRow {
            reference: "998".to_string(),
            date: "03-NOV-24".to_string(),
            description: "PAGO SERVICIOS".to_string(),
            currency: "CRC".to_string(),
            amount: "12,000.00".to_string(),
        }]);
        let parser = StatementParser::new(Some(LlmClient::Mock(mock)));

        // No grid rows in the text: forces the LLM path
        let text = "ESTADO DE CUENTA AHORROS\nDEL 01-NOV-24 AL 30-NOV-24\n(imagen escaneada)";
        let parsed = parser.parse_deposit(text, "ahorro_2024.pdf").await.unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].description, "PAGO SERVICIOS");
        assert_eq!(parsed.rows[0].amount, dec!(12000.00));
    }

    #[tokio::test]
    async fn test_deposit_llm_bad_schema_rejected() {
        use crate::llm::{LlmClient, LlmStatementRow, MockBackend};

        let mock = MockBackend::new();
        mock.push_rows(vec![LlmStatementRow {
            reference: "998".to_string(),
            date: "not-a-date".to_string(),
            description: "X".to_string(),
            currency: "CRC".to_string(),
            amount: "12,000.00".to_string(),
        }]);
        let parser = StatementParser::new(Some(LlmClient::Mock(mock)));

        let text = "ESTADO DE CUENTA AHORROS\nDEL 01-NOV-24 AL 30-NOV-24\n(imagen)";
        let result = parser.parse_deposit(text, "ahorro_2024.pdf").await;
        assert!(matches!(result, Err(Error::Parse(_))));
    }
}
