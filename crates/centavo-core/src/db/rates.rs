//! Durable exchange-rate cache (tier 2)

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;
use std::str::FromStr;

use super::{parse_decimal, Database};
use crate::error::Result;
use crate::fx::RateSource;
use crate::models::Currency;

impl Database {
    /// Look up a cached rate for (date, currency)
    pub fn get_cached_rate(
        &self,
        date: NaiveDate,
        currency: Currency,
    ) -> Result<Option<(Decimal, RateSource)>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT rate, source FROM exchange_rate_cache
                 WHERE rate_date = ? AND currency = ?",
                params![date.to_string(), currency.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((rate_str, source_str)) => {
                let rate = parse_decimal(&rate_str)?;
                let source = RateSource::from_str(&source_str).unwrap_or(RateSource::Default);
                Ok(Some((rate, source)))
            }
            None => Ok(None),
        }
    }

    /// Persist a rate with its provider tag. Idempotent per (date, currency).
    pub fn cache_rate(
        &self,
        date: NaiveDate,
        currency: Currency,
        rate: Decimal,
        source: RateSource,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO exchange_rate_cache (rate_date, currency, rate, source)
             VALUES (?, ?, ?, ?)",
            params![
                date.to_string(),
                currency.as_str(),
                rate.to_string(),
                source.as_str(),
            ],
        )?;
        Ok(())
    }
}
