//! Exchange-rate lookup with a two-tier cache
//!
//! The rate for a date is a property of the date, not of request time:
//! `get_rate` is deterministic for a given (date, currency). Lookups go
//! tier 1 (process-local map) → tier 2 (durable table) → provider chain
//! `[official, fallback, static default]`, first non-null wins, and the
//! result is persisted with its source tag.
//!
//! Per-key single-flight: N concurrent callers for the same date produce at
//! most one provider call. A month of purchases on one date must cost one
//! network round-trip, not hundreds.

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::Currency;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Hard fallback when both providers are down and nothing is configured.
/// Roughly the long-run CRC/USD rate; persisted with source = "default".
const BUILTIN_DEFAULT_RATE: &str = "500.00";

/// Which provider produced a cached rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateSource {
    Official,
    Fallback,
    Default,
}

impl RateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Official => "official",
            Self::Fallback => "fallback",
            Self::Default => "default",
        }
    }
}

impl std::str::FromStr for RateSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "official" => Ok(Self::Official),
            "fallback" => Ok(Self::Fallback),
            "default" => Ok(Self::Default),
            _ => Err(format!("Unknown rate source: {}", s)),
        }
    }
}

/// A rate provider in the fallback chain. Returns Ok(None) when it has no
/// rate for the date, which moves the chain along.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn rate_for(&self, date: NaiveDate, currency: Currency) -> Result<Option<Decimal>>;
    fn source(&self) -> RateSource;
}

/// Primary official-source provider (central bank style JSON endpoint)
pub struct OfficialRateProvider {
    http: reqwest::Client,
    base_url: String,
}

impl OfficialRateProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(serde::Deserialize)]
struct OfficialRateResponse {
    rate: Option<String>,
}

#[async_trait]
impl RateProvider for OfficialRateProvider {
    async fn rate_for(&self, date: NaiveDate, currency: Currency) -> Result<Option<Decimal>> {
        let url = format!(
            "{}/rates?date={}&currency={}",
            self.base_url,
            date,
            currency.as_str()
        );
        let response = self.http.get(&url).send().await?;
        if response.status().is_server_error() {
            return Err(Error::Transient(format!(
                "official rate provider returned {}",
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Ok(None);
        }
        let body: OfficialRateResponse = response.json().await?;
        Ok(body.rate.and_then(|r| r.parse::<Decimal>().ok()))
    }

    fn source(&self) -> RateSource {
        RateSource::Official
    }
}

/// Secondary public-API provider
pub struct FallbackRateProvider {
    http: reqwest::Client,
    base_url: String,
}

impl FallbackRateProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(serde::Deserialize)]
struct FallbackRateResponse {
    rates: HashMap<String, f64>,
}

#[async_trait]
impl RateProvider for FallbackRateProvider {
    async fn rate_for(&self, date: NaiveDate, currency: Currency) -> Result<Option<Decimal>> {
        // This API is keyed the other way around: it quotes CRC per unit of
        // the foreign currency under the foreign code's historical endpoint.
        let url = format!("{}/{}?base={}", self.base_url, date, currency.as_str());
        let response = self.http.get(&url).send().await?;
        if response.status().is_server_error() {
            return Err(Error::Transient(format!(
                "fallback rate provider returned {}",
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Ok(None);
        }
        let body: FallbackRateResponse = response.json().await?;
        Ok(body
            .rates
            .get(Currency::Crc.as_str())
            .and_then(|r| Decimal::try_from(*r).ok()))
    }

    fn source(&self) -> RateSource {
        RateSource::Fallback
    }
}

/// Constant last-resort provider. Always answers.
pub struct StaticDefaultProvider {
    rate: Decimal,
}

impl StaticDefaultProvider {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }

    pub fn from_env() -> Self {
        let rate = std::env::var("CENTAVO_FX_DEFAULT_RATE")
            .ok()
            .and_then(|s| s.parse::<Decimal>().ok())
            .unwrap_or_else(|| BUILTIN_DEFAULT_RATE.parse().expect("builtin rate parses"));
        Self { rate }
    }
}

#[async_trait]
impl RateProvider for StaticDefaultProvider {
    async fn rate_for(&self, _date: NaiveDate, _currency: Currency) -> Result<Option<Decimal>> {
        Ok(Some(self.rate))
    }

    fn source(&self) -> RateSource {
        RateSource::Default
    }
}

type RateKey = (NaiveDate, Currency);

/// Two-tier cache-aside rate service with per-key single-flight
pub struct ExchangeRateCache {
    /// Tier 1: process-wide, concurrency-safe
    memory: DashMap<RateKey, Decimal>,
    /// Tier 2: durable table
    db: Database,
    providers: Vec<Box<dyn RateProvider>>,
    /// Per-key locks serializing provider calls
    inflight: Mutex<HashMap<RateKey, Arc<Mutex<()>>>>,
}

impl ExchangeRateCache {
    pub fn new(db: Database, providers: Vec<Box<dyn RateProvider>>) -> Self {
        Self {
            memory: DashMap::new(),
            db,
            providers,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// The standard provider chain from environment configuration
    pub fn from_env(db: Database) -> Result<Self> {
        let mut providers: Vec<Box<dyn RateProvider>> = Vec::new();
        if let Ok(url) = std::env::var("CENTAVO_FX_PRIMARY_URL") {
            providers.push(Box::new(OfficialRateProvider::new(&url)?));
        }
        if let Ok(url) = std::env::var("CENTAVO_FX_FALLBACK_URL") {
            providers.push(Box::new(FallbackRateProvider::new(&url)?));
        }
        providers.push(Box::new(StaticDefaultProvider::from_env()));
        Ok(Self::new(db, providers))
    }

    /// The local→local rate for a foreign currency on a date
    pub async fn get_rate(&self, date: NaiveDate, currency: Currency) -> Result<Decimal> {
        if currency.is_local() {
            return Ok(Decimal::ONE);
        }

        let key = (date, currency);

        // Tier 1
        if let Some(rate) = self.memory.get(&key) {
            return Ok(*rate);
        }

        // Serialize per key so concurrent misses collapse into one lookup
        let key_lock = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(key).or_default().clone()
        };
        let _guard = key_lock.lock().await;

        // Re-check after acquiring: a racing caller may have filled tier 1
        if let Some(rate) = self.memory.get(&key) {
            return Ok(*rate);
        }

        // Tier 2
        if let Some((rate, source)) = self.db.get_cached_rate(date, currency)? {
            debug!(%date, %currency, %rate, source = source.as_str(), "rate from durable cache");
            self.memory.insert(key, rate);
            return Ok(rate);
        }

        // Provider chain: first non-null wins
        for provider in &self.providers {
            match provider.rate_for(date, currency).await {
                Ok(Some(rate)) => {
                    let source = provider.source();
                    self.db.cache_rate(date, currency, rate, source)?;
                    self.memory.insert(key, rate);
                    debug!(%date, %currency, %rate, source = source.as_str(), "rate fetched");
                    return Ok(rate);
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(%date, %currency, error = %e, "rate provider failed, trying next");
                    continue;
                }
            }
        }

        Err(Error::Transient(format!(
            "no exchange-rate provider answered for {} {}",
            currency, date
        )))
    }

    /// Convert an amount to local currency.
    ///
    /// Local input returns (None, amount) untouched; foreign input returns
    /// the rate used and the half-up-rounded local amount.
    pub async fn convert(
        &self,
        amount: Decimal,
        currency: Currency,
        date: NaiveDate,
    ) -> Result<(Option<Decimal>, Decimal)> {
        if currency.is_local() {
            return Ok((None, amount));
        }
        let rate = self.get_rate(date, currency).await?;
        let local = (amount * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        Ok((Some(rate), local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProvider {
        calls: Arc<AtomicU32>,
        rate: Option<Decimal>,
    }

    #[async_trait]
    impl RateProvider for CountingProvider {
        async fn rate_for(&self, _date: NaiveDate, _currency: Currency) -> Result<Option<Decimal>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Yield so concurrent callers genuinely overlap
            tokio::task::yield_now().await;
            Ok(self.rate)
        }

        fn source(&self) -> RateSource {
            RateSource::Official
        }
    }

    fn cache_with(calls: Arc<AtomicU32>, rate: Option<Decimal>) -> Arc<ExchangeRateCache> {
        let db = Database::in_memory().unwrap();
        let providers: Vec<Box<dyn RateProvider>> = vec![
            Box::new(CountingProvider { calls, rate }),
            Box::new(StaticDefaultProvider::new(dec!(500.00))),
        ];
        Arc::new(ExchangeRateCache::new(db, providers))
    }

    #[tokio::test]
    async fn test_local_currency_needs_no_provider() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = cache_with(calls.clone(), Some(dec!(512.34)));
        let (rate, local) = cache
            .convert(dec!(15000), Currency::Crc, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
            .await
            .unwrap();
        assert_eq!(rate, None);
        assert_eq!(local, dec!(15000));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_up_rounding() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = cache_with(calls.clone(), Some(dec!(512.345)));
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let (rate, local) = cache.convert(dec!(10), Currency::Usd, date).await.unwrap();
        assert_eq!(rate, Some(dec!(512.345)));
        // 5123.45 exactly; and 10.01 * 512.345 = 5128.57345 -> 5128.57
        assert_eq!(local, dec!(5123.45));
        let (_, local2) = cache.convert(dec!(10.01), Currency::Usd, date).await.unwrap();
        assert_eq!(local2, dec!(5128.57));
    }

    #[tokio::test]
    async fn test_concurrent_lookups_hit_provider_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = cache_with(calls.clone(), Some(dec!(520.00)));
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.get_rate(date, Currency::Usd).await.unwrap()
            }));
        }

        let mut rates = Vec::new();
        for handle in handles {
            rates.push(handle.await.unwrap());
        }

        assert!(rates.iter().all(|r| *r == dec!(520.00)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provider_null_falls_through_to_default() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = cache_with(calls.clone(), None);
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();

        let rate = cache.get_rate(date, Currency::Usd).await.unwrap();
        assert_eq!(rate, dec!(500.00));

        // Persisted with the default source tag
        let db_rate = cache.db.get_cached_rate(date, Currency::Usd).unwrap();
        assert_eq!(db_rate, Some((dec!(500.00), RateSource::Default)));
    }

    #[tokio::test]
    async fn test_durable_tier_survives_memory_miss() {
        let db = Database::in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        db.cache_rate(date, Currency::Usd, dec!(515.00), RateSource::Official)
            .unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let providers: Vec<Box<dyn RateProvider>> = vec![Box::new(CountingProvider {
            calls: calls.clone(),
            rate: Some(dec!(999.00)),
        })];
        let cache = ExchangeRateCache::new(db, providers);

        // Fresh cache, empty tier 1: must answer from tier 2, not the provider
        assert_eq!(cache.get_rate(date, Currency::Usd).await.unwrap(), dec!(515.00));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
