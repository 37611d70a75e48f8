// src/prices.rs
//! Spot price lookups against external quote services.
//!
//! Each [`InvestmentKind`] is backed by one [`PriceSource`]. Sources are
//! injected through [`PriceSources`] so handlers and tests can swap them.
use crate::models::InvestmentKind;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

pub const ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co/query";
pub const COINGECKO_URL: &str = "https://api.coingecko.com/api/v3/simple/price";

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("price unavailable for {0}")]
    Unavailable(String),
    #[error("missing API key for {0}")]
    MissingCredential(&'static str),
    #[error("unknown symbol {0}")]
    UnknownSymbol(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to decode quote: {0}")]
    Decode(String),
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Current unit price of `symbol` in USD.
    async fn spot_price(&self, symbol: &str) -> Result<f64, PriceError>;
}

/// Price source per investment kind.
#[derive(Clone)]
pub struct PriceSources {
    pub stock: Arc<dyn PriceSource>,
    pub crypto: Arc<dyn PriceSource>,
}

impl PriceSources {
    pub fn new(stock: Arc<dyn PriceSource>, crypto: Arc<dyn PriceSource>) -> Self {
        PriceSources { stock, crypto }
    }

    pub fn for_kind(&self, kind: InvestmentKind) -> &Arc<dyn PriceSource> {
        match kind {
            InvestmentKind::Stock => &self.stock,
            InvestmentKind::Crypto => &self.crypto,
        }
    }
}

#[derive(Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
}

#[derive(Deserialize)]
struct GlobalQuote {
    #[serde(rename = "05. price")]
    price: Option<String>,
}

/// Stock quotes from Alpha Vantage's `GLOBAL_QUOTE` function.
pub struct AlphaVantageQuotes {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl AlphaVantageQuotes {
    pub fn new(client: Client, api_key: Option<String>, base_url: impl Into<String>) -> Self {
        AlphaVantageQuotes {
            client,
            api_key,
            base_url: base_url.into(),
        }
    }
}

fn parse_global_quote(symbol: &str, body: &str) -> Result<f64, PriceError> {
    let response: GlobalQuoteResponse =
        serde_json::from_str(body).map_err(|e| PriceError::Decode(e.to_string()))?;
    let raw = response
        .global_quote
        .and_then(|q| q.price)
        .ok_or_else(|| PriceError::UnknownSymbol(symbol.to_string()))?;
    let price: f64 = raw
        .trim()
        .parse()
        .map_err(|_| PriceError::Decode(format!("bad price {:?} for {}", raw, symbol)))?;
    if !price.is_finite() || price <= 0.0 {
        return Err(PriceError::Unavailable(symbol.to_string()));
    }
    Ok(price)
}

#[async_trait]
impl PriceSource for AlphaVantageQuotes {
    fn name(&self) -> &'static str {
        "alphavantage"
    }

    async fn spot_price(&self, symbol: &str) -> Result<f64, PriceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(PriceError::MissingCredential("alphavantage"))?;
        let body = self
            .client
            .get(&self.base_url)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol),
                ("apikey", api_key),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_global_quote(symbol, &body)
    }
}

/// Crypto spot prices from CoinGecko's `simple/price` endpoint. The asset
/// symbol is used, lowercased, as the CoinGecko coin id.
pub struct CoinGeckoPrices {
    client: Client,
    base_url: String,
}

impl CoinGeckoPrices {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        CoinGeckoPrices {
            client,
            base_url: base_url.into(),
        }
    }
}

fn parse_simple_price(coin_id: &str, body: &str) -> Result<f64, PriceError> {
    let response: HashMap<String, HashMap<String, f64>> =
        serde_json::from_str(body).map_err(|e| PriceError::Decode(e.to_string()))?;
    let price = response
        .get(coin_id)
        .and_then(|quotes| quotes.get("usd"))
        .copied()
        .ok_or_else(|| PriceError::UnknownSymbol(coin_id.to_string()))?;
    if !price.is_finite() || price <= 0.0 {
        return Err(PriceError::Unavailable(coin_id.to_string()));
    }
    Ok(price)
}

#[async_trait]
impl PriceSource for CoinGeckoPrices {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    async fn spot_price(&self, symbol: &str) -> Result<f64, PriceError> {
        let coin_id = symbol.to_lowercase();
        let body = self
            .client
            .get(&self.base_url)
            .query(&[("ids", coin_id.as_str()), ("vs_currencies", "usd")])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_simple_price(&coin_id, &body)
    }
}

/// Keeps successful quotes from `inner` for `ttl`. Failures are not cached.
pub struct CachedPriceSource {
    inner: Arc<dyn PriceSource>,
    ttl: Duration,
    entries: RwLock<HashMap<String, (f64, DateTime<Utc>)>>,
}

impl CachedPriceSource {
    pub fn new(inner: Arc<dyn PriceSource>, ttl: Duration) -> Self {
        CachedPriceSource {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PriceSource for CachedPriceSource {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn spot_price(&self, symbol: &str) -> Result<f64, PriceError> {
        let now = Utc::now();
        if let Some((price, fetched_at)) = self.entries.read().await.get(symbol) {
            if now - *fetched_at < self.ttl {
                debug!("Cache hit for {} from {}", symbol, self.inner.name());
                return Ok(*price);
            }
        }

        let price = self.inner.spot_price(symbol).await?;
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, fetched_at)| now - *fetched_at < self.ttl);
        entries.insert(symbol.to_string(), (price, now));
        Ok(price)
    }
}

/// Wraps `source` in a cache when `ttl` is non-zero.
pub fn with_cache(source: Arc<dyn PriceSource>, ttl: Duration) -> Arc<dyn PriceSource> {
    if ttl > Duration::zero() {
        Arc::new(CachedPriceSource::new(source, ttl))
    } else {
        source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PriceSource for CountingSource {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn spot_price(&self, symbol: &str) -> Result<f64, PriceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if symbol == "BAD" {
                return Err(PriceError::UnknownSymbol(symbol.to_string()));
            }
            Ok(42.0)
        }
    }

    #[test]
    fn test_parse_global_quote() {
        let body = r#"{"Global Quote": {"01. symbol": "AAPL", "05. price": "175.5000"}}"#;
        assert_eq!(parse_global_quote("AAPL", body).unwrap(), 175.5);
    }

    #[test]
    fn test_parse_global_quote_unknown_symbol() {
        // Alpha Vantage answers unknown symbols with an empty quote object.
        let body = r#"{"Global Quote": {}}"#;
        assert!(matches!(
            parse_global_quote("NOPE", body),
            Err(PriceError::UnknownSymbol(_))
        ));
        let body = r#"{"Note": "Thank you for using Alpha Vantage!"}"#;
        assert!(matches!(
            parse_global_quote("AAPL", body),
            Err(PriceError::UnknownSymbol(_))
        ));
    }

    #[test]
    fn test_parse_global_quote_rejects_garbage() {
        let body = r#"{"Global Quote": {"05. price": "n/a"}}"#;
        assert!(matches!(
            parse_global_quote("AAPL", body),
            Err(PriceError::Decode(_))
        ));
        assert!(matches!(
            parse_global_quote("AAPL", "<html>"),
            Err(PriceError::Decode(_))
        ));
    }

    #[test]
    fn test_parse_simple_price() {
        let body = r#"{"bitcoin": {"usd": 64123.5}}"#;
        assert_eq!(parse_simple_price("bitcoin", body).unwrap(), 64123.5);
        assert!(matches!(
            parse_simple_price("btc", r#"{}"#),
            Err(PriceError::UnknownSymbol(_))
        ));
        assert!(matches!(
            parse_simple_price("dead", r#"{"dead": {"usd": 0.0}}"#),
            Err(PriceError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_alpha_vantage_requires_api_key() {
        let source = AlphaVantageQuotes::new(Client::new(), None, ALPHA_VANTAGE_URL);
        assert!(matches!(
            source.spot_price("AAPL").await,
            Err(PriceError::MissingCredential("alphavantage"))
        ));
    }

    #[tokio::test]
    async fn test_cache_reuses_fresh_quotes() {
        let inner = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedPriceSource::new(inner.clone(), Duration::seconds(60));

        assert_eq!(cached.spot_price("AAPL").await.unwrap(), 42.0);
        assert_eq!(cached.spot_price("AAPL").await.unwrap(), 42.0);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        assert!(cached.spot_price("BAD").await.is_err());
        assert!(cached.spot_price("BAD").await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stale_quotes_are_evicted() {
        let inner = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedPriceSource::new(inner, Duration::milliseconds(20));

        cached.spot_price("AAPL").await.unwrap();
        cached.spot_price("MSFT").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cached.spot_price("TSLA").await.unwrap();

        let entries = cached.entries.read().await;
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("TSLA"));
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let inner = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let source = with_cache(inner.clone(), Duration::zero());
        source.spot_price("AAPL").await.unwrap();
        source.spot_price("AAPL").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
