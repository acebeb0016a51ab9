// SPDX-License-Identifier: AGPL-3.0-or-later

//! BTC/fiat exchange rates with a single-flight cache.
//!
//! One upstream request warms every supported currency at once, so the
//! cache is keyed per currency but filled wholesale. At most one fetch is
//! in flight at any time: concurrent callers queue on the fetch mutex and
//! re-read the cache after acquiring it. A stale entry beats a failing
//! oracle.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::AppError;

/// Fiat currencies the oracle quotes.
pub const SUPPORTED_CURRENCIES: [&str; 4] = ["usd", "eur", "cad", "gbp"];

/// Cache time-to-live.
const CACHE_TTL: Duration = Duration::from_secs(120);
/// Hard deadline for the upstream fetch.
const FETCH_DEADLINE: Duration = Duration::from_secs(5);

/// One cached conversion rate.
#[derive(Debug, Clone, PartialEq)]
pub struct RateRecord {
    /// Uppercase currency code.
    pub currency: String,
    /// Sats per one unit of the currency: `1e8 / btc_price`.
    pub rate: f64,
    /// Oracle fetch time, milliseconds since the epoch.
    pub timestamp_ms: u64,
}

/// mempool.space-compatible price response.
#[derive(Debug, Deserialize)]
struct PricesResponse {
    #[serde(rename = "USD")]
    usd: Option<f64>,
    #[serde(rename = "EUR")]
    eur: Option<f64>,
    #[serde(rename = "CAD")]
    cad: Option<f64>,
    #[serde(rename = "GBP")]
    gbp: Option<f64>,
}

impl PricesResponse {
    fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> {
        [
            ("usd", self.usd),
            ("eur", self.eur),
            ("cad", self.cad),
            ("gbp", self.gbp),
        ]
        .into_iter()
        .filter_map(|(currency, price)| price.map(|p| (currency, p)))
    }
}

/// Process-wide fiat rate cache.
pub struct RateCache {
    oracle_url: String,
    http: reqwest::Client,
    cache: RwLock<HashMap<String, RateRecord>>,
    fetch_lock: Mutex<()>,
    ttl: Duration,
}

impl RateCache {
    pub fn new(oracle_url: &str) -> Self {
        Self::with_ttl(oracle_url, CACHE_TTL)
    }

    pub fn with_ttl(oracle_url: &str, ttl: Duration) -> Self {
        Self {
            oracle_url: oracle_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            cache: RwLock::new(HashMap::new()),
            fetch_lock: Mutex::new(()),
            ttl,
        }
    }

    /// Get the sats-per-unit rate for a currency.
    ///
    /// Unknown currencies are rejected before any upstream call. Within the
    /// TTL the exact cached record (same timestamp) is returned.
    pub async fn get_rate(&self, currency: &str) -> Result<RateRecord, AppError> {
        let key = currency.to_ascii_lowercase();
        if !SUPPORTED_CURRENCIES.contains(&key.as_str()) {
            return Err(AppError::validation(format!(
                "unsupported currency: {currency}"
            )));
        }

        if let Some(fresh) = self.cached(&key, true) {
            return Ok(fresh);
        }

        // Single-flight: one task fetches, everyone else queues here and
        // finds the warm cache on re-check. The guard's drop is the
        // guaranteed release.
        let _guard = self.fetch_lock.lock().await;
        if let Some(fresh) = self.cached(&key, true) {
            return Ok(fresh);
        }

        match self.fetch_all().await {
            Ok(()) => self.cached(&key, true).ok_or_else(|| {
                AppError::connection(format!("oracle did not quote {currency}"))
            }),
            Err(error) => {
                // A stale entry beats a failing oracle.
                if let Some(stale) = self.cached(&key, false) {
                    warn!(%error, currency = %key, "rate fetch failed; serving stale entry");
                    return Ok(stale);
                }
                Err(error)
            }
        }
    }

    fn cached(&self, key: &str, require_fresh: bool) -> Option<RateRecord> {
        let cache = self.cache.read().ok()?;
        let record = cache.get(key)?;
        if require_fresh {
            let age = now_ms().saturating_sub(record.timestamp_ms);
            if age >= self.ttl.as_millis() as u64 {
                return None;
            }
        }
        Some(record.clone())
    }

    /// One oracle round-trip fills every supported currency with the same
    /// timestamp.
    async fn fetch_all(&self) -> Result<(), AppError> {
        let url = format!("{}/api/v1/prices", self.oracle_url);
        let request = self.http.get(&url).timeout(FETCH_DEADLINE).send();

        let response = tokio::time::timeout(FETCH_DEADLINE, request)
            .await
            .map_err(|_| AppError::connection("rate oracle timed out"))?
            .map_err(|e| AppError::connection(format!("rate oracle unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::connection(format!(
                "rate oracle returned {}",
                response.status()
            )));
        }

        let prices: PricesResponse = response
            .json()
            .await
            .map_err(|e| AppError::connection(format!("invalid oracle response: {e}")))?;

        let timestamp_ms = now_ms();
        let mut cache = self
            .cache
            .write()
            .map_err(|_| AppError::server("rate cache poisoned"))?;
        for (currency, price) in prices.iter() {
            if price <= 0.0 {
                continue;
            }
            cache.insert(
                currency.to_string(),
                RateRecord {
                    currency: currency.to_ascii_uppercase(),
                    rate: 100_000_000.0 / price,
                    timestamp_ms,
                },
            );
        }
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::{extract::State, routing::get, Json, Router};

    use super::*;

    /// Spin up a local oracle that counts its hits.
    async fn test_oracle(price_usd: f64) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_handle = hits.clone();

        let app = Router::new()
            .route(
                "/api/v1/prices",
                get(move |State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(serde_json::json!({
                        "time": 1_700_000_000,
                        "USD": price_usd,
                        "EUR": 92_000.0,
                        "CAD": 135_000.0,
                        "GBP": 80_000.0,
                    }))
                }),
            )
            .with_state(hits_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), hits)
    }

    #[tokio::test]
    async fn unknown_currency_is_rejected_without_a_fetch() {
        let (url, hits) = test_oracle(100_000.0).await;
        let cache = RateCache::new(&url);

        let err = cache.get_rate("jpy").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rate_is_sats_per_unit() {
        let (url, _) = test_oracle(100_000.0).await;
        let cache = RateCache::new(&url);

        let record = cache.get_rate("usd").await.unwrap();
        assert_eq!(record.currency, "USD");
        // 1e8 / 100_000 = 1000 sats per dollar.
        assert!((record.rate - 1000.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let (url, hits) = test_oracle(100_000.0).await;
        let cache = Arc::new(RateCache::new(&url));

        let a = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_rate("usd").await.unwrap() })
        };
        let b = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_rate("usd").await.unwrap() })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(a.timestamp_ms, b.timestamp_ms);
        assert_eq!(a.rate, b.rate);
    }

    #[tokio::test]
    async fn one_fetch_warms_every_currency() {
        let (url, hits) = test_oracle(100_000.0).await;
        let cache = RateCache::new(&url);

        let usd = cache.get_rate("usd").await.unwrap();
        let eur = cache.get_rate("eur").await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(usd.timestamp_ms, eur.timestamp_ms);
        assert_eq!(eur.currency, "EUR");
    }

    #[tokio::test]
    async fn within_ttl_the_exact_record_is_returned() {
        let (url, hits) = test_oracle(100_000.0).await;
        let cache = RateCache::new(&url);

        let first = cache.get_rate("usd").await.unwrap();
        let second = cache.get_rate("usd").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_entry_survives_oracle_outage() {
        let (url, _) = test_oracle(100_000.0).await;
        // TTL of zero: every entry is immediately stale.
        let cache = RateCache::with_ttl(&url, Duration::from_millis(0));

        let first = cache.get_rate("usd").await.unwrap();

        // A cache pointed at a dead oracle but holding a warm entry.
        let dead = RateCache::with_ttl("http://127.0.0.1:1", Duration::from_millis(0));
        dead.cache.write().unwrap().insert(
            "usd".to_string(),
            first.clone(),
        );
        let served = dead.get_rate("usd").await.unwrap();
        assert_eq!(served.timestamp_ms, first.timestamp_ms);
    }

    #[tokio::test]
    async fn dead_oracle_without_cache_is_a_connection_error() {
        let cache = RateCache::new("http://127.0.0.1:1");
        let err = cache.get_rate("usd").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Connection);
    }
}
