// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Application State
//!
//! Shared state handed to every axum handler via the `State` extractor.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         AppState                             │
//! │  Arc<SqliteStore>   wallets + proofs (the only persistence)  │
//! │  Arc<Config>        env-derived settings                     │
//! │  OnceCell<mint>     shared mint client, built on first use   │
//! │  Arc<RateCache>     single-flight fiat rates                 │
//! │  Arc<LnurlClient>   lightning-address resolution             │
//! │  Arc<WalletLocks>   per-wallet mutation serialization        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `AppState` is `Clone` and `Send + Sync`; everything inside is
//! reference-counted.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::config::Config;
use crate::engine::WalletLocks;
use crate::error::AppError;
use crate::lnurl::LnurlClient;
use crate::mint::{HttpMintClient, MintClient};
use crate::rates::RateCache;
use crate::store::SqliteStore;

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The persistence boundary.
    pub store: Arc<SqliteStore>,
    /// Resolved process configuration.
    pub config: Arc<Config>,
    /// Fiat rate cache.
    pub rates: Arc<RateCache>,
    /// LNURL-pay resolver.
    pub lnurl: Arc<LnurlClient>,
    /// Per-wallet mutation locks.
    pub wallet_locks: Arc<WalletLocks>,
    /// Lazily initialized shared mint client. Every caller after the first
    /// observes the same instance.
    mint: Arc<OnceCell<Arc<dyn MintClient>>>,
}

impl AppState {
    pub fn new(store: SqliteStore, config: Config) -> Self {
        let rates = RateCache::new(&config.rate_oracle_url);
        Self {
            store: Arc::new(store),
            rates: Arc::new(rates),
            lnurl: Arc::new(LnurlClient::new()),
            wallet_locks: Arc::new(WalletLocks::new()),
            mint: Arc::new(OnceCell::new()),
            config: Arc::new(config),
        }
    }

    /// Inject a pre-built mint client (tests use a scripted mock).
    pub fn with_mint_client(mut self, mint: Arc<dyn MintClient>) -> Self {
        self.mint = Arc::new(OnceCell::new_with(Some(mint)));
        self
    }

    /// The shared mint client, created on first use.
    pub async fn mint(&self) -> Result<Arc<dyn MintClient>, AppError> {
        self.mint
            .get_or_try_init(|| async {
                HttpMintClient::new(&self.config.mint_url, &self.config.unit)
                    .map(|client| Arc::new(client) as Arc<dyn MintClient>)
                    .map_err(|e| {
                        AppError::connection(format!("failed to build mint client: {e}"))
                    })
            })
            .await
            .cloned()
    }

    /// In-memory state for tests.
    pub fn for_tests(config: Config) -> Self {
        let store = SqliteStore::in_memory().expect("in-memory store");
        Self::new(store, config)
    }
}
