// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment at startup. `MINT_URL` and
//! `DATABASE_URL` are required; everything else has a default.
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `MINT_URL` | Base URL of the Cashu mint | required |
//! | `DATABASE_URL` | SQLite database path (`sqlite://` prefix accepted) | required |
//! | `UNIT` | Wallet unit, `sat` or `msat` | `sat` |
//! | `MAX_BALANCE` | Global balance cap per wallet | `100000` |
//! | `MAX_SEND` | Global per-send cap | `50000` |
//! | `MAX_PAY` | Global per-payment cap | `50000` |
//! | `RATE_LIMIT_MAX` | Requests per window (reported via /info) | `60` |
//! | `RATE_LIMIT_CREATE_WALLET_MAX` | Wallet creations per window | `5` |
//! | `RATE_LIMIT_WINDOW` | Rate-limit window in seconds | `60` |
//! | `SERVICE_STATUS` | Status line for /info | `OK` |
//! | `SERVICE_HELP` | Help text for /info | empty |
//! | `SERVICE_TERMS` | Terms text for /info | empty |
//! | `RATE_ORACLE_URL` | BTC price oracle base URL | `https://mempool.space` |
//! | `CORS_ALLOWED_ORIGINS` | Comma-separated browser origins | empty (allow any) |
//! | `PORT` | Server bind port | `8080` |
//! | `HOST` | Server bind address | `0.0.0.0` |

use std::env;

use thiserror::Error;

/// Global default balance cap, in wallet units.
pub const DEFAULT_MAX_BALANCE: u64 = 100_000;
/// Global default per-send cap.
pub const DEFAULT_MAX_SEND: u64 = 50_000;
/// Global default per-payment cap.
pub const DEFAULT_MAX_PAY: u64 = 50_000;

const DEFAULT_RATE_ORACLE_URL: &str = "https://mempool.space";

/// Configuration errors raised at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Process configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Cashu mint every wallet is bound to.
    pub mint_url: String,
    /// SQLite database path.
    pub database_path: String,
    /// Unit all wallets operate in (`sat` or `msat`).
    pub unit: String,
    /// Global balance cap per wallet.
    pub max_balance: u64,
    /// Global per-send cap.
    pub max_send: u64,
    /// Global per-payment cap.
    pub max_pay: u64,
    /// Requests per rate-limit window (enforced by the fronting proxy,
    /// reported via /info).
    pub rate_limit_max: u64,
    /// Wallet creations per rate-limit window.
    pub rate_limit_create_wallet_max: u64,
    /// Rate-limit window in seconds.
    pub rate_limit_window: u64,
    /// Service status line.
    pub service_status: String,
    /// Service help text.
    pub service_help: String,
    /// Service terms text.
    pub service_terms: String,
    /// BTC price oracle base URL.
    pub rate_oracle_url: String,
    /// Browser origins allowed by CORS; empty means any origin.
    pub cors_allowed_origins: Vec<String>,
    /// Bind port.
    pub port: u16,
    /// Bind address.
    pub host: String,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mint_url = required("MINT_URL")?;
        let database_path = parse_database_url(&required("DATABASE_URL")?);

        let unit = env_or("UNIT", "sat");
        if unit != "sat" && unit != "msat" {
            return Err(ConfigError::InvalidValue(
                "UNIT".to_string(),
                format!("expected sat or msat, got {unit}"),
            ));
        }

        Ok(Self {
            mint_url: mint_url.trim_end_matches('/').to_string(),
            database_path,
            unit,
            max_balance: parsed_or("MAX_BALANCE", DEFAULT_MAX_BALANCE)?,
            max_send: parsed_or("MAX_SEND", DEFAULT_MAX_SEND)?,
            max_pay: parsed_or("MAX_PAY", DEFAULT_MAX_PAY)?,
            rate_limit_max: parsed_or("RATE_LIMIT_MAX", 60)?,
            rate_limit_create_wallet_max: parsed_or("RATE_LIMIT_CREATE_WALLET_MAX", 5)?,
            rate_limit_window: parsed_or("RATE_LIMIT_WINDOW", 60)?,
            service_status: env_or("SERVICE_STATUS", "OK"),
            service_help: env_or("SERVICE_HELP", ""),
            service_terms: env_or("SERVICE_TERMS", ""),
            rate_oracle_url: env_or("RATE_ORACLE_URL", DEFAULT_RATE_ORACLE_URL)
                .trim_end_matches('/')
                .to_string(),
            cors_allowed_origins: split_list(&env_or("CORS_ALLOWED_ORIGINS", "")),
            port: parsed_or("PORT", 8080u16)?,
            host: env_or("HOST", "0.0.0.0"),
        })
    }

    /// A config suitable for tests: in-memory database, local mint URL.
    pub fn for_tests() -> Self {
        Self {
            mint_url: "http://mint.localhost".to_string(),
            database_path: ":memory:".to_string(),
            unit: "sat".to_string(),
            max_balance: DEFAULT_MAX_BALANCE,
            max_send: DEFAULT_MAX_SEND,
            max_pay: DEFAULT_MAX_PAY,
            rate_limit_max: 60,
            rate_limit_create_wallet_max: 5,
            rate_limit_window: 60,
            service_status: "OK".to_string(),
            service_help: String::new(),
            service_terms: String::new(),
            rate_oracle_url: "http://oracle.localhost".to_string(),
            cors_allowed_origins: Vec::new(),
            port: 0,
            host: "127.0.0.1".to_string(),
        }
    }
}

/// Split a comma-separated env value into trimmed, non-empty entries.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// Accept both a bare path and a `sqlite://` URL for `DATABASE_URL`.
fn parse_database_url(raw: &str) -> String {
    raw.strip_prefix("sqlite://")
        .or_else(|| raw.strip_prefix("sqlite:"))
        .unwrap_or(raw)
        .to_string()
}

fn required(name: &str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parsed_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        _ => Ok(default),
    }
}
