// SPDX-License-Identifier: AGPL-3.0-or-later

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use cashu_pocket::api;
use cashu_pocket::config::Config;
use cashu_pocket::state::AppState;
use cashu_pocket::store::SqliteStore;

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            std::process::exit(1);
        }
    };

    let store = match SqliteStore::open(&config.database_path) {
        Ok(store) => store,
        Err(error) => {
            eprintln!("failed to open database {}: {error}", config.database_path);
            std::process::exit(1);
        }
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Failed to parse bind address");

    tracing::info!(
        mint = %config.mint_url,
        unit = %config.unit,
        %addr,
        "cashu-pocket listening (docs at /docs)"
    );

    let state = AppState::new(store, config);
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");

    axum::serve(listener, app.into_make_service())
        .await
        .expect("Server failed");
}

/// `RUST_LOG` controls the filter; `LOG_FORMAT=json` switches to JSON
/// output for log aggregation.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|fmt| fmt.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
