// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP API: route table, OpenAPI description and CORS policy.
//!
//! Every route lives under `/v1`. `GET /v1/info` and `POST /v1/wallet` are
//! public; everything else requires the wallet's bearer access key.

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::state::AppState;

pub mod info;
pub mod pay;
pub mod rate;
pub mod wallet;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/info", get(info::get_info))
        .route(
            "/wallet",
            post(wallet::create_wallet).get(wallet::get_wallet),
        )
        .route("/wallet/deposit", post(wallet::create_deposit))
        .route("/wallet/deposit/{quote}", get(wallet::check_deposit))
        .route("/wallet/send", post(wallet::send))
        .route("/wallet/check", post(wallet::check_token))
        .route("/wallet/decode", post(wallet::decode))
        .route("/wallet/pay", post(pay::pay))
        .route("/wallet/pay/{quote}", get(pay::check_payment))
        .route("/wallet/receive", post(wallet::receive))
        .route("/rate/{currency}", get(rate::get_rate))
        .with_state(state.clone());

    let cors = cors_layer(&state.config);
    Router::new()
        .route("/health", get(health))
        .nest("/v1", v1_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// CORS policy from [`Config::cors_allowed_origins`]. The API is consumed
/// by non-browser clients in the common case, so an empty list allows any
/// origin; configuring origins locks browsers down to that list. Entries
/// that are not valid header values are dropped with a warning.
fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring malformed CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        info::get_info,
        wallet::create_wallet,
        wallet::get_wallet,
        wallet::create_deposit,
        wallet::check_deposit,
        wallet::send,
        wallet::check_token,
        wallet::decode,
        wallet::receive,
        pay::pay,
        pay::check_payment,
        rate::get_rate,
    ),
    components(schemas(
        info::InfoResponse,
        info::InfoLimits,
        wallet::CreateWalletRequest,
        wallet::WalletResponse,
        wallet::DepositRequest,
        wallet::DepositQuoteResponse,
        wallet::SendRequest,
        wallet::SendResponse,
        wallet::CheckTokenRequest,
        wallet::CheckTokenResponse,
        wallet::DecodeRequest,
        wallet::DecodeResponse,
        wallet::DecodeKind,
        wallet::ReceiveRequest,
        wallet::ReceiveResponse,
        wallet::TokenState,
        pay::PayRequest,
        pay::PayResponse,
        rate::RateResponse,
        crate::engine::limits::EffectiveLimits,
        crate::error::ErrorKind,
        crate::mint::types::MintQuoteState,
        crate::mint::types::MeltQuoteState,
        crate::mint::types::MintProofState,
    )),
    tags(
        (name = "Info", description = "Service metadata"),
        (name = "Wallet", description = "Wallet lifecycle and proof operations"),
        (name = "Pay", description = "Lightning payments via the mint"),
        (name = "Rate", description = "BTC/fiat exchange rates")
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

/// Registers the bearer access-key scheme in the OpenAPI description.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
            let scheme = Http::builder()
                .scheme(HttpAuthScheme::Bearer)
                .description(Some("Wallet access key (64 hex characters)"))
                .build();
            components.add_security_scheme("bearer_auth", SecurityScheme::Http(scheme));
        }
    }
}
