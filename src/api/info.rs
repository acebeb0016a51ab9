// SPDX-License-Identifier: AGPL-3.0-or-later

//! Public service metadata.

use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

/// Service-wide limits as reported to clients. Rate limits are enforced by
/// the fronting proxy; they are surfaced here so clients can pace
/// themselves.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InfoLimits {
    pub max_balance: u64,
    pub max_send: u64,
    pub max_pay: u64,
    pub rate_limit_max: u64,
    pub rate_limit_create_wallet_max: u64,
    pub rate_limit_window: u64,
}

/// Response for `GET /v1/info`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InfoResponse {
    pub status: String,
    pub help: String,
    pub terms: String,
    pub unit: String,
    pub mint: String,
    pub limits: InfoLimits,
}

/// Service metadata: status line, operator contact, mint and global limits.
#[utoipa::path(
    get,
    path = "/v1/info",
    tag = "Info",
    responses(
        (status = 200, description = "Service metadata", body = InfoResponse)
    )
)]
pub async fn get_info(State(state): State<AppState>) -> Json<InfoResponse> {
    let config = &state.config;
    Json(InfoResponse {
        status: config.service_status.clone(),
        help: config.service_help.clone(),
        terms: config.service_terms.clone(),
        unit: config.unit.clone(),
        mint: config.mint_url.clone(),
        limits: InfoLimits {
            max_balance: config.max_balance,
            max_send: config.max_send,
            max_pay: config.max_pay,
            rate_limit_max: config.rate_limit_max,
            rate_limit_create_wallet_max: config.rate_limit_create_wallet_max,
            rate_limit_window: config.rate_limit_window,
        },
    })
}
