// SPDX-License-Identifier: AGPL-3.0-or-later

//! Lightning payments (melt) through the mint.

use std::str::FromStr;

use axum::{
    extract::{Path, State},
    Json,
};
use lightning_invoice::{Bolt11Invoice, Bolt11InvoiceDescriptionRef};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::wallet::{ensure_positive, ensure_unit};
use crate::auth::Auth;
use crate::engine::{EffectiveLimits, ProofEngine};
use crate::error::AppError;
use crate::mint::types::{MeltQuote, MeltQuoteState};
use crate::state::AppState;

/// Request body for `POST /v1/wallet/pay`. Exactly one of `bolt11_request`
/// and `lightning_address` must be present.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PayRequest {
    #[serde(default)]
    pub bolt11_request: Option<String>,
    #[serde(default)]
    pub lightning_address: Option<String>,
    pub amount: u64,
    pub unit: String,
}

/// Melt quote view returned by the pay endpoints.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PayResponse {
    pub quote: String,
    pub amount: u64,
    pub fee_reserve: u64,
    pub state: MeltQuoteState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_preimage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

impl From<MeltQuote> for PayResponse {
    fn from(quote: MeltQuote) -> Self {
        Self {
            quote: quote.quote,
            amount: quote.amount,
            fee_reserve: quote.fee_reserve,
            state: quote.state,
            payment_preimage: quote.payment_preimage,
            expiry: quote.expiry,
        }
    }
}

/// Pay a bolt11 invoice or a lightning address.
///
/// A 202 response means the payment is still in flight: poll
/// `GET /v1/wallet/pay/{quote}` until it resolves.
#[utoipa::path(
    post,
    path = "/v1/wallet/pay",
    tag = "Pay",
    security(("bearer_auth" = [])),
    request_body = PayRequest,
    responses(
        (status = 200, description = "Payment settled", body = PayResponse),
        (status = 202, description = "Payment pending; check the quote later"),
        (status = 400, description = "Validation failure or over the pay limit"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Payment failed or outcome unknown")
    )
)]
pub async fn pay(
    Auth(wallet): Auth,
    State(state): State<AppState>,
    Json(request): Json<PayRequest>,
) -> Result<Json<PayResponse>, AppError> {
    ensure_unit(&wallet, &request.unit)?;
    ensure_positive(request.amount)?;

    let limits = EffectiveLimits::for_wallet(&wallet, &state.config);
    if request.amount > limits.max_pay {
        return Err(AppError::limit(format!(
            "amount exceeds the pay limit of {}",
            limits.max_pay
        )));
    }

    let amount_msat = match wallet.unit.as_str() {
        "msat" => request.amount,
        _ => request.amount * 1000,
    };

    let bolt11 = match (&request.bolt11_request, &request.lightning_address) {
        (Some(bolt11), None) => bolt11.clone(),
        (None, Some(address)) => state.lnurl.resolve_address(address, amount_msat).await?,
        _ => {
            return Err(AppError::validation(
                "provide exactly one of bolt11_request or lightning_address",
            ))
        }
    };

    let invoice = parse_bolt11(&bolt11)?;
    match invoice.amount_milli_satoshis() {
        Some(msat) if msat == amount_msat => {}
        Some(msat) => {
            return Err(AppError::validation(format!(
                "invoice is for {msat} msat, request says {amount_msat} msat"
            )))
        }
        None => {
            return Err(AppError::validation(
                "amountless invoices are not supported",
            ))
        }
    }

    let mint = state.mint().await?;
    let engine = ProofEngine::new(&state.store, mint.as_ref());
    let quote = engine.create_melt_quote(&bolt11).await?;
    if quote.amount > limits.max_pay {
        return Err(AppError::limit(format!(
            "quoted amount exceeds the pay limit of {}",
            limits.max_pay
        )));
    }

    let _guard = state.wallet_locks.lock(wallet.id).await;
    let result = engine.melt_proofs(wallet.id, &quote).await?;
    Ok(Json(result.quote.into()))
}

/// Check a melt quote's state at the mint.
#[utoipa::path(
    get,
    path = "/v1/wallet/pay/{quote}",
    tag = "Pay",
    security(("bearer_auth" = [])),
    params(("quote" = String, Path, description = "Melt quote id")),
    responses(
        (status = 200, description = "Quote state", body = PayResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn check_payment(
    Auth(_wallet): Auth,
    State(state): State<AppState>,
    Path(quote_id): Path<String>,
) -> Result<Json<PayResponse>, AppError> {
    let mint = state.mint().await?;
    let quote = ProofEngine::new(&state.store, mint.as_ref())
        .check_melt_quote(&quote_id)
        .await?;
    Ok(Json(quote.into()))
}

pub(crate) fn parse_bolt11(raw: &str) -> Result<Bolt11Invoice, AppError> {
    Bolt11Invoice::from_str(raw.trim())
        .map_err(|e| AppError::validation(format!("invalid bolt11 invoice: {e}")))
}

/// Decode a bolt11 invoice into the fields clients care about.
pub(crate) fn bolt11_to_json(raw: &str) -> Result<serde_json::Value, AppError> {
    let invoice = parse_bolt11(raw)?;
    let description = match invoice.description() {
        Bolt11InvoiceDescriptionRef::Direct(description) => description.to_string(),
        Bolt11InvoiceDescriptionRef::Hash(hash) => hash.0.to_string(),
    };

    Ok(serde_json::json!({
        "amount_msat": invoice.amount_milli_satoshis(),
        "payment_hash": invoice.payment_hash().to_string(),
        "description": description,
        "expiry_seconds": invoice.expiry_time().as_secs(),
        "timestamp": invoice.duration_since_epoch().as_secs(),
    }))
}
