// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wallet lifecycle and proof operations.
//!
//! Handlers stay thin: validate the request against the wallet's unit and
//! limits, take the wallet's mutation lock where state changes, and hand
//! the rest to the [`ProofEngine`].

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{generate_access_key, Auth};
use crate::engine::{normalize_pubkey, EffectiveLimits, ProofEngine};
use crate::error::AppError;
use crate::mint::token;
use crate::mint::types::{MintProofState, MintQuote, MintQuoteState, ProofStateEntry};
use crate::state::AppState;
use crate::store::{NewWallet, StoreError, WalletRecord};

/// Request body for `POST /v1/wallet`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateWalletRequest {
    /// Optional human-readable label.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional token to redeem into the fresh wallet immediately.
    #[serde(default)]
    pub token: Option<String>,
}

/// Wallet view returned by creation and `GET /v1/wallet`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WalletResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The bearer credential. Shown in full; there is no way to recover it
    /// later.
    pub access_key: String,
    pub mint: String,
    pub unit: String,
    pub balance: u64,
    pub pending_balance: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<EffectiveLimits>,
}

/// Request body for `POST /v1/wallet/deposit`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct DepositRequest {
    pub amount: u64,
    pub unit: String,
}

/// A mint quote as shown to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DepositQuoteResponse {
    pub quote: String,
    /// The Lightning invoice to pay.
    pub request: String,
    pub state: MintQuoteState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

impl From<MintQuote> for DepositQuoteResponse {
    fn from(quote: MintQuote) -> Self {
        Self {
            quote: quote.quote,
            request: quote.request,
            state: quote.state,
            expiry: quote.expiry,
        }
    }
}

/// Request body for `POST /v1/wallet/send`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SendRequest {
    pub amount: u64,
    pub unit: String,
    #[serde(default)]
    pub memo: Option<String>,
    /// P2PK-lock the send bundle to this pubkey (npub, x-only hex or
    /// compressed hex).
    #[serde(default)]
    pub lock_to_pubkey: Option<String>,
    /// Not supported; always rejected.
    #[serde(default)]
    pub cashu_request: Option<String>,
}

/// Response for `POST /v1/wallet/send`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SendResponse {
    pub token: String,
    pub amount: u64,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// Request body for `POST /v1/wallet/check`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckTokenRequest {
    pub token: String,
}

/// Overall token state derived from the per-proof mint states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenState {
    Unspent,
    Spent,
    Pending,
    Mixed,
}

/// Response for `POST /v1/wallet/check`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckTokenResponse {
    pub amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    pub state: TokenState,
    pub mint_proof_states: Vec<MintProofState>,
}

/// Supported payloads for `POST /v1/wallet/decode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecodeKind {
    CashuTokenV3,
    CashuTokenV4,
    Bolt11Request,
    CashuRequest,
}

/// Request body for `POST /v1/wallet/decode`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct DecodeRequest {
    #[serde(rename = "type")]
    pub kind: DecodeKind,
    pub data: String,
}

/// Response for `POST /v1/wallet/decode`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DecodeResponse {
    #[serde(rename = "type")]
    pub kind: DecodeKind,
    #[schema(value_type = Object)]
    pub decoded: serde_json::Value,
}

/// Request body for `POST /v1/wallet/receive`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReceiveRequest {
    pub token: String,
}

/// Response for `POST /v1/wallet/receive`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReceiveResponse {
    pub amount: u64,
    pub unit: String,
    pub balance: u64,
    pub pending_balance: u64,
}

/// Create a wallet. Public, but rate-limited per IP by the fronting proxy.
///
/// With a `token` in the body the wallet is funded immediately; if that
/// redemption fails the wallet (and any rows it gained) is rolled back.
#[utoipa::path(
    post,
    path = "/v1/wallet",
    tag = "Wallet",
    request_body = CreateWalletRequest,
    responses(
        (status = 201, description = "Wallet created", body = WalletResponse),
        (status = 400, description = "Token invalid or over the balance limit"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_wallet(
    State(state): State<AppState>,
    Json(request): Json<CreateWalletRequest>,
) -> Result<(StatusCode, Json<WalletResponse>), AppError> {
    let mut created = None;
    // Regenerate on an access-key collision.
    for _ in 0..3 {
        match state.store.create_wallet(&NewWallet {
            access_key: generate_access_key(),
            name: request.name.clone(),
            mint_url: state.config.mint_url.clone(),
            unit: state.config.unit.clone(),
            max_balance: None,
            max_send: None,
            max_pay: None,
        }) {
            Ok(wallet) => {
                created = Some(wallet);
                break;
            }
            Err(StoreError::Duplicate(_)) => continue,
            Err(other) => return Err(other.into()),
        }
    }
    let wallet =
        created.ok_or_else(|| AppError::server("could not allocate a unique access key"))?;

    if let Some(token) = request.token.as_deref() {
        if let Err(error) = redeem_initial_token(&state, &wallet, token).await {
            let _ = state.store.delete_proofs_by_wallet(wallet.id);
            let _ = state.store.delete_wallet(wallet.id);
            return Err(error);
        }
    }

    let response = wallet_response(&state, &wallet, false).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn redeem_initial_token(
    state: &AppState,
    wallet: &WalletRecord,
    token_str: &str,
) -> Result<(), AppError> {
    let decoded = token::decode(token_str)
        .map_err(|e| AppError::validation(format!("invalid token: {e}")))?;
    ensure_token_unit(&decoded, &wallet.unit)?;

    let limits = EffectiveLimits::for_wallet(wallet, &state.config);
    if decoded.total() > limits.max_balance {
        return Err(AppError::limit(format!(
            "token exceeds the balance limit of {}",
            limits.max_balance
        )));
    }

    let mint = state.mint().await?;
    ProofEngine::new(&state.store, mint.as_ref())
        .receive_token(wallet.id, token_str)
        .await?;
    Ok(())
}

/// The authenticated wallet: balances and effective limits.
#[utoipa::path(
    get,
    path = "/v1/wallet",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Wallet details", body = WalletResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn get_wallet(
    Auth(wallet): Auth,
    State(state): State<AppState>,
) -> Result<Json<WalletResponse>, AppError> {
    Ok(Json(wallet_response(&state, &wallet, true).await?))
}

/// Request a deposit quote: a Lightning invoice that funds the wallet once
/// paid.
#[utoipa::path(
    post,
    path = "/v1/wallet/deposit",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    request_body = DepositRequest,
    responses(
        (status = 200, description = "Deposit quote", body = DepositQuoteResponse),
        (status = 400, description = "Unit mismatch or over the balance limit"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn create_deposit(
    Auth(wallet): Auth,
    State(state): State<AppState>,
    Json(request): Json<DepositRequest>,
) -> Result<Json<DepositQuoteResponse>, AppError> {
    ensure_unit(&wallet, &request.unit)?;
    ensure_positive(request.amount)?;

    let limits = EffectiveLimits::for_wallet(&wallet, &state.config);
    let (balance, _) = balances(&state, wallet.id)?;
    if balance + request.amount > limits.max_balance {
        return Err(AppError::limit(format!(
            "deposit would exceed the balance limit of {}",
            limits.max_balance
        )));
    }

    let mint = state.mint().await?;
    let quote = ProofEngine::new(&state.store, mint.as_ref())
        .create_deposit_quote(request.amount)
        .await?;
    Ok(Json(quote.into()))
}

/// Check a deposit quote. When the mint reports PAID the proofs are issued
/// into the wallet as a side effect.
#[utoipa::path(
    get,
    path = "/v1/wallet/deposit/{quote}",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    params(("quote" = String, Path, description = "Mint quote id")),
    responses(
        (status = 200, description = "Quote state", body = DepositQuoteResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn check_deposit(
    Auth(wallet): Auth,
    State(state): State<AppState>,
    Path(quote_id): Path<String>,
) -> Result<Json<DepositQuoteResponse>, AppError> {
    let mint = state.mint().await?;
    let quote = ProofEngine::new(&state.store, mint.as_ref())
        .check_deposit_quote(wallet.id, &quote_id)
        .await?;
    Ok(Json(quote.into()))
}

/// Produce an encoded token worth `amount`, optionally P2PK-locked.
#[utoipa::path(
    post,
    path = "/v1/wallet/send",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    request_body = SendRequest,
    responses(
        (status = 200, description = "Encoded token", body = SendResponse),
        (status = 400, description = "Validation failure or over the send limit"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn send(
    Auth(wallet): Auth,
    State(state): State<AppState>,
    Json(request): Json<SendRequest>,
) -> Result<Json<SendResponse>, AppError> {
    if request.cashu_request.is_some() {
        return Err(AppError::validation(
            "cashu payment requests are not supported",
        ));
    }
    ensure_unit(&wallet, &request.unit)?;
    ensure_positive(request.amount)?;

    let limits = EffectiveLimits::for_wallet(&wallet, &state.config);
    if request.amount > limits.max_send {
        return Err(AppError::limit(format!(
            "amount exceeds the send limit of {}",
            limits.max_send
        )));
    }

    let pubkey = request
        .lock_to_pubkey
        .as_deref()
        .map(normalize_pubkey)
        .transpose()?;

    let mint = state.mint().await?;
    let _guard = state.wallet_locks.lock(wallet.id).await;
    let outcome = ProofEngine::new(&state.store, mint.as_ref())
        .send_proofs(wallet.id, request.amount, pubkey)
        .await?;

    let token = token::encode_v3(
        &wallet.mint_url,
        &wallet.unit,
        request.memo.clone(),
        outcome.send,
    )
    .map_err(|e| AppError::server(format!("token encoding failed: {e}")))?;

    Ok(Json(SendResponse {
        token,
        amount: request.amount,
        unit: wallet.unit,
        memo: request.memo,
    }))
}

/// Decode a token and report the mint's view of its proofs. Local rows the
/// mint reports spent are settled as a side effect.
#[utoipa::path(
    post,
    path = "/v1/wallet/check",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    request_body = CheckTokenRequest,
    responses(
        (status = 200, description = "Token state", body = CheckTokenResponse),
        (status = 400, description = "Invalid token"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn check_token(
    Auth(wallet): Auth,
    State(state): State<AppState>,
    Json(request): Json<CheckTokenRequest>,
) -> Result<Json<CheckTokenResponse>, AppError> {
    let mint = state.mint().await?;
    let _guard = state.wallet_locks.lock(wallet.id).await;
    let (states, decoded) = ProofEngine::new(&state.store, mint.as_ref())
        .check_token_state(wallet.id, &request.token)
        .await?;

    Ok(Json(CheckTokenResponse {
        amount: decoded.total(),
        unit: decoded.unit,
        memo: decoded.memo,
        state: overall_state(&states),
        mint_proof_states: states.iter().map(|entry| entry.state).collect(),
    }))
}

/// Decode a Cashu token, bolt11 invoice or Cashu payment request without
/// touching any state.
#[utoipa::path(
    post,
    path = "/v1/wallet/decode",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    request_body = DecodeRequest,
    responses(
        (status = 200, description = "Decoded payload", body = DecodeResponse),
        (status = 400, description = "Undecodable payload"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn decode(
    Auth(_wallet): Auth,
    Json(request): Json<DecodeRequest>,
) -> Result<Json<DecodeResponse>, AppError> {
    let decoded = match request.kind {
        DecodeKind::CashuTokenV3 | DecodeKind::CashuTokenV4 => {
            let token = token::decode(&request.data)
                .map_err(|e| AppError::validation(format!("invalid token: {e}")))?;
            serde_json::json!({
                "mint": token.mint,
                "unit": token.unit,
                "memo": token.memo,
                "amount": token.total(),
                "proofs": token.proofs,
            })
        }
        DecodeKind::Bolt11Request => super::pay::bolt11_to_json(&request.data)?,
        DecodeKind::CashuRequest => token::decode_payment_request(&request.data)
            .map_err(|e| AppError::validation(format!("invalid payment request: {e}")))?,
    };

    Ok(Json(DecodeResponse {
        kind: request.kind,
        decoded,
    }))
}

/// Redeem an encoded token into the wallet.
#[utoipa::path(
    post,
    path = "/v1/wallet/receive",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    request_body = ReceiveRequest,
    responses(
        (status = 200, description = "Token redeemed", body = ReceiveResponse),
        (status = 400, description = "Invalid token or over the balance limit"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn receive(
    Auth(wallet): Auth,
    State(state): State<AppState>,
    Json(request): Json<ReceiveRequest>,
) -> Result<Json<ReceiveResponse>, AppError> {
    let decoded = token::decode(&request.token)
        .map_err(|e| AppError::validation(format!("invalid token: {e}")))?;
    ensure_token_unit(&decoded, &wallet.unit)?;

    let limits = EffectiveLimits::for_wallet(&wallet, &state.config);
    let (balance, _) = balances(&state, wallet.id)?;
    if balance + decoded.total() > limits.max_balance {
        return Err(AppError::limit(format!(
            "receiving would exceed the balance limit of {}",
            limits.max_balance
        )));
    }

    let mint = state.mint().await?;
    let _guard = state.wallet_locks.lock(wallet.id).await;
    let proofs = ProofEngine::new(&state.store, mint.as_ref())
        .receive_token(wallet.id, &request.token)
        .await?;

    let (balance, pending_balance) = balances(&state, wallet.id)?;
    Ok(Json(ReceiveResponse {
        amount: crate::mint::types::Proof::total(&proofs),
        unit: wallet.unit,
        balance,
        pending_balance,
    }))
}

// ── Helpers ──

pub(crate) fn ensure_unit(wallet: &WalletRecord, requested: &str) -> Result<(), AppError> {
    if requested != wallet.unit {
        return Err(AppError::validation(format!(
            "unit mismatch: wallet is {}, request says {requested}",
            wallet.unit
        )));
    }
    Ok(())
}

fn ensure_token_unit(
    decoded: &token::DecodedToken,
    wallet_unit: &str,
) -> Result<(), AppError> {
    if let Some(unit) = &decoded.unit {
        if unit != wallet_unit {
            return Err(AppError::validation(format!(
                "token unit {unit} does not match the wallet unit {wallet_unit}"
            )));
        }
    }
    Ok(())
}

pub(crate) fn ensure_positive(amount: u64) -> Result<(), AppError> {
    if amount == 0 {
        return Err(AppError::validation("amount must be greater than zero"));
    }
    Ok(())
}

fn balances(state: &AppState, wallet_id: i64) -> Result<(u64, u64), AppError> {
    use crate::store::ProofStatus;
    let balance = state
        .store
        .aggregate_amount(wallet_id, ProofStatus::Unspent)?;
    let pending = state
        .store
        .aggregate_amount(wallet_id, ProofStatus::Pending)?;
    Ok((balance, pending))
}

async fn wallet_response(
    state: &AppState,
    wallet: &WalletRecord,
    with_limits: bool,
) -> Result<WalletResponse, AppError> {
    let (balance, pending_balance) = balances(state, wallet.id)?;
    Ok(WalletResponse {
        name: wallet.name.clone(),
        access_key: wallet.access_key.clone(),
        mint: wallet.mint_url.clone(),
        unit: wallet.unit.clone(),
        balance,
        pending_balance,
        limits: with_limits.then(|| EffectiveLimits::for_wallet(wallet, &state.config)),
    })
}

fn overall_state(states: &[ProofStateEntry]) -> TokenState {
    let all = |target: MintProofState| states.iter().all(|entry| entry.state == target);
    if states.is_empty() || all(MintProofState::Unspent) {
        TokenState::Unspent
    } else if all(MintProofState::Spent) {
        TokenState::Spent
    } else if all(MintProofState::Pending) {
        TokenState::Pending
    } else {
        TokenState::Mixed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::api::router;
    use crate::config::Config;
    use crate::mint::client::MintClient;
    use crate::mint::types::{
        MeltQuote, MeltResult, MintError, Proof, SendLock, SwapOutcome,
    };

    /// Minimal scripted mint for router tests: a single queued swap result.
    #[derive(Default)]
    struct StubMint {
        swap: Mutex<Option<SwapOutcome>>,
    }

    #[async_trait]
    impl MintClient for StubMint {
        async fn create_mint_quote(&self, _: u64) -> Result<MintQuote, MintError> {
            Err(MintError::Connection("not scripted".into()))
        }
        async fn check_mint_quote(&self, _: &str) -> Result<MintQuote, MintError> {
            Err(MintError::Connection("not scripted".into()))
        }
        async fn mint_proofs(&self, _: u64, _: &str) -> Result<Vec<Proof>, MintError> {
            Err(MintError::Connection("not scripted".into()))
        }
        async fn swap(
            &self,
            _: u64,
            _: &[Proof],
            _: bool,
            _: Option<SendLock>,
        ) -> Result<SwapOutcome, MintError> {
            self.swap
                .lock()
                .unwrap()
                .take()
                .ok_or(MintError::Connection("not scripted".into()))
        }
        async fn receive(&self, _: &str) -> Result<Vec<Proof>, MintError> {
            Err(MintError::Connection("not scripted".into()))
        }
        async fn create_melt_quote(&self, _: &str) -> Result<MeltQuote, MintError> {
            Err(MintError::Connection("not scripted".into()))
        }
        async fn check_melt_quote(&self, _: &str) -> Result<MeltQuote, MintError> {
            Err(MintError::Connection("not scripted".into()))
        }
        async fn melt_proofs(
            &self,
            _: &MeltQuote,
            _: &[Proof],
        ) -> Result<MeltResult, MintError> {
            Err(MintError::Connection("not scripted".into()))
        }
        async fn check_proof_states(
            &self,
            _: &[Proof],
        ) -> Result<Vec<ProofStateEntry>, MintError> {
            Err(MintError::Connection("not scripted".into()))
        }
    }

    fn proof(secret: &str, amount: u64) -> Proof {
        Proof {
            id: "009a1f293253e41e".to_string(),
            amount,
            secret: secret.to_string(),
            c: "02c020067db727d586bc3183aecf97fcb800c3f4cc4759f69c626c9db5d8f5b5d4"
                .to_string(),
            witness: None,
            dleq: None,
        }
    }

    async fn json_request(
        app: axum::Router,
        method: &str,
        uri: &str,
        bearer: Option<&str>,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(key) = bearer {
            builder = builder.header("authorization", format!("Bearer {key}"));
        }
        let response = app
            .oneshot(builder.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn test_state(mint: Arc<dyn MintClient>) -> AppState {
        AppState::for_tests(Config::for_tests()).with_mint_client(mint)
    }

    async fn create_test_wallet(app: axum::Router) -> String {
        let (status, json) = json_request(
            app,
            "POST",
            "/v1/wallet",
            None,
            serde_json::json!({ "name": "test" }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        json["access_key"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn wallet_create_then_get_round_trips() {
        let state = test_state(Arc::new(StubMint::default()));
        let key = create_test_wallet(router(state.clone())).await;

        let (status, json) =
            json_request(router(state), "GET", "/v1/wallet", Some(&key), serde_json::json!({}))
                .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "test");
        assert_eq!(json["balance"], 0);
        assert_eq!(json["unit"], "sat");
        assert_eq!(json["limits"]["max_send"], 50_000);
    }

    #[tokio::test]
    async fn deposit_rejects_unit_mismatch_and_zero_amount() {
        let state = test_state(Arc::new(StubMint::default()));
        let key = create_test_wallet(router(state.clone())).await;

        let (status, json) = json_request(
            router(state.clone()),
            "POST",
            "/v1/wallet/deposit",
            Some(&key),
            serde_json::json!({ "amount": 100, "unit": "msat" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "VALIDATION");

        let (status, _) = json_request(
            router(state),
            "POST",
            "/v1/wallet/deposit",
            Some(&key),
            serde_json::json!({ "amount": 0, "unit": "sat" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn deposit_over_balance_limit_is_a_limit_error() {
        let state = test_state(Arc::new(StubMint::default()));
        let key = create_test_wallet(router(state.clone())).await;

        let (status, json) = json_request(
            router(state),
            "POST",
            "/v1/wallet/deposit",
            Some(&key),
            serde_json::json!({ "amount": 100_001, "unit": "sat" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "LIMIT");
    }

    #[tokio::test]
    async fn send_rejects_cashu_requests_outright() {
        let state = test_state(Arc::new(StubMint::default()));
        let key = create_test_wallet(router(state.clone())).await;

        let (status, json) = json_request(
            router(state),
            "POST",
            "/v1/wallet/send",
            Some(&key),
            serde_json::json!({
                "amount": 10,
                "unit": "sat",
                "cashu_request": "creqA..."
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "VALIDATION");
    }

    #[tokio::test]
    async fn send_over_limit_is_rejected_before_the_mint() {
        let state = test_state(Arc::new(StubMint::default()));
        let key = create_test_wallet(router(state.clone())).await;

        let (status, json) = json_request(
            router(state),
            "POST",
            "/v1/wallet/send",
            Some(&key),
            serde_json::json!({ "amount": 50_001, "unit": "sat" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "LIMIT");
    }

    #[tokio::test]
    async fn send_returns_an_encoded_token() {
        let mint = Arc::new(StubMint::default());
        *mint.swap.lock().unwrap() = Some(SwapOutcome {
            keep: vec![proof("k1", 90)],
            send: vec![proof("send1", 10)],
        });

        let state = test_state(mint);
        let key = create_test_wallet(router(state.clone())).await;
        state
            .store
            .insert_proofs(
                state
                    .store
                    .find_wallet_by_access_key(&key)
                    .unwrap()
                    .unwrap()
                    .id,
                &[proof("s1", 100)],
                crate::store::ProofStatus::Unspent,
            )
            .unwrap();

        let (status, json) = json_request(
            router(state.clone()),
            "POST",
            "/v1/wallet/send",
            Some(&key),
            serde_json::json!({ "amount": 10, "unit": "sat", "memo": "coffee" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["amount"], 10);
        assert_eq!(json["memo"], "coffee");

        let decoded = token::decode(json["token"].as_str().unwrap()).unwrap();
        assert_eq!(decoded.total(), 10);
        assert_eq!(decoded.memo.as_deref(), Some("coffee"));

        // The wallet now shows the keep piece unspent, the send piece pending.
        let (_, json) = json_request(
            router(state),
            "GET",
            "/v1/wallet",
            Some(&key),
            serde_json::json!({}),
        )
        .await;
        assert_eq!(json["balance"], 90);
        assert_eq!(json["pending_balance"], 10);
    }

    #[tokio::test]
    async fn send_normalizes_bad_pubkeys_to_validation_errors() {
        let state = test_state(Arc::new(StubMint::default()));
        let key = create_test_wallet(router(state.clone())).await;

        let (status, json) = json_request(
            router(state),
            "POST",
            "/v1/wallet/send",
            Some(&key),
            serde_json::json!({
                "amount": 10,
                "unit": "sat",
                "lock_to_pubkey": "deadbeef"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "VALIDATION");
    }

    #[tokio::test]
    async fn receive_rejects_malformed_tokens_and_unit_mismatch() {
        let state = test_state(Arc::new(StubMint::default()));
        let key = create_test_wallet(router(state.clone())).await;

        let (status, _) = json_request(
            router(state.clone()),
            "POST",
            "/v1/wallet/receive",
            Some(&key),
            serde_json::json!({ "token": "garbage" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let msat_token = token::encode_v3(
            "http://mint.localhost",
            "msat",
            None,
            vec![proof("x", 10)],
        )
        .unwrap();
        let (status, json) = json_request(
            router(state),
            "POST",
            "/v1/wallet/receive",
            Some(&key),
            serde_json::json!({ "token": msat_token }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "VALIDATION");
    }

    #[tokio::test]
    async fn receive_over_balance_limit_is_rejected_before_the_mint() {
        let state = test_state(Arc::new(StubMint::default()));
        let key = create_test_wallet(router(state.clone())).await;

        let big_token = token::encode_v3(
            "http://mint.localhost",
            "sat",
            None,
            vec![proof("huge", 200_000)],
        )
        .unwrap();
        let (status, json) = json_request(
            router(state),
            "POST",
            "/v1/wallet/receive",
            Some(&key),
            serde_json::json!({ "token": big_token }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "LIMIT");
    }

    #[tokio::test]
    async fn create_wallet_with_bad_token_rolls_back() {
        let state = test_state(Arc::new(StubMint::default()));

        let (status, _) = json_request(
            router(state.clone()),
            "POST",
            "/v1/wallet",
            None,
            serde_json::json!({ "token": "not-a-token" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn decode_handles_tokens_and_rejects_garbage() {
        let state = test_state(Arc::new(StubMint::default()));
        let key = create_test_wallet(router(state.clone())).await;

        let token_str = token::encode_v3(
            "http://mint.localhost",
            "sat",
            Some("memo".to_string()),
            vec![proof("p", 42)],
        )
        .unwrap();
        let (status, json) = json_request(
            router(state.clone()),
            "POST",
            "/v1/wallet/decode",
            Some(&key),
            serde_json::json!({ "type": "CASHU_TOKEN_V3", "data": token_str }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["type"], "CASHU_TOKEN_V3");
        assert_eq!(json["decoded"]["amount"], 42);
        assert_eq!(json["decoded"]["mint"], "http://mint.localhost");

        let (status, _) = json_request(
            router(state),
            "POST",
            "/v1/wallet/decode",
            Some(&key),
            serde_json::json!({ "type": "BOLT11_REQUEST", "data": "lnbc-nonsense" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn overall_state_labels() {
        let entry = |state| ProofStateEntry {
            y: "02aa".to_string(),
            state,
            witness: None,
        };
        assert_eq!(
            overall_state(&[entry(MintProofState::Unspent), entry(MintProofState::Unspent)]),
            TokenState::Unspent
        );
        assert_eq!(
            overall_state(&[entry(MintProofState::Spent), entry(MintProofState::Spent)]),
            TokenState::Spent
        );
        assert_eq!(
            overall_state(&[entry(MintProofState::Pending)]),
            TokenState::Pending
        );
        assert_eq!(
            overall_state(&[entry(MintProofState::Spent), entry(MintProofState::Unspent)]),
            TokenState::Mixed
        );
    }
}
