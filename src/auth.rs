// SPDX-License-Identifier: AGPL-3.0-or-later

//! Access-key authentication.
//!
//! Every wallet is addressed by its bearer credential: the 32-byte random
//! access key handed out at creation, presented as `Authorization: Bearer
//! <hex>`. The [`Auth`] extractor resolves the key to its wallet row; any
//! failure is a 401.
//!
//! ```rust,ignore
//! async fn handler(Auth(wallet): Auth) -> impl IntoResponse {
//!     // wallet is the authenticated WalletRecord
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::state::AppState;
use crate::store::WalletRecord;

/// Extractor for the authenticated wallet.
pub struct Auth(pub WalletRecord);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| AppError::unauthorized("missing Authorization header"))?
            .to_str()
            .map_err(|_| AppError::unauthorized("malformed Authorization header"))?;

        let key = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::unauthorized("expected a Bearer access key"))?;

        let wallet = state
            .store
            .find_wallet_by_access_key(key)
            .map_err(|e| AppError::database(e.to_string()))?
            .ok_or_else(|| AppError::unauthorized("unknown access key"))?;

        Ok(Auth(wallet))
    }
}

/// Generate a fresh access key: 32 random bytes as lowercase hex.
pub fn generate_access_key() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
