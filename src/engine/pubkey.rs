// SPDX-License-Identifier: AGPL-3.0-or-later

//! Public key normalization for P2PK locks.
//!
//! Callers hand in pubkeys in three encodings: nostr `npub` bech32, bare
//! x-only hex, or compressed SEC1 hex. All are canonicalized to 66 lowercase
//! hex characters. No curve validation happens here; an invalid point is
//! the mint's to reject.

use crate::error::AppError;

/// Canonicalize a pubkey string into compressed SEC1 hex.
///
/// | Input | Rule |
/// |-------|------|
/// | `npub…` | bech32-decode, require the `npub` type, prefix `02` |
/// | 64 hex chars | x-only, prefix `02` |
/// | 66 hex chars | accepted as-is |
pub fn normalize_pubkey(input: &str) -> Result<String, AppError> {
    let trimmed = input.trim();

    if trimmed.starts_with("npub") {
        let (hrp, data) = bech32::decode(trimmed)
            .map_err(|e| AppError::validation(format!("invalid npub encoding: {e}")))?;
        if hrp.as_str() != "npub" {
            return Err(AppError::validation(format!(
                "expected npub, got {}",
                hrp.as_str()
            )));
        }
        if data.len() != 32 {
            return Err(AppError::validation(format!(
                "npub payload must be 32 bytes, got {}",
                data.len()
            )));
        }
        return Ok(format!("02{}", hex::encode(data)));
    }

    match trimmed.len() {
        64 => Ok(format!("02{}", trimmed.to_ascii_lowercase())),
        66 => Ok(trimmed.to_ascii_lowercase()),
        other => Err(AppError::validation(format!(
            "pubkey must be an npub, 64 or 66 hex characters, got length {other}"
        ))),
    }
}
