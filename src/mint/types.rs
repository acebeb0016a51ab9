// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cashu wire types (NUT-00 through NUT-11 subsets used by this service).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mint protocol code for "proofs already spent".
pub const CODE_PROOFS_SPENT: u32 = 11001;
/// Mint protocol code for "proofs pending".
pub const CODE_PROOFS_PENDING: u32 = 11002;

/// Mint client errors.
#[derive(Debug, Error)]
pub enum MintError {
    /// Transport failure or non-protocol HTTP error.
    #[error("mint connection failed: {0}")]
    Connection(String),

    /// The mint answered but the body was not what the protocol promises.
    #[error("mint response was invalid: {0}")]
    InvalidResponse(String),

    /// A structured mint protocol error (carries the NUT error code).
    #[error("mint rejected operation ({code}): {detail}")]
    Operation { code: u32, detail: String },

    /// Inputs do not cover the requested outputs plus fees.
    #[error("inputs do not cover the requested amount plus fees")]
    InsufficientFunds,

    /// Token encoding/decoding failure.
    #[error("invalid token: {0}")]
    Token(String),

    /// Blinding arithmetic failure.
    #[error("blinding error: {0}")]
    Crypto(String),
}

impl MintError {
    /// The protocol code, when the mint sent one.
    pub fn code(&self) -> Option<u32> {
        match self {
            MintError::Operation { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// An ecash note as it travels to and from the mint.
///
/// `witness` is a string (possibly stringified JSON, per NUT-11) and `dleq`
/// an opaque JSON object; neither is validated server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proof {
    /// Keyset id.
    pub id: String,
    /// Amount in the wallet unit.
    pub amount: u64,
    /// Secret message; the mint's double-spend key.
    pub secret: String,
    /// Unblinded signature.
    #[serde(rename = "C")]
    pub c: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dleq: Option<serde_json::Value>,
}

impl Proof {
    /// Total amount across a bundle of proofs.
    pub fn total(proofs: &[Proof]) -> u64 {
        proofs.iter().map(|p| p.amount).sum()
    }
}

/// Blinded message sent to the mint for signing (NUT-00).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlindedMessage {
    pub id: String,
    pub amount: u64,
    #[serde(rename = "B_")]
    pub b: String,
}

/// Blind signature returned by the mint (NUT-00).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlindSignature {
    pub id: String,
    pub amount: u64,
    #[serde(rename = "C_")]
    pub c: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dleq: Option<serde_json::Value>,
}

/// Mint-quote lifecycle (NUT-04).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MintQuoteState {
    Unpaid,
    Paid,
    Issued,
}

/// A commitment by the mint to issue proofs once a Lightning invoice is paid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintQuote {
    pub quote: String,
    /// The bolt11 invoice the caller pays to fund the quote.
    pub request: String,
    pub state: MintQuoteState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Melt-quote lifecycle (NUT-05).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeltQuoteState {
    Unpaid,
    Pending,
    Paid,
}

/// A commitment by the mint to pay a Lightning invoice upon receiving
/// proofs totalling `amount + fee_reserve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeltQuote {
    pub quote: String,
    pub amount: u64,
    pub fee_reserve: u64,
    pub state: MeltQuoteState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_preimage: Option<String>,
}

/// Result of a swap: the piece the wallet keeps and the piece it sends.
#[derive(Debug, Clone, Default)]
pub struct SwapOutcome {
    pub keep: Vec<Proof>,
    pub send: Vec<Proof>,
}

/// Result of a melt: the mint's final quote view plus unblinded fee change.
#[derive(Debug, Clone)]
pub struct MeltResult {
    pub quote: MeltQuote,
    pub change: Vec<Proof>,
}

/// Spending condition applied to swap send outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendLock {
    /// NUT-11 pay-to-pubkey: outputs only spendable with a signature over
    /// the given compressed pubkey.
    P2pk { pubkey: String },
}

/// Proof state as the mint reports it (NUT-07).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MintProofState {
    Unspent,
    Pending,
    Spent,
}

/// One NUT-07 check result, aligned by the caller with its input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofStateEntry {
    #[serde(rename = "Y")]
    pub y: String,
    pub state: MintProofState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness: Option<String>,
}

/// Split an amount into power-of-two note denominations, smallest first.
pub fn split_amount(amount: u64) -> Vec<u64> {
    let mut parts = Vec::new();
    for bit in 0..64 {
        let value = 1u64 << bit;
        if amount & value != 0 {
            parts.push(value);
        }
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_amount_uses_binary_decomposition() {
        assert_eq!(split_amount(0), Vec::<u64>::new());
        assert_eq!(split_amount(1), vec![1]);
        assert_eq!(split_amount(10), vec![2, 8]);
        assert_eq!(split_amount(255), vec![1, 2, 4, 8, 16, 32, 64, 128]);
        assert_eq!(split_amount(513), vec![1, 512]);
    }

    #[test]
    fn proof_serializes_with_upper_c() {
        let proof = Proof {
            id: "009a1f293253e41e".to_string(),
            amount: 2,
            secret: "EhpennC9qB3iFlW8FZ_pZw".to_string(),
            c: "02c020067db727d586bc3183aecf97fcb800c3f4cc4759f69c626c9db5d8f5b5d4"
                .to_string(),
            witness: None,
            dleq: None,
        };
        let json = serde_json::to_value(&proof).unwrap();
        assert!(json.get("C").is_some());
        assert!(json.get("witness").is_none());
    }

    #[test]
    fn proof_deserializes_cdk_fixture() {
        let raw = r#"[{"id":"DSAl9nvvyfva","amount":2,"secret":"EhpennC9qB3iFlW8FZ_pZw","C":"02c020067db727d586bc3183aecf97fcb800c3f4cc4759f69c626c9db5d8f5b5d4"},{"id":"DSAl9nvvyfva","amount":8,"secret":"TmS6Cv0YT5PU_5ATVKnukw","C":"02ac910bef28cbe5d7325415d5c263026f15f9b967a079ca9779ab6e5c2db133a7"}]"#;
        let proofs: Vec<Proof> = serde_json::from_str(raw).unwrap();
        assert_eq!(proofs[0].id, "DSAl9nvvyfva");
        assert_eq!(Proof::total(&proofs), 10);
    }

    #[test]
    fn operation_error_exposes_code() {
        let err = MintError::Operation {
            code: CODE_PROOFS_SPENT,
            detail: "Token already spent".to_string(),
        };
        assert_eq!(err.code(), Some(11001));
        assert_eq!(MintError::Connection("down".to_string()).code(), None);
    }
}
