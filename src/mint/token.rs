// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cashu token encode/decode.
//!
//! Two serializations are in the wild: V3 (`cashuA` + base64 JSON) and V4
//! (`cashuB` + base64 CBOR). This service emits V3 and accepts both.
//! NUT-18 payment requests (`creqA` + base64 CBOR) are decoded only;
//! executing them is out of scope.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use super::types::{MintError, Proof};

const V3_PREFIX: &str = "cashuA";
const V4_PREFIX: &str = "cashuB";
const PAYMENT_REQUEST_PREFIX: &str = "creqA";

/// A decoded token, normalized across serializations.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedToken {
    pub mint: String,
    pub unit: Option<String>,
    pub memo: Option<String>,
    pub proofs: Vec<Proof>,
}

impl DecodedToken {
    pub fn total(&self) -> u64 {
        Proof::total(&self.proofs)
    }
}

// ── V3 (JSON) ──

#[derive(Debug, Serialize, Deserialize)]
struct TokenV3 {
    token: Vec<TokenV3Entry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memo: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenV3Entry {
    mint: String,
    proofs: Vec<Proof>,
}

// ── V4 (CBOR) ──

#[derive(Debug, Deserialize)]
struct TokenV4 {
    /// Mint URL.
    m: String,
    /// Unit.
    u: String,
    /// Memo.
    #[serde(default)]
    d: Option<String>,
    /// Proofs grouped by keyset.
    t: Vec<TokenV4Entry>,
}

#[derive(Debug, Deserialize)]
struct TokenV4Entry {
    /// Keyset id bytes.
    i: ByteBuf,
    /// Proofs under this keyset.
    p: Vec<TokenV4Proof>,
}

#[derive(Debug, Deserialize)]
struct TokenV4Proof {
    a: u64,
    s: String,
    c: ByteBuf,
    #[serde(default)]
    w: Option<String>,
    #[serde(default)]
    d: Option<TokenV4Dleq>,
}

#[derive(Debug, Deserialize)]
struct TokenV4Dleq {
    e: ByteBuf,
    s: ByteBuf,
    r: ByteBuf,
}

/// Encode proofs as a V3 token string.
pub fn encode_v3(
    mint: &str,
    unit: &str,
    memo: Option<String>,
    proofs: Vec<Proof>,
) -> Result<String, MintError> {
    let token = TokenV3 {
        token: vec![TokenV3Entry {
            mint: mint.to_string(),
            proofs,
        }],
        unit: Some(unit.to_string()),
        memo,
    };
    let json =
        serde_json::to_vec(&token).map_err(|e| MintError::Token(format!("serialize: {e}")))?;
    Ok(format!("{V3_PREFIX}{}", URL_SAFE_NO_PAD.encode(json)))
}

/// Decode a token of either serialization.
pub fn decode(raw: &str) -> Result<DecodedToken, MintError> {
    let trimmed = raw.trim();
    if let Some(body) = trimmed.strip_prefix(V3_PREFIX) {
        decode_v3(body)
    } else if let Some(body) = trimmed.strip_prefix(V4_PREFIX) {
        decode_v4(body)
    } else {
        Err(MintError::Token(
            "unsupported token prefix (expected cashuA or cashuB)".to_string(),
        ))
    }
}

fn decode_v3(body: &str) -> Result<DecodedToken, MintError> {
    let bytes = decode_base64(body)?;
    let parsed: TokenV3 = serde_json::from_slice(&bytes)
        .map_err(|e| MintError::Token(format!("invalid V3 token JSON: {e}")))?;

    let mint = parsed
        .token
        .first()
        .map(|entry| entry.mint.clone())
        .ok_or_else(|| MintError::Token("V3 token has no entries".to_string()))?;
    let proofs: Vec<Proof> = parsed
        .token
        .into_iter()
        .flat_map(|entry| entry.proofs)
        .collect();
    if proofs.is_empty() {
        return Err(MintError::Token("token contains no proofs".to_string()));
    }

    Ok(DecodedToken {
        mint,
        unit: parsed.unit,
        memo: parsed.memo,
        proofs,
    })
}

fn decode_v4(body: &str) -> Result<DecodedToken, MintError> {
    let bytes = decode_base64(body)?;
    let parsed: TokenV4 = ciborium::from_reader(bytes.as_slice())
        .map_err(|e| MintError::Token(format!("invalid V4 token CBOR: {e}")))?;

    let mut proofs = Vec::new();
    for entry in parsed.t {
        let keyset_id = hex::encode(entry.i.as_ref());
        for p in entry.p {
            let dleq = p.d.map(|d| {
                serde_json::json!({
                    "e": hex::encode(d.e.as_ref()),
                    "s": hex::encode(d.s.as_ref()),
                    "r": hex::encode(d.r.as_ref()),
                })
            });
            proofs.push(Proof {
                id: keyset_id.clone(),
                amount: p.a,
                secret: p.s,
                c: hex::encode(p.c.as_ref()),
                witness: p.w,
                dleq,
            });
        }
    }
    if proofs.is_empty() {
        return Err(MintError::Token("token contains no proofs".to_string()));
    }

    Ok(DecodedToken {
        mint: parsed.m,
        unit: Some(parsed.u),
        memo: parsed.d,
        proofs,
    })
}

/// Decode a NUT-18 payment request into generic JSON. Decode only; this
/// service never executes payment requests.
pub fn decode_payment_request(raw: &str) -> Result<serde_json::Value, MintError> {
    let body = raw
        .trim()
        .strip_prefix(PAYMENT_REQUEST_PREFIX)
        .ok_or_else(|| MintError::Token("unsupported payment request prefix".to_string()))?;
    let bytes = decode_base64(body)?;
    let value: ciborium::value::Value = ciborium::from_reader(bytes.as_slice())
        .map_err(|e| MintError::Token(format!("invalid payment request CBOR: {e}")))?;
    Ok(cbor_to_json(value))
}

/// Tokens circulate with every base64 alphabet and padding convention;
/// try them in order.
fn decode_base64(body: &str) -> Result<Vec<u8>, MintError> {
    let cleaned: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    URL_SAFE_NO_PAD
        .decode(&cleaned)
        .or_else(|_| URL_SAFE.decode(&cleaned))
        .or_else(|_| STANDARD.decode(&cleaned))
        .or_else(|_| STANDARD_NO_PAD.decode(&cleaned))
        .map_err(|e| MintError::Token(format!("invalid base64: {e}")))
}

fn cbor_to_json(value: ciborium::value::Value) -> serde_json::Value {
    use ciborium::value::Value as Cbor;
    use serde_json::Value as Json;

    match value {
        Cbor::Null => Json::Null,
        Cbor::Bool(b) => Json::Bool(b),
        Cbor::Integer(i) => {
            let i = i128::from(i);
            if let Ok(v) = i64::try_from(i) {
                Json::from(v)
            } else {
                Json::String(i.to_string())
            }
        }
        Cbor::Float(f) => serde_json::Number::from_f64(f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Cbor::Text(s) => Json::String(s),
        Cbor::Bytes(b) => Json::String(hex::encode(b)),
        Cbor::Array(items) => Json::Array(items.into_iter().map(cbor_to_json).collect()),
        Cbor::Map(entries) => {
            let mut map = serde_json::Map::new();
            for (key, val) in entries {
                let key = match key {
                    Cbor::Text(s) => s,
                    other => format!("{other:?}"),
                };
                map.insert(key, cbor_to_json(val));
            }
            Json::Object(map)
        }
        Cbor::Tag(_, inner) => cbor_to_json(*inner),
        _ => Json::Null,
    }
}
