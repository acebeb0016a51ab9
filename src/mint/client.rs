// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP client for the Cashu v1 REST protocol.
//!
//! [`HttpMintClient`] owns the blinding bookkeeping: callers hand in plain
//! proofs and amounts, the client premints blinded outputs, posts them, and
//! unblinds the returned signatures against the mint's keyset. The active
//! keyset (and its `input_fee_ppk`) is discovered lazily on first use and
//! cached for the life of the client.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rand::RngCore;
use secp256k1::{PublicKey, SecretKey};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use super::dhke::{blind_message, hash_to_curve, unblind_signature};
use super::token;
use super::types::{
    BlindSignature, BlindedMessage, MeltQuote, MeltQuoteState, MeltResult, MintError, MintQuote,
    Proof, ProofStateEntry, SendLock, SwapOutcome, split_amount,
};

/// The Cashu operations the proof engine depends on.
#[async_trait]
pub trait MintClient: Send + Sync {
    /// Request a bolt11 mint quote for `amount`.
    async fn create_mint_quote(&self, amount: u64) -> Result<MintQuote, MintError>;

    /// Look up an existing mint quote.
    async fn check_mint_quote(&self, quote_id: &str) -> Result<MintQuote, MintError>;

    /// Issue proofs against a PAID mint quote.
    async fn mint_proofs(&self, amount: u64, quote_id: &str) -> Result<Vec<Proof>, MintError>;

    /// Swap `inputs` into a `{keep, send}` split where the send bundle
    /// totals `amount`. With `include_fees` the sender reserves the
    /// recipient's redemption fee so the full nominal amount arrives.
    async fn swap(
        &self,
        amount: u64,
        inputs: &[Proof],
        include_fees: bool,
        lock: Option<SendLock>,
    ) -> Result<SwapOutcome, MintError>;

    /// Redeem an encoded token into fresh proofs via a swap at the mint.
    async fn receive(&self, token: &str) -> Result<Vec<Proof>, MintError>;

    /// Request a bolt11 melt quote.
    async fn create_melt_quote(&self, bolt11: &str) -> Result<MeltQuote, MintError>;

    /// Look up an existing melt quote.
    async fn check_melt_quote(&self, quote_id: &str) -> Result<MeltQuote, MintError>;

    /// Pay the melt quote's invoice with `inputs`; returns the mint's final
    /// quote view plus unblinded fee change.
    async fn melt_proofs(
        &self,
        quote: &MeltQuote,
        inputs: &[Proof],
    ) -> Result<MeltResult, MintError>;

    /// Query the mint's authoritative state for each proof, aligned with
    /// the input order.
    async fn check_proof_states(
        &self,
        proofs: &[Proof],
    ) -> Result<Vec<ProofStateEntry>, MintError>;
}

/// Active keyset snapshot: id, per-input fee, and amount → mint pubkey map.
#[derive(Debug, Clone)]
struct ActiveKeyset {
    id: String,
    input_fee_ppk: u64,
    keys: BTreeMap<u64, String>,
}

/// One premint: the secret, its blinding factor and the blinded message.
struct Premint {
    secret: String,
    r: SecretKey,
    blinded: BlindedMessage,
}

/// Cashu-over-HTTP client.
pub struct HttpMintClient {
    base_url: String,
    unit: String,
    http: reqwest::Client,
    keyset: RwLock<Option<ActiveKeyset>>,
}

// Wire shapes for keyset discovery.
#[derive(Debug, Deserialize)]
struct KeysetsResponse {
    keysets: Vec<KeysetInfo>,
}

#[derive(Debug, Deserialize)]
struct KeysetInfo {
    id: String,
    unit: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    input_fee_ppk: u64,
}

#[derive(Debug, Deserialize)]
struct KeysResponse {
    keysets: Vec<KeysEntry>,
}

#[derive(Debug, Deserialize)]
struct KeysEntry {
    id: String,
    #[allow(dead_code)]
    unit: String,
    keys: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SignaturesResponse {
    signatures: Vec<BlindSignature>,
}

#[derive(Debug, Deserialize)]
struct MeltResponse {
    #[serde(default)]
    quote: Option<String>,
    #[serde(default)]
    amount: Option<u64>,
    #[serde(default)]
    fee_reserve: Option<u64>,
    state: MeltQuoteState,
    #[serde(default)]
    expiry: Option<u64>,
    #[serde(default)]
    payment_preimage: Option<String>,
    #[serde(default)]
    change: Option<Vec<BlindSignature>>,
}

#[derive(Debug, Deserialize)]
struct CheckStateResponse {
    states: Vec<ProofStateEntry>,
}

#[derive(Debug, Deserialize)]
struct MintErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    code: Option<u32>,
}

impl HttpMintClient {
    pub fn new(base_url: &str, unit: &str) -> Result<Self, MintError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| MintError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            unit: unit.to_string(),
            http,
            keyset: RwLock::new(None),
        })
    }

    /// The mint URL this client is bound to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn active_keyset(&self) -> Result<ActiveKeyset, MintError> {
        if let Some(keyset) = self.keyset.read().await.as_ref() {
            return Ok(keyset.clone());
        }

        let keysets: KeysetsResponse = self.get_json("/v1/keysets").await?;
        let info = keysets
            .keysets
            .into_iter()
            .find(|k| k.active && k.unit == self.unit)
            .ok_or_else(|| {
                MintError::InvalidResponse(format!("no active {} keyset", self.unit))
            })?;

        let keys: KeysResponse = self.get_json(&format!("/v1/keys/{}", info.id)).await?;
        let entry = keys
            .keysets
            .into_iter()
            .find(|k| k.id == info.id)
            .ok_or_else(|| {
                MintError::InvalidResponse(format!("mint did not return keys for {}", info.id))
            })?;

        let mut key_map = BTreeMap::new();
        for (amount, pubkey) in entry.keys {
            let amount: u64 = amount.parse().map_err(|_| {
                MintError::InvalidResponse(format!("non-numeric key amount {amount}"))
            })?;
            key_map.insert(amount, pubkey);
        }

        let keyset = ActiveKeyset {
            id: info.id,
            input_fee_ppk: info.input_fee_ppk,
            keys: key_map,
        };
        *self.keyset.write().await = Some(keyset.clone());
        Ok(keyset)
    }

    /// Premint blinded messages for the given denominations.
    fn premint(
        keyset_id: &str,
        amounts: &[u64],
        lock: Option<&SendLock>,
    ) -> Result<Vec<Premint>, MintError> {
        let mut premints = Vec::with_capacity(amounts.len());
        for &amount in amounts {
            let secret = match lock {
                Some(SendLock::P2pk { pubkey }) => p2pk_secret(pubkey),
                None => random_secret(),
            };
            let (blinded, r) = blind_message(secret.as_bytes(), None)?;
            premints.push(Premint {
                secret,
                r,
                blinded: BlindedMessage {
                    id: keyset_id.to_string(),
                    amount,
                    b: hex::encode(blinded.serialize()),
                },
            });
        }
        Ok(premints)
    }

    /// Unblind a batch of signatures against their premints. Amounts come
    /// from the signatures: NUT-08 change signatures carry amounts the
    /// premint did not know.
    fn construct_proofs(
        signatures: &[BlindSignature],
        premints: &[Premint],
        keyset: &ActiveKeyset,
    ) -> Result<Vec<Proof>, MintError> {
        if signatures.len() > premints.len() {
            return Err(MintError::InvalidResponse(format!(
                "mint returned {} signatures for {} outputs",
                signatures.len(),
                premints.len()
            )));
        }

        let mut proofs = Vec::with_capacity(signatures.len());
        for (sig, pre) in signatures.iter().zip(premints.iter()) {
            let mint_key = keyset.keys.get(&sig.amount).ok_or_else(|| {
                MintError::InvalidResponse(format!("mint has no key for amount {}", sig.amount))
            })?;
            let mint_key: PublicKey = mint_key
                .parse()
                .map_err(|_| MintError::InvalidResponse("malformed mint pubkey".to_string()))?;
            let blinded_sig: PublicKey = sig
                .c
                .parse()
                .map_err(|_| MintError::InvalidResponse("malformed blind signature".to_string()))?;

            let c = unblind_signature(&blinded_sig, &pre.r, &mint_key)?;
            proofs.push(Proof {
                id: sig.id.clone(),
                amount: sig.amount,
                secret: pre.secret.clone(),
                c: hex::encode(c.serialize()),
                witness: None,
                dleq: None,
            });
        }
        Ok(proofs)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, MintError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(|e| MintError::Connection(format!("GET {path} failed: {e}")))?;
        Self::parse_response(response, path).await
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, MintError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| MintError::Connection(format!("POST {path} failed: {e}")))?;
        Self::parse_response(response, path).await
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        path: &str,
    ) -> Result<T, MintError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| MintError::InvalidResponse(format!("{path}: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        if let Ok(parsed) = serde_json::from_str::<MintErrorBody>(&body) {
            if let Some(code) = parsed.code {
                return Err(MintError::Operation {
                    code,
                    detail: parsed.detail.unwrap_or_else(|| body.clone()),
                });
            }
        }
        Err(MintError::Connection(format!(
            "{path} returned {status}: {body}"
        )))
    }
}

#[async_trait]
impl MintClient for HttpMintClient {
    async fn create_mint_quote(&self, amount: u64) -> Result<MintQuote, MintError> {
        self.post_json(
            "/v1/mint/quote/bolt11",
            &json!({ "amount": amount, "unit": self.unit }),
        )
        .await
    }

    async fn check_mint_quote(&self, quote_id: &str) -> Result<MintQuote, MintError> {
        self.get_json(&format!("/v1/mint/quote/bolt11/{quote_id}")).await
    }

    async fn mint_proofs(&self, amount: u64, quote_id: &str) -> Result<Vec<Proof>, MintError> {
        let keyset = self.active_keyset().await?;
        let premints = Self::premint(&keyset.id, &split_amount(amount), None)?;
        let outputs: Vec<&BlindedMessage> = premints.iter().map(|p| &p.blinded).collect();

        let response: SignaturesResponse = self
            .post_json(
                "/v1/mint/bolt11",
                &json!({ "quote": quote_id, "outputs": outputs }),
            )
            .await?;
        Self::construct_proofs(&response.signatures, &premints, &keyset)
    }

    async fn swap(
        &self,
        amount: u64,
        inputs: &[Proof],
        include_fees: bool,
        lock: Option<SendLock>,
    ) -> Result<SwapOutcome, MintError> {
        let keyset = self.active_keyset().await?;
        let input_total = Proof::total(inputs);
        let swap_fee = input_fee(inputs.len(), keyset.input_fee_ppk);

        let send_amounts = plan_send_amounts(amount, keyset.input_fee_ppk, include_fees);
        let send_total: u64 = send_amounts.iter().sum();
        let keep_total = input_total
            .checked_sub(send_total)
            .and_then(|rest| rest.checked_sub(swap_fee))
            .ok_or(MintError::InsufficientFunds)?;
        let keep_amounts = split_amount(keep_total);

        let keep_premints = Self::premint(&keyset.id, &keep_amounts, None)?;
        let send_premints = Self::premint(&keyset.id, &send_amounts, lock.as_ref())?;

        let outputs: Vec<&BlindedMessage> = keep_premints
            .iter()
            .chain(send_premints.iter())
            .map(|p| &p.blinded)
            .collect();
        let response: SignaturesResponse = self
            .post_json("/v1/swap", &json!({ "inputs": inputs, "outputs": outputs }))
            .await?;

        if response.signatures.len() != keep_premints.len() + send_premints.len() {
            return Err(MintError::InvalidResponse(format!(
                "swap returned {} signatures for {} outputs",
                response.signatures.len(),
                keep_premints.len() + send_premints.len()
            )));
        }
        let (keep_sigs, send_sigs) = response.signatures.split_at(keep_premints.len());

        Ok(SwapOutcome {
            keep: Self::construct_proofs(keep_sigs, &keep_premints, &keyset)?,
            send: Self::construct_proofs(send_sigs, &send_premints, &keyset)?,
        })
    }

    async fn receive(&self, token: &str) -> Result<Vec<Proof>, MintError> {
        let decoded = token::decode(token)?;
        if normalize_mint_url(&decoded.mint) != normalize_mint_url(&self.base_url) {
            return Err(MintError::Token(format!(
                "token is from another mint: {}",
                decoded.mint
            )));
        }

        let keyset = self.active_keyset().await?;
        let fee = input_fee(decoded.proofs.len(), keyset.input_fee_ppk);
        let out_total = decoded
            .total()
            .checked_sub(fee)
            .ok_or(MintError::InsufficientFunds)?;

        let premints = Self::premint(&keyset.id, &split_amount(out_total), None)?;
        let outputs: Vec<&BlindedMessage> = premints.iter().map(|p| &p.blinded).collect();
        let response: SignaturesResponse = self
            .post_json(
                "/v1/swap",
                &json!({ "inputs": decoded.proofs, "outputs": outputs }),
            )
            .await?;
        Self::construct_proofs(&response.signatures, &premints, &keyset)
    }

    async fn create_melt_quote(&self, bolt11: &str) -> Result<MeltQuote, MintError> {
        self.post_json(
            "/v1/melt/quote/bolt11",
            &json!({ "request": bolt11, "unit": self.unit }),
        )
        .await
    }

    async fn check_melt_quote(&self, quote_id: &str) -> Result<MeltQuote, MintError> {
        self.get_json(&format!("/v1/melt/quote/bolt11/{quote_id}")).await
    }

    async fn melt_proofs(
        &self,
        quote: &MeltQuote,
        inputs: &[Proof],
    ) -> Result<MeltResult, MintError> {
        let keyset = self.active_keyset().await?;

        // NUT-08 blank outputs for Lightning fee change.
        let blank_count = blank_output_count(quote.fee_reserve);
        let blank_amounts = vec![1u64; blank_count];
        let premints = Self::premint(&keyset.id, &blank_amounts, None)?;
        let outputs: Vec<&BlindedMessage> = premints.iter().map(|p| &p.blinded).collect();

        let response: MeltResponse = self
            .post_json(
                "/v1/melt/bolt11",
                &json!({ "quote": quote.quote, "inputs": inputs, "outputs": outputs }),
            )
            .await?;

        let change = match &response.change {
            Some(signatures) => Self::construct_proofs(signatures, &premints, &keyset)?,
            None => Vec::new(),
        };

        Ok(MeltResult {
            quote: MeltQuote {
                quote: response.quote.unwrap_or_else(|| quote.quote.clone()),
                amount: response.amount.unwrap_or(quote.amount),
                fee_reserve: response.fee_reserve.unwrap_or(quote.fee_reserve),
                state: response.state,
                expiry: response.expiry.or(quote.expiry),
                payment_preimage: response.payment_preimage,
            },
            change,
        })
    }

    async fn check_proof_states(
        &self,
        proofs: &[Proof],
    ) -> Result<Vec<ProofStateEntry>, MintError> {
        let mut ys = Vec::with_capacity(proofs.len());
        for proof in proofs {
            let y = hash_to_curve(proof.secret.as_bytes())?;
            ys.push(hex::encode(y.serialize()));
        }

        let response: CheckStateResponse =
            self.post_json("/v1/checkstate", &json!({ "Ys": ys })).await?;
        if response.states.len() != proofs.len() {
            return Err(MintError::InvalidResponse(format!(
                "checkstate returned {} states for {} proofs",
                response.states.len(),
                proofs.len()
            )));
        }
        Ok(response.states)
    }
}

/// 32 random bytes, hex-encoded: the standard Cashu secret format.
fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// NUT-10 well-known secret for a P2PK lock.
fn p2pk_secret(pubkey: &str) -> String {
    let mut nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce);
    json!(["P2PK", { "nonce": hex::encode(nonce), "data": pubkey }]).to_string()
}

/// Mint fee for consuming `count` inputs: per-input parts-per-thousand,
/// summed and rounded up.
fn input_fee(count: usize, fee_ppk: u64) -> u64 {
    (count as u64 * fee_ppk).div_ceil(1000)
}

/// Denominations for the send bundle. With `include_fees` the bundle is
/// padded so the recipient still nets the nominal amount after redeeming;
/// padding changes the note count, so iterate to a fixed point.
fn plan_send_amounts(amount: u64, fee_ppk: u64, include_fees: bool) -> Vec<u64> {
    if !include_fees || fee_ppk == 0 {
        return split_amount(amount);
    }

    let mut fee = 0u64;
    loop {
        let amounts = split_amount(amount + fee);
        let next_fee = input_fee(amounts.len(), fee_ppk);
        if next_fee <= fee {
            return amounts;
        }
        fee = next_fee;
    }
}

/// NUT-08: enough blank outputs to return any overpaid fee,
/// `max(ceil(log2(fee_reserve)), 1)`.
fn blank_output_count(fee_reserve: u64) -> usize {
    if fee_reserve == 0 {
        return 0;
    }
    let bits = 64 - (fee_reserve - 1).leading_zeros() as usize;
    bits.max(1)
}

fn normalize_mint_url(url: &str) -> String {
    url.trim_end_matches('/').to_ascii_lowercase()
}
