// SPDX-License-Identifier: AGPL-3.0-or-later

//! The proof state machine.
//!
//! Every operation here follows the same discipline: load state from the
//! store, talk to the mint, persist the outcome in one transaction. The
//! mint's view is authoritative; local status only moves when the mint has
//! confirmed what happened. The one deliberate exception is the melt path,
//! where a thrown Lightning payment leaves the outcome unknown until the
//! quote re-check resolves it.
//!
//! Per-proof transitions:
//!
//! ```text
//! UNSPENT ──reserve (send/melt)──► PENDING ──payment confirmed──► SPENT
//!    │                               │  ▲
//!    │                               │  └─ unresolved: stays PENDING
//!    │                               └──reservation provably dead──► UNSPENT
//!    └──consumed by swap──► SPENT
//! ```

use std::collections::HashSet;

use tracing::{info, warn};

use crate::error::AppError;
use crate::mint::client::MintClient;
use crate::mint::token::{self, DecodedToken};
use crate::mint::types::{
    MeltQuote, MeltQuoteState, MeltResult, MintError, MintProofState, MintQuote, MintQuoteState,
    Proof, ProofStateEntry, SendLock, SwapOutcome, CODE_PROOFS_PENDING, CODE_PROOFS_SPENT,
};
use crate::store::{ProofStatus, SqliteStore};

/// Counts returned by a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
pub struct ReconcileReport {
    pub spent: usize,
    pub unspent: usize,
    pub pending: usize,
}

/// The proof lifecycle engine. Holds no state of its own; everything lives
/// in the store and at the mint.
pub struct ProofEngine<'a> {
    store: &'a SqliteStore,
    mint: &'a dyn MintClient,
}

impl<'a> ProofEngine<'a> {
    pub fn new(store: &'a SqliteStore, mint: &'a dyn MintClient) -> Self {
        Self { store, mint }
    }

    /// UNSPENT and PENDING sums for a wallet.
    pub fn balance(&self, wallet_id: i64) -> Result<(u64, u64), AppError> {
        let balance = self.store.aggregate_amount(wallet_id, ProofStatus::Unspent)?;
        let pending = self.store.aggregate_amount(wallet_id, ProofStatus::Pending)?;
        Ok((balance, pending))
    }

    /// Request a bolt11 mint quote; the caller funds it by paying `request`.
    pub async fn create_deposit_quote(&self, amount: u64) -> Result<MintQuote, AppError> {
        self.mint
            .create_mint_quote(amount)
            .await
            .map_err(|e| map_mint_error("create mint quote", e))
    }

    /// Check a deposit quote at the mint and, when it reports PAID,
    /// opportunistically issue the proofs.
    ///
    /// Issuance failure is logged but never fails the check: the mint
    /// refuses to mint twice against one quote, so the caller can simply
    /// retry and observe the mint's next answer.
    pub async fn check_deposit_quote(
        &self,
        wallet_id: i64,
        quote_id: &str,
    ) -> Result<MintQuote, AppError> {
        let quote = self
            .mint
            .check_mint_quote(quote_id)
            .await
            .map_err(|e| map_mint_error("check mint quote", e))?;

        if quote.state == MintQuoteState::Paid {
            match quote.amount {
                Some(amount) => match self.mint.mint_proofs(amount, quote_id).await {
                    Ok(proofs) => {
                        match self
                            .store
                            .insert_proofs(wallet_id, &proofs, ProofStatus::Unspent)
                        {
                            Ok(count) => {
                                info!(wallet_id, quote = %quote_id, count, "minted deposit proofs")
                            }
                            Err(error) => warn!(
                                wallet_id,
                                quote = %quote_id,
                                %error,
                                "failed to persist minted proofs"
                            ),
                        }
                    }
                    Err(error) => warn!(
                        wallet_id,
                        quote = %quote_id,
                        %error,
                        "opportunistic mint failed; the check stays successful and a retry is safe"
                    ),
                },
                None => warn!(
                    wallet_id,
                    quote = %quote_id,
                    "quote is PAID but carries no amount; skipping issuance"
                ),
            }
        }

        Ok(quote)
    }

    /// Produce a send bundle totalling `amount` (fees reserved out of the
    /// inputs so the recipient nets the full nominal amount), optionally
    /// P2PK-locked.
    pub async fn send_proofs(
        &self,
        wallet_id: i64,
        amount: u64,
        p2pk_pubkey: Option<String>,
    ) -> Result<SwapOutcome, AppError> {
        let lock = p2pk_pubkey.map(|pubkey| SendLock::P2pk { pubkey });
        self.reserve_via_swap(wallet_id, amount, true, lock).await
    }

    /// Redeem an encoded token into this wallet.
    pub async fn receive_token(
        &self,
        wallet_id: i64,
        encoded_token: &str,
    ) -> Result<Vec<Proof>, AppError> {
        let proofs = self
            .mint
            .receive(encoded_token)
            .await
            .map_err(|e| map_mint_error("receive token", e))?;
        self.store
            .insert_proofs(wallet_id, &proofs, ProofStatus::Unspent)?;
        Ok(proofs)
    }

    /// Request a melt quote for a bolt11 invoice.
    pub async fn create_melt_quote(&self, bolt11: &str) -> Result<MeltQuote, AppError> {
        self.mint
            .create_melt_quote(bolt11)
            .await
            .map_err(|e| map_mint_error("create melt quote", e))
    }

    /// Check an existing melt quote at the mint.
    pub async fn check_melt_quote(&self, quote_id: &str) -> Result<MeltQuote, AppError> {
        self.mint
            .check_melt_quote(quote_id)
            .await
            .map_err(|e| map_mint_error("check melt quote", e))
    }

    /// Pay a Lightning invoice through the mint.
    ///
    /// Phase A reserves `amount + fee_reserve` out of the wallet's UNSPENT
    /// set via a swap (the reserved piece goes PENDING). Phase B hands the
    /// reserved proofs to the mint for payment. A thrown Phase B leaves the
    /// outcome unknown; the mint's quote state then decides whether the
    /// reservation is settled, still in flight, or provably dead.
    pub async fn melt_proofs(
        &self,
        wallet_id: i64,
        quote: &MeltQuote,
    ) -> Result<MeltResult, AppError> {
        let needed = quote.amount + quote.fee_reserve;
        let outcome = self.reserve_via_swap(wallet_id, needed, false, None).await?;
        let to_send = outcome.send;
        let send_secrets: Vec<String> = to_send.iter().map(|p| p.secret.clone()).collect();

        match self.mint.melt_proofs(quote, &to_send).await {
            Ok(result) => match result.quote.state {
                MeltQuoteState::Paid => {
                    self.store
                        .update_status(wallet_id, &send_secrets, ProofStatus::Spent)?;
                    self.store
                        .insert_proofs(wallet_id, &result.change, ProofStatus::Unspent)?;
                    Ok(result)
                }
                MeltQuoteState::Pending => Err(AppError::pending(
                    "payment is in flight; check the quote later",
                )),
                MeltQuoteState::Unpaid => {
                    self.store
                        .update_status(wallet_id, &send_secrets, ProofStatus::Unspent)?;
                    Err(AppError::connection("mint reported the payment as unpaid"))
                }
            },
            Err(original) => {
                self.resolve_unknown_melt(wallet_id, quote, &send_secrets, original)
                    .await
            }
        }
    }

    /// Phase B threw: consult the mint's authoritative quote state and
    /// reclassify. This is the only place an engine failure is reinterpreted.
    async fn resolve_unknown_melt(
        &self,
        wallet_id: i64,
        quote: &MeltQuote,
        send_secrets: &[String],
        original: MintError,
    ) -> Result<MeltResult, AppError> {
        let checked = match self.mint.check_melt_quote(&quote.quote).await {
            Ok(checked) => checked,
            Err(check_error) => {
                // The re-check itself failed. Reverting now could double-pay
                // if the payment actually settled, so the reservation stays
                // PENDING for a later reconciliation pass.
                warn!(
                    wallet_id,
                    quote = %quote.quote,
                    %original,
                    %check_error,
                    "melt outcome unknown and quote re-check failed; leaving proofs pending"
                );
                return Err(AppError::connection(format!(
                    "payment outcome unknown, mint unreachable for re-check: {check_error}"
                )));
            }
        };

        match checked.state {
            MeltQuoteState::Paid => {
                self.store
                    .update_status(wallet_id, send_secrets, ProofStatus::Spent)?;
                Ok(MeltResult {
                    quote: checked,
                    change: Vec::new(),
                })
            }
            MeltQuoteState::Pending => Err(AppError::pending(
                "payment is in flight; check the quote later",
            )),
            MeltQuoteState::Unpaid => match original.code() {
                Some(CODE_PROOFS_PENDING) => {
                    self.reconcile_after_melt(wallet_id).await;
                    Err(AppError::pending(
                        "proofs are pending at the mint; check the quote later",
                    ))
                }
                Some(CODE_PROOFS_SPENT) => {
                    self.reconcile_after_melt(wallet_id).await;
                    Err(AppError::connection(
                        "reserved proofs were already spent; local state reconciled",
                    ))
                }
                _ => {
                    self.store
                        .update_status(wallet_id, send_secrets, ProofStatus::Unspent)?;
                    Err(AppError::connection(format!(
                        "payment did not happen: {original}"
                    )))
                }
            },
        }
    }

    /// Best-effort reconciliation on the melt error paths. The response
    /// contract there is fixed; a reconcile failure must not change it.
    async fn reconcile_after_melt(&self, wallet_id: i64) {
        if let Err(error) = self.reconcile_with_mint(wallet_id).await {
            warn!(wallet_id, %error, "post-melt reconciliation failed");
        }
    }

    /// Align every local PENDING proof with the mint's authoritative view.
    /// Idempotent: a second pass over the same state is a no-op.
    pub async fn reconcile_with_mint(
        &self,
        wallet_id: i64,
    ) -> Result<ReconcileReport, AppError> {
        let pending = self
            .store
            .list_proofs(wallet_id, Some(ProofStatus::Pending))?;
        if pending.is_empty() {
            return Ok(ReconcileReport {
                spent: 0,
                unspent: 0,
                pending: 0,
            });
        }

        let proofs: Vec<Proof> = pending.iter().map(|p| p.to_proof()).collect();
        let states = self
            .mint
            .check_proof_states(&proofs)
            .await
            .map_err(|e| map_mint_error("check proof states", e))?;

        let mut spent = Vec::new();
        let mut unspent = Vec::new();
        let mut still_pending = 0usize;
        for (proof, entry) in pending.iter().zip(states.iter()) {
            match entry.state {
                MintProofState::Spent => spent.push(proof.secret.clone()),
                MintProofState::Unspent => unspent.push(proof.secret.clone()),
                MintProofState::Pending => still_pending += 1,
            }
        }

        self.store
            .update_status(wallet_id, &spent, ProofStatus::Spent)?;
        self.store
            .update_status(wallet_id, &unspent, ProofStatus::Unspent)?;

        info!(
            wallet_id,
            spent = spent.len(),
            unspent = unspent.len(),
            pending = still_pending,
            "reconciled pending proofs with mint"
        );

        Ok(ReconcileReport {
            spent: spent.len(),
            unspent: unspent.len(),
            pending: still_pending,
        })
    }

    /// Decode a token and query the mint's state for its proofs. Local rows
    /// owned by `wallet_id` that the mint reports SPENT are settled; live
    /// reservations are left alone (PENDING→UNSPENT is reserved for the
    /// reconcile paths, where the reservation is provably dead).
    pub async fn check_token_state(
        &self,
        wallet_id: i64,
        token_str: &str,
    ) -> Result<(Vec<ProofStateEntry>, DecodedToken), AppError> {
        let decoded = token::decode(token_str).map_err(|e| map_mint_error("decode token", e))?;
        let states = self
            .mint
            .check_proof_states(&decoded.proofs)
            .await
            .map_err(|e| map_mint_error("check proof states", e))?;

        let spent: Vec<String> = decoded
            .proofs
            .iter()
            .zip(states.iter())
            .filter(|(_, entry)| entry.state == MintProofState::Spent)
            .map(|(proof, _)| proof.secret.clone())
            .collect();
        self.store
            .update_status(wallet_id, &spent, ProofStatus::Spent)?;

        Ok((states, decoded))
    }

    /// Shared reserve step for send and melt: load UNSPENT inputs, swap at
    /// the mint, persist the classified outcome in one transaction.
    ///
    /// The mint may return any subset of the inputs verbatim when the
    /// denomination split is trivial; those rows are status transitions,
    /// never fresh inserts (the secret is unique).
    async fn reserve_via_swap(
        &self,
        wallet_id: i64,
        amount: u64,
        include_fees: bool,
        lock: Option<SendLock>,
    ) -> Result<SwapOutcome, AppError> {
        let stored = self.store.list_proofs(wallet_id, None)?;
        let inputs: Vec<Proof> = stored.iter().map(|p| p.to_proof()).collect();
        let input_secrets: HashSet<String> =
            inputs.iter().map(|p| p.secret.clone()).collect();

        if Proof::total(&inputs) < amount {
            return Err(AppError::validation("insufficient balance"));
        }

        let outcome = self
            .mint
            .swap(amount, &inputs, include_fees, lock)
            .await
            .map_err(|e| map_mint_error("swap", e))?;

        let returned: HashSet<&str> = outcome
            .keep
            .iter()
            .chain(outcome.send.iter())
            .map(|p| p.secret.as_str())
            .collect();
        let swapped: Vec<String> = input_secrets
            .iter()
            .filter(|secret| !returned.contains(secret.as_str()))
            .cloned()
            .collect();
        let new_unspent: Vec<Proof> = outcome
            .keep
            .iter()
            .filter(|p| !input_secrets.contains(&p.secret))
            .cloned()
            .collect();
        let new_pending: Vec<Proof> = outcome
            .send
            .iter()
            .filter(|p| !input_secrets.contains(&p.secret))
            .cloned()
            .collect();
        let repending: Vec<String> = outcome
            .send
            .iter()
            .filter(|p| input_secrets.contains(&p.secret))
            .map(|p| p.secret.clone())
            .collect();

        self.store.record_swap_outcome(
            wallet_id,
            &swapped,
            &new_unspent,
            &new_pending,
            &repending,
        )?;

        Ok(outcome)
    }
}

fn map_mint_error(context: &str, err: MintError) -> AppError {
    match err {
        MintError::InsufficientFunds => {
            AppError::validation("inputs do not cover the requested amount plus fees")
        }
        MintError::Token(msg) => AppError::validation(format!("invalid token: {msg}")),
        MintError::Operation { code, detail } => AppError::connection_bad_request(format!(
            "mint rejected {context}: {detail} (code {code})"
        )),
        other => AppError::connection(format!("{context} failed: {other}")),
    }
}
