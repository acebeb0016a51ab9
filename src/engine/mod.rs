// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Proof Engine
//!
//! The state machine at the heart of the service: it drives proofs through
//! UNSPENT → PENDING → SPENT across deposit, send, receive, pay and
//! reconcile operations, tolerating partial failure at the mint and
//! non-idempotent Lightning outcomes.

pub mod limits;
pub mod locks;
pub mod proofs;
pub mod pubkey;

pub use limits::{effective_cap, EffectiveLimits};
pub use locks::WalletLocks;
pub use proofs::{ProofEngine, ReconcileReport};
pub use pubkey::normalize_pubkey;
