// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Persistence
//!
//! SQLite-backed storage for wallets and proofs. The store is the only
//! persistence boundary in the process: every multi-row mutation performed
//! by one engine step runs inside a single SQLite transaction, so concurrent
//! readers never observe an intermediate proof set.

pub mod sqlite;

use thiserror::Error;

pub use sqlite::{NewWallet, ProofStatus, SqliteStore, StoredProof, WalletRecord};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
