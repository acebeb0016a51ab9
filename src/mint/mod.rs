// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Mint Client
//!
//! Strongly-typed wrapper over the Cashu wire protocol. The engine only sees
//! the [`MintClient`] trait; [`client::HttpMintClient`] speaks Cashu v1 REST
//! and handles blinding internally, so callers deal in plain [`types::Proof`]
//! values throughout.

pub mod client;
pub mod dhke;
pub mod token;
pub mod types;

pub use client::{HttpMintClient, MintClient};
pub use types::{MintError, MintQuote, MeltQuote, SwapOutcome};
