// SPDX-License-Identifier: AGPL-3.0-or-later

//! Effective per-wallet caps.
//!
//! A wallet may carry its own `max_balance` / `max_send` / `max_pay`; the
//! effective cap is the tighter of the wallet's value and the global
//! default. A wallet cap can only restrict, never widen.

use serde::Serialize;
use utoipa::ToSchema;

use crate::config::Config;
use crate::store::WalletRecord;

/// Resolve one cap: `min(wallet_cap, global_default)` when set,
/// else the global default.
pub fn effective_cap(wallet_cap: Option<u64>, global_default: u64) -> u64 {
    match wallet_cap {
        Some(cap) => cap.min(global_default),
        None => global_default,
    }
}

/// The three caps applied to a wallet's operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct EffectiveLimits {
    /// Cap on the post-operation balance (deposit + receive).
    pub max_balance: u64,
    /// Cap on a single send amount.
    pub max_send: u64,
    /// Cap on a single payment amount.
    pub max_pay: u64,
}

impl EffectiveLimits {
    pub fn for_wallet(wallet: &WalletRecord, config: &Config) -> Self {
        Self {
            max_balance: effective_cap(wallet.max_balance, config.max_balance),
            max_send: effective_cap(wallet.max_send, config.max_send),
            max_pay: effective_cap(wallet.max_pay, config.max_pay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_wallet_cap_uses_global() {
        assert_eq!(effective_cap(None, 50_000), 50_000);
    }

    #[test]
    fn wallet_cap_tightens_but_never_widens() {
        assert_eq!(effective_cap(Some(10_000), 50_000), 10_000);
        assert_eq!(effective_cap(Some(80_000), 50_000), 50_000);
        assert_eq!(effective_cap(Some(0), 50_000), 0);
    }

    #[test]
    fn limits_resolve_per_wallet() {
        let config = Config::for_tests();
        let mut wallet = WalletRecord {
            id: 1,
            access_key: "k".to_string(),
            name: None,
            mint_url: config.mint_url.clone(),
            unit: "sat".to_string(),
            max_balance: Some(1_000),
            max_send: None,
            max_pay: Some(999_999),
            created_at: chrono::Utc::now(),
            updated_at: None,
        };

        let limits = EffectiveLimits::for_wallet(&wallet, &config);
        assert_eq!(limits.max_balance, 1_000);
        assert_eq!(limits.max_send, config.max_send);
        assert_eq!(limits.max_pay, config.max_pay);

        wallet.max_balance = None;
        let limits = EffectiveLimits::for_wallet(&wallet, &config);
        assert_eq!(limits.max_balance, config.max_balance);
    }
}
