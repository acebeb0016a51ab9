// SPDX-License-Identifier: AGPL-3.0-or-later

//! Blind Diffie-Hellman key exchange (NUT-00).
//!
//! The mint signs blinded points without learning the underlying secret:
//! `B_ = Y + rG` goes out, `C_ = kB_` comes back, and `C = C_ - rK`
//! recovers the signature over `Y = hash_to_curve(secret)`.

use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use super::types::MintError;

const DOMAIN_SEPARATOR: &[u8] = b"Secp256k1_HashToCurve_Cashu_";

/// Deterministically map a message onto a curve point (NUT-00).
///
/// `sha256(DOMAIN || msg)` seeds a counter search; the first counter whose
/// `sha256(seed || counter_le)` forms a valid x coordinate (with even y)
/// wins. The search space is bounded at 2^16 per NUT-00.
pub fn hash_to_curve(message: &[u8]) -> Result<PublicKey, MintError> {
    let msg_hash = Sha256::digest([DOMAIN_SEPARATOR, message].concat());

    for counter in 0u32..65536 {
        let hash = Sha256::digest([msg_hash.as_slice(), &counter.to_le_bytes()].concat());
        let mut candidate = [0u8; 33];
        candidate[0] = 0x02;
        candidate[1..].copy_from_slice(&hash);
        if let Ok(point) = PublicKey::from_slice(&candidate) {
            return Ok(point);
        }
    }

    Err(MintError::Crypto(
        "no valid curve point within 2^16 iterations".to_string(),
    ))
}

/// Blind a secret message: returns `B_ = hash_to_curve(secret) + rG`
/// together with the blinding factor `r`.
pub fn blind_message(
    secret: &[u8],
    blinding_factor: Option<SecretKey>,
) -> Result<(PublicKey, SecretKey), MintError> {
    let secp = Secp256k1::new();
    let y = hash_to_curve(secret)?;
    let r = blinding_factor.unwrap_or_else(|| SecretKey::new(&mut rand::thread_rng()));
    let r_g = PublicKey::from_secret_key(&secp, &r);
    let blinded = y
        .combine(&r_g)
        .map_err(|e| MintError::Crypto(format!("point addition failed: {e}")))?;
    Ok((blinded, r))
}

/// Unblind a mint signature: `C = C_ - rK` where `K` is the mint's public
/// key for the note's amount.
pub fn unblind_signature(
    blinded_signature: &PublicKey,
    blinding_factor: &SecretKey,
    mint_pubkey: &PublicKey,
) -> Result<PublicKey, MintError> {
    let secp = Secp256k1::new();
    let r_k = mint_pubkey
        .mul_tweak(&secp, &Scalar::from(*blinding_factor))
        .map_err(|e| MintError::Crypto(format!("scalar multiplication failed: {e}")))?;
    blinded_signature
        .combine(&r_k.negate(&secp))
        .map_err(|e| MintError::Crypto(format!("point subtraction failed: {e}")))
}
