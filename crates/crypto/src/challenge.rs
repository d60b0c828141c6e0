//! Transaction-bound ceremony challenges.
//!
//! A bound challenge is laid out as
//!
//! ```text
//! [ transaction hash (n bytes) | nonce (4 bytes, BE) | CSPRNG (64 - n - 4 bytes) ]
//! ```
//!
//! The random suffix is written only after the prefix region and never
//! overlaps it, so the relying party can read `(transaction hash, nonce)`
//! back out of the challenge the authenticator signed.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed challenge length in bytes.
pub const CHALLENGE_LENGTH: usize = 64;

/// Bytes reserved for the big-endian nonce.
pub const NONCE_LENGTH: usize = 4;

/// Longest transaction hash that fits in front of the nonce.
pub const MAX_INTENT_LENGTH: usize = CHALLENGE_LENGTH - NONCE_LENGTH;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("Transaction hash is {len} bytes; at most {max} fit in a challenge")]
    InvalidIntentLength { len: usize, max: usize },
}

/// A pending transaction the ceremony is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionIntent {
    pub transaction_hash: Vec<u8>,
    pub nonce: u32,
}

impl TransactionIntent {
    pub fn new(transaction_hash: impl Into<Vec<u8>>, nonce: u32) -> Self {
        Self {
            transaction_hash: transaction_hash.into(),
            nonce,
        }
    }

    /// Width of the prefix this intent occupies in a challenge.
    pub fn encoded_len(&self) -> usize {
        self.transaction_hash.len() + NONCE_LENGTH
    }
}

/// Derive a challenge carrying `transaction_hash || be32(nonce)` followed by
/// fresh randomness.
pub fn derive_challenge(
    transaction_hash: &[u8],
    nonce: u32,
) -> Result<[u8; CHALLENGE_LENGTH], ChallengeError> {
    derive_challenge_with_rng(transaction_hash, nonce, &mut OsRng)
}

/// As [`derive_challenge`], drawing the suffix from `rng`.
pub fn derive_challenge_with_rng<R: RngCore + ?Sized>(
    transaction_hash: &[u8],
    nonce: u32,
    rng: &mut R,
) -> Result<[u8; CHALLENGE_LENGTH], ChallengeError> {
    if transaction_hash.len() > MAX_INTENT_LENGTH {
        return Err(ChallengeError::InvalidIntentLength {
            len: transaction_hash.len(),
            max: MAX_INTENT_LENGTH,
        });
    }

    let prefix_len = transaction_hash.len() + NONCE_LENGTH;
    let mut challenge = [0u8; CHALLENGE_LENGTH];
    challenge[..transaction_hash.len()].copy_from_slice(transaction_hash);
    challenge[transaction_hash.len()..prefix_len].copy_from_slice(&nonce.to_be_bytes());
    rng.fill_bytes(&mut challenge[prefix_len..]);

    Ok(challenge)
}

/// Challenge for a ceremony with no transaction intent.
pub fn random_challenge() -> [u8; CHALLENGE_LENGTH] {
    let mut challenge = [0u8; CHALLENGE_LENGTH];
    OsRng.fill_bytes(&mut challenge);
    challenge
}

/// Read the bound intent back out of a challenge.
///
/// `hash_len` is the transaction-hash length recorded when the challenge was
/// issued. Returns `None` if the challenge has the wrong size or the length
/// cannot have been produced by [`derive_challenge`].
pub fn recover_intent(challenge: &[u8], hash_len: usize) -> Option<TransactionIntent> {
    if challenge.len() != CHALLENGE_LENGTH || hash_len > MAX_INTENT_LENGTH {
        return None;
    }

    let mut nonce = [0u8; NONCE_LENGTH];
    nonce.copy_from_slice(&challenge[hash_len..hash_len + NONCE_LENGTH]);

    Some(TransactionIntent {
        transaction_hash: challenge[..hash_len].to_vec(),
        nonce: u32::from_be_bytes(nonce),
    })
}
