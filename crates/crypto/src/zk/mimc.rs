//! MiMC-x⁵ over the BN254 scalar field.
//!
//! The permutation runs [`MIMC_ROUNDS`] rounds of `m <- (m + c_i)^5` with a
//! zero key. The hash is the single-block Miyaguchi–Preneel compression
//! `MiMC(x) = E_0(x) + x`. Round constants are expanded from a fixed domain
//! tag with BLAKE3 so the native hash and the R1CS gadget agree.

use super::error::{ZkError, ZkResult};
use ark_bn254::Fr;
use ark_ff::{BigInteger, Field, PrimeField};
use std::sync::OnceLock;

/// Number of rounds; ⌈log₅(p)⌉ for the BN254 scalar modulus.
pub const MIMC_ROUNDS: usize = 110;

const CONSTANTS_DOMAIN: &[u8] = b"zkpass.mimc.bn254.v1";

/// Round constants, expanded on first use.
pub fn round_constants() -> &'static [Fr] {
    static CONSTANTS: OnceLock<Vec<Fr>> = OnceLock::new();
    CONSTANTS.get_or_init(|| {
        (0..MIMC_ROUNDS as u32)
            .map(|i| {
                let mut hasher = blake3::Hasher::new();
                hasher.update(CONSTANTS_DOMAIN);
                hasher.update(&i.to_le_bytes());
                Fr::from_be_bytes_mod_order(hasher.finalize().as_bytes())
            })
            .collect()
    })
}

/// The keyed permutation `E_0`.
pub fn mimc_permute(x: Fr) -> Fr {
    round_constants().iter().fold(x, |m, c| {
        let t = m + c;
        t.square().square() * t
    })
}

/// `MiMC(x) = E_0(x) + x`
pub fn mimc_hash(x: Fr) -> Fr {
    mimc_permute(x) + x
}

/// 32-byte big-endian encoding of a field element.
pub fn fr_to_bytes(value: &Fr) -> [u8; 32] {
    let bytes = value.into_bigint().to_bytes_be();
    let mut output = [0u8; 32];
    let offset = 32 - bytes.len();
    output[offset..].copy_from_slice(&bytes);
    output
}

/// Decode a 32-byte big-endian field element, rejecting values at or above
/// the modulus.
pub fn fr_from_bytes(bytes: &[u8]) -> ZkResult<Fr> {
    if bytes.len() != 32 {
        return Err(ZkError::InvalidInput(format!(
            "field element must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    let value = Fr::from_be_bytes_mod_order(bytes);
    if fr_to_bytes(&value) != bytes {
        return Err(ZkError::InvalidInput(
            "field element is not canonical".to_string(),
        ));
    }
    Ok(value)
}

/// Hash an arbitrary-length preimage, reduced into the field first.
pub fn mimc_hash_bytes(preimage: &[u8]) -> [u8; 32] {
    fr_to_bytes(&mimc_hash(Fr::from_be_bytes_mod_order(preimage)))
}
