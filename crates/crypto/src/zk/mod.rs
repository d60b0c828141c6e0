//! Zero-knowledge proof of MiMC preimage knowledge.
//!
//! Groth16 over BN254 via arkworks. The relation is `MiMC(x) = h` with `x`
//! private and `h` public; see [`circuit`].

pub mod circuit;
pub mod error;
pub mod mimc;
pub mod prover;
pub mod verifier;

#[cfg(test)]
mod testing;

pub use circuit::PreimageCircuit;
pub use error::{ZkError, ZkResult};
pub use mimc::{fr_from_bytes, fr_to_bytes, mimc_hash, mimc_hash_bytes, MIMC_ROUNDS};
pub use prover::{
    decode_proof, encode_proof, proving_key_to_bytes, setup, verifying_key_from_bytes,
    verifying_key_to_bytes, PreimageProof, PreimageProver, GROTH16_PROOF_SIZE,
    PROOF_FORMAT_VERSION, PROOF_SCHEME_GROTH16_BN254,
};
pub use verifier::{Groth16PreimageVerifier, PreimageProofVerifier};
