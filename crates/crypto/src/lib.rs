//! Cryptographic building blocks for zk-pass ceremonies.
//!
//! - **Challenge binding**: fixed-length WebAuthn challenges that carry a
//!   transaction hash and nonce in front of a CSPRNG suffix
//! - **Preimage proofs**: MiMC-x⁵ over BN254 and a Groth16 circuit proving
//!   knowledge of a preimage of a public hash
//!
//! Nothing here holds state or locks; every function is safe to call from
//! concurrent request handlers.

pub mod challenge;
pub mod zk;

pub use challenge::{
    derive_challenge, random_challenge, recover_intent, ChallengeError, TransactionIntent,
    CHALLENGE_LENGTH, MAX_INTENT_LENGTH, NONCE_LENGTH,
};

pub use zk::{
    Groth16PreimageVerifier, PreimageProof, PreimageProofVerifier, PreimageProver, ZkError,
    ZkResult,
};

/// Field type the preimage relation is defined over.
pub use ark_bn254::Fr;
