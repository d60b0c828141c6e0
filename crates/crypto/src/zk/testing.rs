//! Shared Groth16 keys for unit tests; setup runs once per test binary.

use ark_bn254::Bn254;
use ark_groth16::{ProvingKey, VerifyingKey};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::OnceLock;

pub(crate) fn rng() -> StdRng {
    StdRng::seed_from_u64(0x5EED)
}

pub(crate) fn test_keys() -> &'static (ProvingKey<Bn254>, VerifyingKey<Bn254>) {
    static KEYS: OnceLock<(ProvingKey<Bn254>, VerifyingKey<Bn254>)> = OnceLock::new();
    KEYS.get_or_init(|| super::prover::setup(&mut rng()).unwrap())
}
