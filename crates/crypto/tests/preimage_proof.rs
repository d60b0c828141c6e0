//! End-to-end checks of the preimage relation through the public API.

use rand::rngs::StdRng;
use rand::SeedableRng;
use zkpass_crypto::zk::{
    fr_to_bytes, mimc_hash, proving_key_to_bytes, setup, verifying_key_to_bytes,
};
use zkpass_crypto::{
    derive_challenge, recover_intent, Fr, Groth16PreimageVerifier, PreimageProofVerifier,
    PreimageProver, ZkError,
};

#[test]
fn test_proof_for_42_binds_to_its_hash_only() {
    let mut rng = StdRng::seed_from_u64(42);
    let (pk, vk) = setup(&mut rng).unwrap();
    let prover = PreimageProver::new(pk);
    let verifier = Groth16PreimageVerifier::new(&vk).unwrap();

    let h = fr_to_bytes(&mimc_hash(Fr::from(42u64)));
    let proof = prover.prove(Fr::from(42u64), &mut rng).unwrap();
    assert_eq!(proof.public_hash, h);
    verifier.verify(&h, &proof).unwrap();

    for other in [0u64, 41, 43, 1_000_000] {
        let h_other = fr_to_bytes(&mimc_hash(Fr::from(other)));
        assert!(matches!(
            verifier.verify(&h_other, &proof),
            Err(ZkError::InvalidProof(_))
        ));
    }
}

#[test]
fn test_keys_survive_serialization() {
    let mut rng = StdRng::seed_from_u64(7);
    let (pk, vk) = setup(&mut rng).unwrap();

    let prover = PreimageProver::from_bytes(&proving_key_to_bytes(&pk).unwrap()).unwrap();
    let verifier =
        Groth16PreimageVerifier::from_bytes(&verifying_key_to_bytes(&vk).unwrap()).unwrap();

    let proof = prover.prove(Fr::from(9u64), &mut rng).unwrap();
    verifier.verify(&proof.public_hash, &proof).unwrap();
}

#[test]
fn test_challenge_carries_public_hash() {
    let h = fr_to_bytes(&mimc_hash(Fr::from(42u64)));
    let challenge = derive_challenge(&h, 3).unwrap();

    let intent = recover_intent(&challenge, h.len()).unwrap();
    assert_eq!(intent.transaction_hash, h.to_vec());
    assert_eq!(intent.nonce, 3);
}
