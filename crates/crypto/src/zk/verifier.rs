//! Preimage proof verification.

use super::error::{ZkError, ZkResult};
use super::mimc::fr_from_bytes;
use super::prover::{decode_proof, read_key_file, verifying_key_from_bytes, PreimageProof};
use ark_bn254::Bn254;
use ark_groth16::{Groth16, PreparedVerifyingKey, VerifyingKey};
use ark_snark::SNARK;
use std::path::Path;
use tracing::debug;

/// Checks that a prover knows `x` with `MiMC(x) = public_hash`.
///
/// Implementations are pure and blocking; async callers should move the
/// call onto a blocking thread.
pub trait PreimageProofVerifier: Send + Sync {
    fn verify(&self, public_hash: &[u8; 32], proof: &PreimageProof) -> ZkResult<()>;
}

/// Groth16/BN254 verifier with a prepared verifying key.
pub struct Groth16PreimageVerifier {
    pvk: PreparedVerifyingKey<Bn254>,
}

impl Groth16PreimageVerifier {
    pub fn new(vk: &VerifyingKey<Bn254>) -> ZkResult<Self> {
        let pvk = Groth16::<Bn254>::process_vk(vk)
            .map_err(|e| ZkError::KeyDecoding(format!("verifying key: {}", e)))?;
        Ok(Self { pvk })
    }

    pub fn from_bytes(bytes: &[u8]) -> ZkResult<Self> {
        Self::new(&verifying_key_from_bytes(bytes)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ZkResult<Self> {
        Self::from_bytes(&read_key_file(path.as_ref())?)
    }
}

impl PreimageProofVerifier for Groth16PreimageVerifier {
    fn verify(&self, public_hash: &[u8; 32], proof: &PreimageProof) -> ZkResult<()> {
        let h = fr_from_bytes(public_hash)
            .map_err(|e| ZkError::InvalidProof(format!("public hash: {}", e)))?;
        let groth16_proof = decode_proof(&proof.proof)?;

        let valid = Groth16::<Bn254>::verify_with_processed_vk(&self.pvk, &[h], &groth16_proof)
            .map_err(|e| ZkError::InvalidProof(e.to_string()))?;

        if !valid {
            debug!(hash = %hex::encode(&public_hash[..6]), "Preimage proof rejected");
            return Err(ZkError::InvalidProof("pairing check failed".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zk::mimc::{fr_to_bytes, mimc_hash};
    use crate::zk::prover::PreimageProver;
    use crate::zk::testing::{rng, test_keys};
    use ark_bn254::Fr;

    fn verifier() -> Groth16PreimageVerifier {
        Groth16PreimageVerifier::new(&test_keys().1).unwrap()
    }

    #[test]
    fn test_valid_proof_verifies() {
        let proof = PreimageProver::new(test_keys().0.clone())
            .prove(Fr::from(42u64), &mut rng())
            .unwrap();

        assert_eq!(proof.public_hash, fr_to_bytes(&mimc_hash(Fr::from(42u64))));
        verifier().verify(&proof.public_hash, &proof).unwrap();
    }

    #[test]
    fn test_proof_rejected_for_other_hash() {
        let proof = PreimageProver::new(test_keys().0.clone())
            .prove(Fr::from(42u64), &mut rng())
            .unwrap();
        let other = fr_to_bytes(&mimc_hash(Fr::from(43u64)));

        let result = verifier().verify(&other, &proof);
        assert!(matches!(result, Err(ZkError::InvalidProof(_))));
    }

    #[test]
    fn test_non_canonical_hash_rejected() {
        let proof = PreimageProver::new(test_keys().0.clone())
            .prove(Fr::from(42u64), &mut rng())
            .unwrap();

        let result = verifier().verify(&[0xFF; 32], &proof);
        assert!(matches!(result, Err(ZkError::InvalidProof(_))));
    }

    #[test]
    fn test_garbage_blob_rejected() {
        let proof = PreimageProof {
            public_hash: fr_to_bytes(&mimc_hash(Fr::from(1u64))),
            proof: vec![0x01, 0x01, 0xAB],
        };
        assert!(matches!(
            verifier().verify(&proof.public_hash, &proof),
            Err(ZkError::InvalidProof(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("preimage.vk");
        std::fs::write(
            &path,
            crate::zk::prover::verifying_key_to_bytes(&test_keys().1).unwrap(),
        )
        .unwrap();

        assert!(Groth16PreimageVerifier::from_file(&path).is_ok());
        assert!(matches!(
            Groth16PreimageVerifier::from_file(dir.path().join("missing.vk")),
            Err(ZkError::KeyNotFound(_))
        ));
    }
}
