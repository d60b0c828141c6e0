//! Groth16 setup, proving and the versioned proof encoding.
//!
//! Proof blobs on the wire are
//!
//! ```text
//! [version 0x01][scheme 0x01 = groth16-bn254][compressed Groth16 proof, 128 bytes]
//! ```
//!
//! Keys are stored with `ark-serialize`'s compressed encoding.

use super::circuit::PreimageCircuit;
use super::error::{ZkError, ZkResult};
use super::mimc::{fr_to_bytes, mimc_hash};
use ark_bn254::{Bn254, Fr};
use ark_groth16::{Groth16, Proof, ProvingKey, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Encoding version byte.
pub const PROOF_FORMAT_VERSION: u8 = 0x01;

/// Scheme byte for Groth16 over BN254.
pub const PROOF_SCHEME_GROTH16_BN254: u8 = 0x01;

/// Compressed Groth16 proof size on BN254 (G1 + G2 + G1).
pub const GROTH16_PROOF_SIZE: usize = 128;

const HEADER_LEN: usize = 2;

/// A public hash commitment and the proof that its preimage is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreimageProof {
    /// `h`, 32-byte big-endian field element
    pub public_hash: [u8; 32],
    /// Versioned proof blob
    pub proof: Vec<u8>,
}

/// Wrap a Groth16 proof in the versioned wire format.
pub fn encode_proof(proof: &Proof<Bn254>) -> ZkResult<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_LEN + GROTH16_PROOF_SIZE);
    out.push(PROOF_FORMAT_VERSION);
    out.push(PROOF_SCHEME_GROTH16_BN254);
    proof
        .serialize_compressed(&mut out)
        .map_err(|e| ZkError::ProofGenerationFailed(e.to_string()))?;
    Ok(out)
}

/// Parse a versioned proof blob. Unknown versions or schemes, truncation and
/// trailing bytes are all `InvalidProof`.
pub fn decode_proof(bytes: &[u8]) -> ZkResult<Proof<Bn254>> {
    let (header, body) = match bytes {
        [version, scheme, body @ ..] => ((*version, *scheme), body),
        _ => return Err(ZkError::InvalidProof("proof blob truncated".to_string())),
    };

    if header.0 != PROOF_FORMAT_VERSION {
        return Err(ZkError::InvalidProof(format!(
            "unsupported proof version {:#04x}",
            header.0
        )));
    }
    if header.1 != PROOF_SCHEME_GROTH16_BN254 {
        return Err(ZkError::InvalidProof(format!(
            "unsupported proof scheme {:#04x}",
            header.1
        )));
    }
    if body.len() != GROTH16_PROOF_SIZE {
        return Err(ZkError::InvalidProof(format!(
            "proof body must be {} bytes, got {}",
            GROTH16_PROOF_SIZE,
            body.len()
        )));
    }

    Proof::<Bn254>::deserialize_compressed(body)
        .map_err(|e| ZkError::InvalidProof(format!("malformed proof points: {}", e)))
}

/// Circuit-specific Groth16 setup for the preimage relation.
pub fn setup<R: RngCore + CryptoRng>(
    rng: &mut R,
) -> ZkResult<(ProvingKey<Bn254>, VerifyingKey<Bn254>)> {
    Groth16::<Bn254>::circuit_specific_setup(PreimageCircuit::blank(), rng)
        .map_err(|e| ZkError::SetupFailed(e.to_string()))
}

pub fn proving_key_to_bytes(pk: &ProvingKey<Bn254>) -> ZkResult<Vec<u8>> {
    let mut out = Vec::with_capacity(pk.compressed_size());
    pk.serialize_compressed(&mut out)
        .map_err(|e| ZkError::KeyDecoding(e.to_string()))?;
    Ok(out)
}

pub fn verifying_key_to_bytes(vk: &VerifyingKey<Bn254>) -> ZkResult<Vec<u8>> {
    let mut out = Vec::with_capacity(vk.compressed_size());
    vk.serialize_compressed(&mut out)
        .map_err(|e| ZkError::KeyDecoding(e.to_string()))?;
    Ok(out)
}

pub fn verifying_key_from_bytes(bytes: &[u8]) -> ZkResult<VerifyingKey<Bn254>> {
    VerifyingKey::<Bn254>::deserialize_compressed(bytes)
        .map_err(|e| ZkError::KeyDecoding(format!("verifying key: {}", e)))
}

pub(crate) fn read_key_file(path: &Path) -> ZkResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| ZkError::KeyNotFound(format!("{}: {}", path.display(), e)))
}

/// Produces preimage proofs. Used by clients and tooling; relying parties
/// only need the verifier.
pub struct PreimageProver {
    pk: ProvingKey<Bn254>,
}

impl PreimageProver {
    pub fn new(pk: ProvingKey<Bn254>) -> Self {
        Self { pk }
    }

    pub fn from_bytes(bytes: &[u8]) -> ZkResult<Self> {
        let pk = ProvingKey::<Bn254>::deserialize_compressed(bytes)
            .map_err(|e| ZkError::KeyDecoding(format!("proving key: {}", e)))?;
        Ok(Self { pk })
    }

    pub fn from_file(path: impl AsRef<Path>) -> ZkResult<Self> {
        Self::from_bytes(&read_key_file(path.as_ref())?)
    }

    pub fn verifying_key(&self) -> &VerifyingKey<Bn254> {
        &self.pk.vk
    }

    /// Prove knowledge of `preimage` for `h = MiMC(preimage)`.
    pub fn prove<R: RngCore + CryptoRng>(
        &self,
        preimage: Fr,
        rng: &mut R,
    ) -> ZkResult<PreimageProof> {
        let hash = mimc_hash(preimage);
        let proof = Groth16::<Bn254>::prove(&self.pk, PreimageCircuit::new(preimage, hash), rng)
            .map_err(|e| ZkError::ProofGenerationFailed(e.to_string()))?;

        let public_hash = fr_to_bytes(&hash);
        debug!(hash = %hex::encode(&public_hash[..6]), "Preimage proof generated");

        Ok(PreimageProof {
            public_hash,
            proof: encode_proof(&proof)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zk::testing::test_keys;

    #[test]
    fn test_proof_encoding_layout() {
        let (pk, _) = test_keys();
        let proof = PreimageProver::new(pk.clone())
            .prove(Fr::from(42u64), &mut crate::zk::testing::rng())
            .unwrap();

        assert_eq!(proof.proof.len(), HEADER_LEN + GROTH16_PROOF_SIZE);
        assert_eq!(proof.proof[0], PROOF_FORMAT_VERSION);
        assert_eq!(proof.proof[1], PROOF_SCHEME_GROTH16_BN254);
        assert!(decode_proof(&proof.proof).is_ok());
    }

    #[test]
    fn test_decode_rejects_wrong_header() {
        let mut blob = vec![0x02, PROOF_SCHEME_GROTH16_BN254];
        blob.extend_from_slice(&[0u8; GROTH16_PROOF_SIZE]);
        assert!(matches!(decode_proof(&blob), Err(ZkError::InvalidProof(_))));

        blob[0] = PROOF_FORMAT_VERSION;
        blob[1] = 0x7F;
        assert!(matches!(decode_proof(&blob), Err(ZkError::InvalidProof(_))));
    }

    #[test]
    fn test_decode_rejects_truncated_and_trailing() {
        assert!(matches!(decode_proof(&[0x01]), Err(ZkError::InvalidProof(_))));

        let (pk, _) = test_keys();
        let mut blob = PreimageProver::new(pk.clone())
            .prove(Fr::from(7u64), &mut crate::zk::testing::rng())
            .unwrap()
            .proof;
        blob.push(0);
        assert!(matches!(decode_proof(&blob), Err(ZkError::InvalidProof(_))));
        blob.truncate(HEADER_LEN + GROTH16_PROOF_SIZE - 1);
        assert!(matches!(decode_proof(&blob), Err(ZkError::InvalidProof(_))));
    }

    #[test]
    fn test_verifying_key_roundtrip() {
        let (_, vk) = test_keys();
        let bytes = verifying_key_to_bytes(vk).unwrap();
        let decoded = verifying_key_from_bytes(&bytes).unwrap();
        assert_eq!(verifying_key_to_bytes(&decoded).unwrap(), bytes);
        assert!(verifying_key_from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_missing_key_file() {
        let result = PreimageProver::from_file("/nonexistent/preimage.pk");
        assert!(matches!(result, Err(ZkError::KeyNotFound(_))));
    }
}
