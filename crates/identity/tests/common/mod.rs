//! Software WebAuthn authenticator and engine fixtures shared by the
//! integration tests.

#![allow(dead_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ciborium::value::Value;
use p256::ecdsa::{signature::Signer as _, Signature, SigningKey};
use p256::elliptic_curve::rand_core::OsRng;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sha2::{Digest, Sha256};
use std::sync::{Arc, OnceLock};
use zkpass_core::{Config, MemoryRepository, MemorySessionBackend, Repository, SessionBackend};
use zkpass_crypto::zk::setup;
use zkpass_crypto::{Groth16PreimageVerifier, PreimageProver};
use zkpass_identity::{
    AssertionResponse, CeremonyEngine, Es256Verifier, MemoryAuditSink, Observability,
    RegistrationResponse,
};

pub const RP_ID: &str = "localhost";
pub const ORIGIN: &str = "http://localhost:8080";

const FLAG_UP: u8 = 0x01;
const FLAG_UV: u8 = 0x04;
const FLAG_AT: u8 = 0x40;

/// P-256 authenticator that signs exactly what a browser would hand over.
pub struct SoftAuthenticator {
    pub credential_id: Vec<u8>,
    key: SigningKey,
    pub counter: u32,
    pub user_verified: bool,
    pub packed: bool,
}

impl SoftAuthenticator {
    pub fn new(credential_id: &[u8]) -> Self {
        Self {
            credential_id: credential_id.to_vec(),
            key: SigningKey::random(&mut OsRng),
            counter: 0,
            user_verified: true,
            packed: true,
        }
    }

    fn flags(&self) -> u8 {
        if self.user_verified {
            FLAG_UP | FLAG_UV
        } else {
            FLAG_UP
        }
    }

    fn client_data(kind: &str, challenge: &[u8]) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "type": kind,
            "challenge": URL_SAFE_NO_PAD.encode(challenge),
            "origin": ORIGIN,
            "crossOrigin": false,
        }))
        .unwrap()
    }

    fn cose_key(&self) -> Vec<u8> {
        let point = self.key.verifying_key().to_encoded_point(false);
        let map = Value::Map(vec![
            (Value::Integer(1i64.into()), Value::Integer(2i64.into())),
            (Value::Integer(3i64.into()), Value::Integer((-7i64).into())),
            (Value::Integer((-1i64).into()), Value::Integer(1i64.into())),
            (Value::Integer((-2i64).into()), Value::Bytes(point.x().unwrap().to_vec())),
            (Value::Integer((-3i64).into()), Value::Bytes(point.y().unwrap().to_vec())),
        ]);
        let mut buf = Vec::new();
        ciborium::into_writer(&map, &mut buf).unwrap();
        buf
    }

    fn sign(&self, auth_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
        let mut signed = auth_data.to_vec();
        signed.extend_from_slice(&Sha256::digest(client_data_json));
        let sig: Signature = self.key.sign(&signed);
        sig.to_der().as_bytes().to_vec()
    }

    pub fn make_credential(&self, challenge: &[u8]) -> RegistrationResponse {
        let mut auth_data = Sha256::digest(RP_ID.as_bytes()).to_vec();
        auth_data.push(self.flags() | FLAG_AT);
        auth_data.extend_from_slice(&self.counter.to_be_bytes());
        auth_data.extend_from_slice(&[0xA5u8; 16]);
        auth_data.extend_from_slice(&(self.credential_id.len() as u16).to_be_bytes());
        auth_data.extend_from_slice(&self.credential_id);
        auth_data.extend_from_slice(&self.cose_key());

        let client_data_json = Self::client_data("webauthn.create", challenge);
        let (fmt, att_stmt) = if self.packed {
            let sig = self.sign(&auth_data, &client_data_json);
            (
                "packed",
                Value::Map(vec![
                    (Value::Text("alg".into()), Value::Integer((-7i64).into())),
                    (Value::Text("sig".into()), Value::Bytes(sig)),
                ]),
            )
        } else {
            ("none", Value::Map(vec![]))
        };

        let object = Value::Map(vec![
            (Value::Text("fmt".into()), Value::Text(fmt.into())),
            (Value::Text("attStmt".into()), att_stmt),
            (Value::Text("authData".into()), Value::Bytes(auth_data)),
        ]);
        let mut attestation_object = Vec::new();
        ciborium::into_writer(&object, &mut attestation_object).unwrap();

        RegistrationResponse {
            credential_id: self.credential_id.clone(),
            client_data_json,
            attestation_object,
            label: "soft-authenticator".to_string(),
            ..Default::default()
        }
    }

    /// Sign an assertion, advancing the counter by `step` first.
    pub fn get_assertion(&mut self, challenge: &[u8], step: u32) -> AssertionResponse {
        self.counter = self.counter.wrapping_add(step);

        let mut authenticator_data = Sha256::digest(RP_ID.as_bytes()).to_vec();
        authenticator_data.push(self.flags());
        authenticator_data.extend_from_slice(&self.counter.to_be_bytes());

        let client_data_json = Self::client_data("webauthn.get", challenge);
        let signature = self.sign(&authenticator_data, &client_data_json);

        AssertionResponse {
            credential_id: self.credential_id.clone(),
            client_data_json,
            authenticator_data,
            signature,
            user_handle: None,
        }
    }

    /// Same key and credential id, independent counter.
    pub fn clone_device(&self) -> Self {
        Self {
            credential_id: self.credential_id.clone(),
            key: self.key.clone(),
            counter: 0,
            user_verified: self.user_verified,
            packed: self.packed,
        }
    }
}

pub type MemoryEngine = CeremonyEngine<MemoryRepository, MemorySessionBackend, Es256Verifier>;

pub fn engine_with<R: Repository, S: SessionBackend>(
    config: &Config,
    repository: Arc<R>,
    sessions: Arc<S>,
) -> (CeremonyEngine<R, S, Es256Verifier>, Arc<MemoryAuditSink>) {
    let sink = Arc::new(MemoryAuditSink::new());
    let engine = CeremonyEngine::new(
        config,
        repository,
        sessions,
        Arc::new(Es256Verifier::from_config(&config.relying_party)),
        Observability::new(sink.clone()),
    );
    (engine, sink)
}

pub fn memory_engine() -> (MemoryEngine, Arc<MemoryAuditSink>) {
    engine_with(
        &Config::default_config(),
        Arc::new(MemoryRepository::new()),
        Arc::new(MemorySessionBackend::new()),
    )
}

/// One Groth16 key pair per test binary.
pub fn zk_keys() -> &'static (PreimageProver, Arc<Groth16PreimageVerifier>) {
    static KEYS: OnceLock<(PreimageProver, Arc<Groth16PreimageVerifier>)> = OnceLock::new();
    KEYS.get_or_init(|| {
        let (pk, vk) = setup(&mut zk_rng()).unwrap();
        let verifier = Groth16PreimageVerifier::new(&vk).unwrap();
        (PreimageProver::new(pk), Arc::new(verifier))
    })
}

pub fn zk_rng() -> StdRng {
    StdRng::seed_from_u64(0x5EED)
}
