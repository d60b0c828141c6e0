//! Signature-verification capability.
//!
//! The engine only depends on [`SignatureVerifier`]. [`Es256Verifier`] is a
//! deliberately narrow implementation: ES256 credentials, `none` or
//! `packed` self-attestation, and nothing that needs a certificate chain.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ciborium::value::Value;
use p256::ecdsa::{signature::Verifier as _, Signature, VerifyingKey};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use thiserror::Error;
use zkpass_core::config::RelyingPartyConfig;
use zkpass_core::{
    AttestationArtifacts, AuthenticatorAttachment, AuthenticatorTransport, CredentialFlags,
    UserVerificationRequirement, COSE_ALG_ES256,
};

pub const FLAG_UP: u8 = 0x01;
pub const FLAG_UV: u8 = 0x04;
pub const FLAG_BE: u8 = 0x08;
pub const FLAG_BS: u8 = 0x10;
pub const FLAG_AT: u8 = 0x40;

/// rpIdHash + flags + signCount
const AUTH_DATA_MIN_LEN: usize = 37;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("client data: {0}")]
    ClientData(String),

    #[error("authenticator data: {0}")]
    AuthenticatorData(String),

    #[error("attestation: {0}")]
    Attestation(String),

    #[error("public key: {0}")]
    PublicKey(String),

    #[error("signature invalid")]
    BadSignature,

    #[error("user presence flag not set")]
    UserNotPresent,

    #[error("user verification required")]
    UserNotVerified,
}

/// Raw registration response from the client.
#[derive(Debug, Clone, Default)]
pub struct RegistrationResponse {
    pub credential_id: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub attestation_object: Vec<u8>,
    pub transports: BTreeSet<AuthenticatorTransport>,
    pub attachment: Option<AuthenticatorAttachment>,
    /// Free-form label, usually the registering user agent
    pub label: String,
}

/// Raw assertion response from the client.
#[derive(Debug, Clone, Default)]
pub struct AssertionResponse {
    pub credential_id: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    /// DER-encoded ECDSA signature
    pub signature: Vec<u8>,
    pub user_handle: Option<Vec<u8>>,
}

/// What the session says the response must be bound to.
#[derive(Debug, Clone, Copy)]
pub struct ExpectedCeremony<'a> {
    pub challenge: &'a [u8],
    pub rp_id: &'a str,
    pub user_verification: UserVerificationRequirement,
}

#[derive(Debug, Clone)]
pub struct VerifiedRegistration {
    /// SEC1 uncompressed public key
    pub public_key: Vec<u8>,
    pub aaguid: [u8; 16],
    pub sign_count: u32,
    pub flags: CredentialFlags,
    /// `none` or `packed`
    pub attestation_type: String,
    pub attestation: AttestationArtifacts,
}

#[derive(Debug, Clone, Copy)]
pub struct VerifiedAssertion {
    pub sign_count: u32,
    pub flags: CredentialFlags,
}

#[async_trait]
pub trait SignatureVerifier: Send + Sync + 'static {
    async fn verify_registration(
        &self,
        expected: &ExpectedCeremony<'_>,
        response: &RegistrationResponse,
    ) -> Result<VerifiedRegistration, VerificationError>;

    /// `public_key` is the stored SEC1 key of the responding credential.
    async fn verify_assertion(
        &self,
        expected: &ExpectedCeremony<'_>,
        public_key: &[u8],
        response: &AssertionResponse,
    ) -> Result<VerifiedAssertion, VerificationError>;
}

#[derive(Deserialize)]
struct ClientData {
    #[serde(rename = "type")]
    kind: String,
    challenge: String,
    origin: String,
    #[serde(default, rename = "crossOrigin")]
    cross_origin: bool,
}

/// Parsed fixed-layout authenticator data.
#[derive(Debug)]
struct AuthenticatorData<'a> {
    rp_id_hash: &'a [u8],
    flags: u8,
    sign_count: u32,
    attested: Option<AttestedCredential<'a>>,
}

#[derive(Debug)]
struct AttestedCredential<'a> {
    aaguid: [u8; 16],
    credential_id: &'a [u8],
    cose_key: Value,
}

impl<'a> AuthenticatorData<'a> {
    fn parse(data: &'a [u8]) -> Result<Self, VerificationError> {
        let err = |msg: &str| VerificationError::AuthenticatorData(msg.to_string());

        if data.len() < AUTH_DATA_MIN_LEN {
            return Err(err("too short"));
        }
        let flags = data[32];
        let sign_count = u32::from_be_bytes([data[33], data[34], data[35], data[36]]);

        let attested = if flags & FLAG_AT != 0 {
            let rest = &data[AUTH_DATA_MIN_LEN..];
            if rest.len() < 18 {
                return Err(err("truncated attested credential data"));
            }
            let mut aaguid = [0u8; 16];
            aaguid.copy_from_slice(&rest[..16]);
            let id_len = u16::from_be_bytes([rest[16], rest[17]]) as usize;
            let rest = &rest[18..];
            if rest.len() < id_len {
                return Err(err("truncated credential id"));
            }
            let (credential_id, mut key_bytes) = rest.split_at(id_len);
            let cose_key: Value = ciborium::from_reader(&mut key_bytes)
                .map_err(|e| err(&format!("credential public key: {}", e)))?;
            Some(AttestedCredential {
                aaguid,
                credential_id,
                cose_key,
            })
        } else {
            None
        };

        Ok(Self {
            rp_id_hash: &data[..32],
            flags,
            sign_count,
            attested,
        })
    }

    fn credential_flags(&self) -> CredentialFlags {
        CredentialFlags {
            user_present: self.flags & FLAG_UP != 0,
            user_verified: self.flags & FLAG_UV != 0,
            backup_eligible: self.flags & FLAG_BE != 0,
            backup_state: self.flags & FLAG_BS != 0,
        }
    }
}

fn cbor_get_int(map: &[(Value, Value)], key: i64) -> Option<&Value> {
    let target = Value::Integer(key.into());
    map.iter().find(|(k, _)| k == &target).map(|(_, v)| v)
}

fn cbor_get_str<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Text(s) if s == key))
        .map(|(_, v)| v)
}

fn cbor_int(v: &Value) -> Option<i128> {
    match v {
        Value::Integer(i) => Some(i128::from(*i)),
        _ => None,
    }
}

/// COSE_Key (kty=2, alg=-7, crv=1) to SEC1 uncompressed point.
pub fn cose_es256_to_sec1(cose_key: &Value) -> Result<Vec<u8>, VerificationError> {
    let err = |msg: &str| VerificationError::PublicKey(msg.to_string());
    let map = match cose_key {
        Value::Map(map) => map,
        _ => return Err(err("COSE key is not a map")),
    };

    if cbor_get_int(map, 1).and_then(cbor_int) != Some(2) {
        return Err(err("kty is not EC2"));
    }
    if cbor_get_int(map, 3).and_then(cbor_int) != Some(COSE_ALG_ES256 as i128) {
        return Err(err("alg is not ES256"));
    }
    if cbor_get_int(map, -1).and_then(cbor_int) != Some(1) {
        return Err(err("crv is not P-256"));
    }

    let coordinate = |label: i64| match cbor_get_int(map, label) {
        Some(Value::Bytes(b)) if b.len() == 32 => Ok(b.as_slice()),
        _ => Err(err("bad coordinate")),
    };
    let x = coordinate(-2)?;
    let y = coordinate(-3)?;

    let mut sec1 = Vec::with_capacity(65);
    sec1.push(0x04);
    sec1.extend_from_slice(x);
    sec1.extend_from_slice(y);

    // Rejects points not on the curve.
    VerifyingKey::from_sec1_bytes(&sec1).map_err(|e| err(&e.to_string()))?;
    Ok(sec1)
}

fn verify_es256(public_key: &[u8], message: &[u8], der_signature: &[u8]) -> Result<(), VerificationError> {
    let verifying_key = VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|e| VerificationError::PublicKey(e.to_string()))?;
    let signature = Signature::from_der(der_signature).map_err(|_| VerificationError::BadSignature)?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| VerificationError::BadSignature)
}

/// ES256 WebAuthn verifier with a fixed origin allow-list.
#[derive(Debug, Clone)]
pub struct Es256Verifier {
    origins: Vec<String>,
}

impl Es256Verifier {
    pub fn new(origins: Vec<String>) -> Self {
        Self { origins }
    }

    pub fn from_config(config: &RelyingPartyConfig) -> Self {
        Self::new(config.origins.clone())
    }

    fn check_client_data(
        &self,
        raw: &[u8],
        expected_type: &str,
        expected: &ExpectedCeremony<'_>,
    ) -> Result<(), VerificationError> {
        let client_data: ClientData = serde_json::from_slice(raw)
            .map_err(|e| VerificationError::ClientData(e.to_string()))?;

        if client_data.kind != expected_type {
            return Err(VerificationError::ClientData(format!(
                "unexpected type {}",
                client_data.kind
            )));
        }

        let challenge = URL_SAFE_NO_PAD
            .decode(client_data.challenge.trim_end_matches('='))
            .map_err(|_| VerificationError::ClientData("challenge is not base64url".into()))?;
        if challenge != expected.challenge {
            return Err(VerificationError::ClientData("challenge mismatch".into()));
        }

        if !self.origins.iter().any(|o| o == &client_data.origin) {
            return Err(VerificationError::ClientData(format!(
                "origin {} not allowed",
                client_data.origin
            )));
        }
        if client_data.cross_origin {
            return Err(VerificationError::ClientData("cross-origin request".into()));
        }
        Ok(())
    }

    fn check_authenticator_data(
        auth_data: &AuthenticatorData<'_>,
        expected: &ExpectedCeremony<'_>,
    ) -> Result<(), VerificationError> {
        let rp_id_hash = Sha256::digest(expected.rp_id.as_bytes());
        if auth_data.rp_id_hash != rp_id_hash.as_slice() {
            return Err(VerificationError::AuthenticatorData("rpIdHash mismatch".into()));
        }
        if auth_data.flags & FLAG_UP == 0 {
            return Err(VerificationError::UserNotPresent);
        }
        if expected.user_verification == UserVerificationRequirement::Required
            && auth_data.flags & FLAG_UV == 0
        {
            return Err(VerificationError::UserNotVerified);
        }
        Ok(())
    }
}

#[async_trait]
impl SignatureVerifier for Es256Verifier {
    async fn verify_registration(
        &self,
        expected: &ExpectedCeremony<'_>,
        response: &RegistrationResponse,
    ) -> Result<VerifiedRegistration, VerificationError> {
        self.check_client_data(&response.client_data_json, "webauthn.create", expected)?;
        let client_data_hash = Sha256::digest(&response.client_data_json).to_vec();

        let attestation: Value = ciborium::from_reader(response.attestation_object.as_slice())
            .map_err(|e| VerificationError::Attestation(e.to_string()))?;
        let map = match &attestation {
            Value::Map(map) => map,
            _ => return Err(VerificationError::Attestation("not a map".into())),
        };

        let fmt = match cbor_get_str(map, "fmt") {
            Some(Value::Text(fmt)) => fmt.as_str(),
            _ => return Err(VerificationError::Attestation("missing fmt".into())),
        };
        let auth_data_bytes = match cbor_get_str(map, "authData") {
            Some(Value::Bytes(b)) => b.as_slice(),
            _ => return Err(VerificationError::Attestation("missing authData".into())),
        };
        let att_stmt = match cbor_get_str(map, "attStmt") {
            Some(Value::Map(stmt)) => stmt.as_slice(),
            _ => return Err(VerificationError::Attestation("missing attStmt".into())),
        };

        let auth_data = AuthenticatorData::parse(auth_data_bytes)?;
        Self::check_authenticator_data(&auth_data, expected)?;

        let attested = auth_data.attested.as_ref().ok_or_else(|| {
            VerificationError::AuthenticatorData("no attested credential data".into())
        })?;
        if attested.credential_id != response.credential_id.as_slice() {
            return Err(VerificationError::AuthenticatorData(
                "credential id does not match response id".into(),
            ));
        }
        let public_key = cose_es256_to_sec1(&attested.cose_key)?;

        match fmt {
            "none" => {
                if !att_stmt.is_empty() {
                    return Err(VerificationError::Attestation(
                        "none attestation with non-empty attStmt".into(),
                    ));
                }
            }
            "packed" => {
                if cbor_get_str(att_stmt, "x5c").is_some() {
                    return Err(VerificationError::Attestation(
                        "certificate attestation is not supported".into(),
                    ));
                }
                if cbor_get_str(att_stmt, "alg").and_then(cbor_int) != Some(COSE_ALG_ES256 as i128) {
                    return Err(VerificationError::Attestation("packed alg is not ES256".into()));
                }
                let sig = match cbor_get_str(att_stmt, "sig") {
                    Some(Value::Bytes(sig)) => sig,
                    _ => return Err(VerificationError::Attestation("missing sig".into())),
                };
                let mut signed = auth_data_bytes.to_vec();
                signed.extend_from_slice(&client_data_hash);
                verify_es256(&public_key, &signed, sig)?;
            }
            other => {
                return Err(VerificationError::Attestation(format!(
                    "unsupported format {}",
                    other
                )))
            }
        }

        Ok(VerifiedRegistration {
            public_key,
            aaguid: attested.aaguid,
            sign_count: auth_data.sign_count,
            flags: auth_data.credential_flags(),
            attestation_type: fmt.to_string(),
            attestation: AttestationArtifacts {
                client_data_json: response.client_data_json.clone(),
                client_data_hash,
                authenticator_data: auth_data_bytes.to_vec(),
                public_key_algorithm: COSE_ALG_ES256,
                object: response.attestation_object.clone(),
            },
        })
    }

    async fn verify_assertion(
        &self,
        expected: &ExpectedCeremony<'_>,
        public_key: &[u8],
        response: &AssertionResponse,
    ) -> Result<VerifiedAssertion, VerificationError> {
        self.check_client_data(&response.client_data_json, "webauthn.get", expected)?;

        let auth_data = AuthenticatorData::parse(&response.authenticator_data)?;
        Self::check_authenticator_data(&auth_data, expected)?;

        let mut signed = response.authenticator_data.clone();
        signed.extend_from_slice(&Sha256::digest(&response.client_data_json));
        verify_es256(public_key, &signed, &response.signature)?;

        Ok(VerifiedAssertion {
            sign_count: auth_data.sign_count,
            flags: auth_data.credential_flags(),
        })
    }
}
