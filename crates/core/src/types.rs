//! Domain types shared by every ceremony component.
//!
//! These are plain value types. Nothing here performs I/O or carries
//! behaviour tied to "the authenticated user"; lookups go through the
//! [`Repository`](crate::repository::Repository) collaborator.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Maximum size of a WebAuthn user handle in bytes.
pub const MAX_USER_HANDLE_LEN: usize = 64;

/// COSE algorithm identifier for ECDSA P-256 with SHA-256.
pub const COSE_ALG_ES256: i64 = -7;

/// Opaque, server-generated user handle (at most 64 bytes).
///
/// Never derived from a displayable name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserHandle(Vec<u8>);

impl UserHandle {
    /// Generate a fresh handle filled with 64 CSPRNG bytes.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; MAX_USER_HANDLE_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap existing handle bytes, rejecting empty or oversized values.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Option<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() || bytes.len() > MAX_USER_HANDLE_LEN {
            return None;
        }
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Short, non-reversible fingerprint suitable for log fields.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

impl fmt::Debug for UserHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserHandle({})", self.fingerprint())
    }
}

/// Raw credential identifier as produced by the authenticator.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CredentialId(Vec<u8>);

impl CredentialId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

impl fmt::Debug for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialId({})", self.fingerprint())
    }
}

impl From<Vec<u8>> for CredentialId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// A registered user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Stable database identifier
    pub id: Uuid,
    /// Opaque WebAuthn user handle, immutable after creation
    pub handle: UserHandle,
    /// Human-palatable name, display only
    pub display_name: String,
    /// Creation time (Unix milliseconds)
    pub created_at: u64,
}

impl UserIdentity {
    /// Create a new identity with a fresh handle and database id.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle: UserHandle::generate(),
            display_name: display_name.into(),
            created_at: current_timestamp(),
        }
    }
}

/// Transport hints reported by the authenticator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticatorTransport {
    Usb,
    Nfc,
    Ble,
    SmartCard,
    Hybrid,
    Internal,
}

/// Authenticator attachment class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticatorAttachment {
    Platform,
    CrossPlatform,
}

/// Relying-party user-verification requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerificationRequirement {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

/// Attestation conveyance preference sent with registration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationConveyance {
    #[default]
    None,
    Indirect,
    Direct,
}

/// Authenticator data flags persisted with a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CredentialFlags {
    /// UP: the user was present
    pub user_present: bool,
    /// UV: the user performed verification
    pub user_verified: bool,
    /// BE: the credential may be backed up or synced. Never changes.
    pub backup_eligible: bool,
    /// BS: the credential is currently backed up or synced
    pub backup_state: bool,
}

/// Authenticator model metadata and anti-clone state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatorInfo {
    /// AAGUID of the authenticator model
    pub aaguid: [u8; 16],
    /// Last observed signature counter
    pub sign_count: u32,
    /// Set once a nonzero counter has been stored
    #[serde(default)]
    pub counter_observed: bool,
    /// Set once a non-increasing counter was observed; never cleared automatically
    pub clone_warning: bool,
    /// Attachment class reported at registration
    pub attachment: Option<AuthenticatorAttachment>,
}

/// Artifacts captured from the registration ceremony.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttestationArtifacts {
    pub client_data_json: Vec<u8>,
    pub client_data_hash: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    /// COSE algorithm identifier of the credential key
    pub public_key_algorithm: i64,
    /// Raw CBOR attestation object
    pub object: Vec<u8>,
}

/// A user's registered authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Globally unique credential identifier
    pub id: CredentialId,
    /// Owning user
    pub user_handle: UserHandle,
    /// Free-form label (e.g. the registering user agent)
    pub label: String,
    /// SEC1-encoded public key
    pub public_key: Vec<u8>,
    /// Attestation format the credential was registered with
    pub attestation_type: String,
    pub transports: BTreeSet<AuthenticatorTransport>,
    pub flags: CredentialFlags,
    pub authenticator: AuthenticatorInfo,
    pub attestation: AttestationArtifacts,
    /// Creation time (Unix milliseconds)
    pub created_at: u64,
    /// Time of the last successful authentication
    pub last_used_at: Option<u64>,
    /// Soft-revocation time; revoked credentials are never deleted
    pub revoked_at: Option<u64>,
}

impl Credential {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Short hex fingerprint of arbitrary bytes for log output.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(&blake3::hash(bytes).as_bytes()[..6])
}

/// Get current timestamp in milliseconds.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
