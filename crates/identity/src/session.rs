//! Ceremony session store.
//!
//! Sessions are strongly typed here and serialized to a versioned JSON
//! record for the [`SessionBackend`]. Binary fields are base64url so the
//! record round-trips byte for byte; expiry is exact Unix milliseconds.
//!
//! `consume` is the anti-replay point: it relies on the backend's atomic
//! `take`, so exactly one caller observes a given session.

use crate::error::{CeremonyError, CeremonyResult};
use crate::state::CeremonyKind;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use zkpass_core::{CredentialId, SessionBackend, UserHandle, UserVerificationRequirement};

/// Record format version written by this build.
pub const SESSION_FORMAT_VERSION: u8 = 1;

/// How long a spent-session tombstone outlives the session's own expiry.
pub const TOMBSTONE_RETENTION_MS: u64 = 300_000;

const SPENT_PREFIX: &str = "spent:";

/// Opaque key a ceremony session is stored under.
///
/// Always derived from server-issued values: the user handle, plus a
/// server-generated hint for authentication.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CeremonyKey(String);

impl CeremonyKey {
    pub fn registration(user_handle: &UserHandle) -> Self {
        Self(format!(
            "reg:{}",
            blake3::hash(user_handle.as_bytes()).to_hex()
        ))
    }

    pub fn authentication(user_handle: &UserHandle, hint: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(user_handle.as_bytes());
        hasher.update(hint);
        Self(format!("auth:{}", hasher.finalize().to_hex()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log fields.
    pub fn fingerprint(&self) -> &str {
        let end = self.0.len().min(self.0.find(':').map_or(0, |i| i + 13));
        &self.0[..end]
    }

    fn spent(&self) -> String {
        format!("{}{}", SPENT_PREFIX, self.0)
    }
}

impl fmt::Debug for CeremonyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CeremonyKey({})", self.fingerprint())
    }
}

/// Per-ceremony state held between begin and finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CeremonySession {
    pub kind: CeremonyKind,
    pub challenge: Vec<u8>,
    pub rp_id: String,
    pub user_handle: UserHandle,
    /// Authentication only; empty for registration
    pub allowed_credentials: Vec<CredentialId>,
    /// Unix milliseconds
    pub expires_at: u64,
    pub user_verification: UserVerificationRequirement,
    /// Length of the transaction hash bound into `challenge`, if any
    pub intent_len: Option<usize>,
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl CeremonySession {
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }

    pub fn encode(&self) -> CeremonyResult<Vec<u8>> {
        let record = SessionRecord {
            version: SESSION_FORMAT_VERSION,
            kind: self.kind,
            challenge: URL_SAFE_NO_PAD.encode(&self.challenge),
            rp_id: self.rp_id.clone(),
            user_handle: URL_SAFE_NO_PAD.encode(self.user_handle.as_bytes()),
            allowed_credentials: self
                .allowed_credentials
                .iter()
                .map(|id| URL_SAFE_NO_PAD.encode(id.as_bytes()))
                .collect(),
            expires_at: self.expires_at,
            user_verification: self.user_verification,
            intent_len: self.intent_len,
            extensions: self.extensions.clone(),
        };
        serde_json::to_vec(&record).map_err(|e| CeremonyError::Internal(e.to_string()))
    }

    /// Decode a stored record. Any malformed, missing or wrong-typed field
    /// is `SessionCorrupted`.
    pub fn decode(bytes: &[u8]) -> CeremonyResult<Self> {
        let record: SessionRecord = serde_json::from_slice(bytes)
            .map_err(|e| CeremonyError::SessionCorrupted(e.to_string()))?;

        if record.version != SESSION_FORMAT_VERSION {
            return Err(CeremonyError::SessionCorrupted(format!(
                "unsupported session version {}",
                record.version
            )));
        }

        let b64 = |field: &str, value: &str| {
            URL_SAFE_NO_PAD
                .decode(value)
                .map_err(|e| CeremonyError::SessionCorrupted(format!("{}: {}", field, e)))
        };

        let user_handle = UserHandle::from_bytes(b64("user_handle", &record.user_handle)?)
            .ok_or_else(|| CeremonyError::SessionCorrupted("user_handle: bad length".into()))?;

        let allowed_credentials = record
            .allowed_credentials
            .iter()
            .map(|id| b64("allowed_credentials", id).map(CredentialId::new))
            .collect::<CeremonyResult<Vec<_>>>()?;

        Ok(Self {
            kind: record.kind,
            challenge: b64("challenge", &record.challenge)?,
            rp_id: record.rp_id,
            user_handle,
            allowed_credentials,
            expires_at: record.expires_at,
            user_verification: record.user_verification,
            intent_len: record.intent_len,
            extensions: record.extensions,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct SessionRecord {
    version: u8,
    kind: CeremonyKind,
    challenge: String,
    rp_id: String,
    user_handle: String,
    allowed_credentials: Vec<String>,
    expires_at: u64,
    user_verification: UserVerificationRequirement,
    intent_len: Option<usize>,
    #[serde(default)]
    extensions: BTreeMap<String, serde_json::Value>,
}

/// Typed, single-shot session storage over a [`SessionBackend`].
pub struct CeremonySessionStore<S> {
    backend: Arc<S>,
}

impl<S> Clone for CeremonySessionStore<S> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<S: SessionBackend> CeremonySessionStore<S> {
    pub fn new(backend: Arc<S>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<S> {
        &self.backend
    }

    /// Store `session` under `key`, replacing any ceremony still open there.
    pub async fn open(&self, key: &CeremonyKey, session: &CeremonySession) -> CeremonyResult<()> {
        self.backend
            .put(key.as_str(), session.encode()?, session.expires_at)
            .await?;
        debug!(ceremony = %key.fingerprint(), expires_at = session.expires_at, "Session opened");
        Ok(())
    }

    /// Take the session under `key`. Succeeds at most once per opened session.
    ///
    /// - `SessionNotFound` if there is no live session
    /// - `SessionExpired` if `now` is past the session's expiry, whether the
    ///   record was still present or had already been spent
    /// - `SessionCorrupted` if the record cannot be decoded
    pub async fn consume(&self, key: &CeremonyKey, now: u64) -> CeremonyResult<CeremonySession> {
        let Some(bytes) = self.backend.take(key.as_str()).await? else {
            return Err(self.missing(key, now).await?);
        };

        let session = match CeremonySession::decode(&bytes) {
            Ok(session) => session,
            Err(e) => {
                warn!(ceremony = %key.fingerprint(), error = %e, "Dropping undecodable session");
                return Err(e);
            }
        };

        self.write_tombstone(key, session.expires_at).await?;

        if session.is_expired(now) {
            debug!(ceremony = %key.fingerprint(), "Session expired at consumption");
            return Err(CeremonyError::SessionExpired);
        }

        Ok(session)
    }

    async fn write_tombstone(&self, key: &CeremonyKey, expires_at: u64) -> CeremonyResult<()> {
        self.backend
            .put(
                &key.spent(),
                expires_at.to_be_bytes().to_vec(),
                expires_at.saturating_add(TOMBSTONE_RETENTION_MS),
            )
            .await?;
        Ok(())
    }

    /// Classify a consume that found no live record.
    async fn missing(&self, key: &CeremonyKey, now: u64) -> CeremonyResult<CeremonyError> {
        let spent_expiry = self
            .backend
            .get(&key.spent())
            .await?
            .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_slice()).ok())
            .map(u64::from_be_bytes);

        Ok(match spent_expiry {
            Some(expires_at) if now > expires_at => CeremonyError::SessionExpired,
            _ => CeremonyError::SessionNotFound,
        })
    }

    /// Drop stale sessions and tombstones. Optional; expiry is enforced at
    /// consumption regardless.
    pub async fn evict_expired(&self, now: u64) -> CeremonyResult<usize> {
        Ok(self.backend.evict_expired(now).await?)
    }
}
