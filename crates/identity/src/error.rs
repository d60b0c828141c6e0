//! Error taxonomy for ceremony operations.
//!
//! Variants carry internal detail for logs. Anything returned to the
//! authenticator-facing caller must go through [`CeremonyError::public_message`].

use thiserror::Error;
use zkpass_core::RepositoryError;
use zkpass_crypto::{ChallengeError, ZkError};

/// Errors that can occur in a registration or authentication ceremony.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CeremonyError {
    /// Transaction hash does not fit in a challenge
    #[error("Transaction intent too long: {len} bytes (max {max})")]
    InvalidIntentLength { len: usize, max: usize },

    /// No live session under the ceremony key
    #[error("Ceremony session not found")]
    SessionNotFound,

    /// Session existed but its expiry has passed
    #[error("Ceremony session expired")]
    SessionExpired,

    /// Stored session record could not be decoded
    #[error("Ceremony session corrupted: {0}")]
    SessionCorrupted(String),

    #[error("Credential already registered: {credential_id}")]
    DuplicateCredential { credential_id: String },

    /// Responding credential is absent, revoked, or not allowed for this ceremony
    #[error("Unknown credential: {0}")]
    UnknownCredential(String),

    #[error("Unknown user")]
    UnknownUser,

    #[error("Signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    #[error("Invalid preimage proof: {0}")]
    InvalidProof(String),

    /// Proof is for a different hash than the challenge's bound transaction
    #[error("Preimage proof does not match the bound transaction intent")]
    IntentProofMismatch,

    /// A storage collaborator failed. Retryable by the caller.
    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CeremonyError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            CeremonyError::InvalidIntentLength { .. } => "invalid_intent_length",
            CeremonyError::SessionNotFound => "session_not_found",
            CeremonyError::SessionExpired => "session_expired",
            CeremonyError::SessionCorrupted(_) => "session_corrupted",
            CeremonyError::DuplicateCredential { .. } => "duplicate_credential",
            CeremonyError::UnknownCredential(_) => "unknown_credential",
            CeremonyError::UnknownUser => "unknown_user",
            CeremonyError::SignatureVerificationFailed(_) => "signature_verification_failed",
            CeremonyError::InvalidProof(_) => "invalid_proof",
            CeremonyError::IntentProofMismatch => "intent_proof_mismatch",
            CeremonyError::RepositoryUnavailable(_) => "repository_unavailable",
            CeremonyError::Internal(_) => "internal",
        }
    }

    /// Only collaborator outages are worth retrying; the engine never retries itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CeremonyError::RepositoryUnavailable(_))
    }

    /// Generic text safe to show the authenticator-facing caller.
    ///
    /// Unknown users, unknown credentials and bad signatures share one
    /// message so responses cannot be used to enumerate accounts.
    pub fn public_message(&self) -> &'static str {
        match self {
            CeremonyError::InvalidIntentLength { .. } => "Invalid request",
            CeremonyError::SessionNotFound
            | CeremonyError::SessionExpired
            | CeremonyError::SessionCorrupted(_) => "Ceremony expired or already completed",
            CeremonyError::DuplicateCredential { .. } => "Authenticator already registered",
            CeremonyError::UnknownCredential(_)
            | CeremonyError::UnknownUser
            | CeremonyError::SignatureVerificationFailed(_)
            | CeremonyError::InvalidProof(_)
            | CeremonyError::IntentProofMismatch => "Authentication failed",
            CeremonyError::RepositoryUnavailable(_) => "Service temporarily unavailable",
            CeremonyError::Internal(_) => "Internal error",
        }
    }
}

impl From<RepositoryError> for CeremonyError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::DuplicateCredential { credential_id } => {
                CeremonyError::DuplicateCredential { credential_id }
            }
            RepositoryError::CredentialNotFound { credential_id } => {
                CeremonyError::UnknownCredential(credential_id)
            }
            RepositoryError::Unavailable(msg) => CeremonyError::RepositoryUnavailable(msg),
            RepositoryError::DuplicateUser => {
                CeremonyError::Internal("user handle collision".to_string())
            }
            RepositoryError::Corrupted(msg) => CeremonyError::Internal(msg),
        }
    }
}

impl From<ChallengeError> for CeremonyError {
    fn from(e: ChallengeError) -> Self {
        match e {
            ChallengeError::InvalidIntentLength { len, max } => {
                CeremonyError::InvalidIntentLength { len, max }
            }
        }
    }
}

impl From<ZkError> for CeremonyError {
    fn from(e: ZkError) -> Self {
        CeremonyError::InvalidProof(e.to_string())
    }
}

/// Result type for ceremony operations.
pub type CeremonyResult<T> = Result<T, CeremonyError>;
