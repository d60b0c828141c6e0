//! Core types and storage collaborators for zk-pass.
//!
//! This crate provides the domain model (users, credentials, authenticator
//! metadata), the repository and session-backend traits the ceremony engine
//! depends on, their in-memory and SQLite implementations, configuration,
//! and logging initialisation.

pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod repository;
pub mod session_backend;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{CoreError, Result};
pub use memory::MemoryRepository;
pub use repository::{Repository, RepositoryError, RepositoryResult};
pub use session_backend::{MemorySessionBackend, SessionBackend};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteRepository, SqliteSessionBackend};
pub use types::{
    current_timestamp, AttestationArtifacts, AttestationConveyance, AuthenticatorAttachment,
    AuthenticatorInfo, AuthenticatorTransport, Credential, CredentialFlags, CredentialId,
    UserHandle, UserIdentity, UserVerificationRequirement, COSE_ALG_ES256, MAX_USER_HANDLE_LEN,
};
