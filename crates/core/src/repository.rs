//! Persistence collaborator for users and credentials.
//!
//! The ceremony engine never issues storage-specific queries; it only sees
//! this narrow interface. Every implementation must make
//! [`Repository::update_credential`] linearizable per credential id so that
//! concurrent authentications against the same credential serialize through
//! the counter check.

use crate::types::{Credential, CredentialId, UserHandle, UserIdentity};
use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by repository implementations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("User already exists")]
    DuplicateUser,

    #[error("Credential already exists: {credential_id}")]
    DuplicateCredential { credential_id: String },

    #[error("Credential not found: {credential_id}")]
    CredentialNotFound { credential_id: String },

    /// Backend could not be reached or failed mid-operation. Retryable.
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded.
    #[error("Corrupted record: {0}")]
    Corrupted(String),
}

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Storage capability consumed by the ceremony engine.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Persist a new user. Fails with `DuplicateUser` if the handle exists.
    async fn create_user(&self, user: &UserIdentity) -> RepositoryResult<()>;

    /// Look up a user by handle.
    async fn get_user(&self, handle: &UserHandle) -> RepositoryResult<Option<UserIdentity>>;

    /// Persist a new credential. Fails with `DuplicateCredential` and leaves
    /// the existing row untouched if the id is already present.
    async fn create_credential(&self, credential: &Credential) -> RepositoryResult<()>;

    /// All credentials owned by a user, revoked ones included.
    async fn credentials_for_user(&self, handle: &UserHandle) -> RepositoryResult<Vec<Credential>>;

    async fn credential_by_id(&self, id: &CredentialId) -> RepositoryResult<Option<Credential>>;

    /// Atomically read, mutate and write back one credential row.
    ///
    /// `mutate` runs exactly once while the row is held exclusively and must
    /// not block. Its return value is handed back to the caller.
    async fn update_credential<T, F>(&self, id: &CredentialId, mutate: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Credential) -> T + Send + 'static;

    /// Mark a credential revoked. Rows are never hard-deleted.
    async fn revoke_credential(&self, id: &CredentialId, revoked_at: u64) -> RepositoryResult<()> {
        self.update_credential(id, move |credential| {
            if credential.revoked_at.is_none() {
                credential.revoked_at = Some(revoked_at);
            }
        })
        .await
    }
}
