//! Credential ledger.
//!
//! Thin typed facade over a [`Repository`]: every storage failure comes
//! back as a [`CeremonyError`], and writes are logged with fingerprints
//! only.

use crate::error::{CeremonyError, CeremonyResult};
use std::sync::Arc;
use tracing::{debug, info};
use zkpass_core::{Credential, CredentialId, Repository, UserHandle, UserIdentity};

pub struct CredentialLedger<R> {
    repository: Arc<R>,
}

impl<R> Clone for CredentialLedger<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R: Repository> CredentialLedger<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub async fn create_user(&self, user: &UserIdentity) -> CeremonyResult<()> {
        self.repository.create_user(user).await?;
        info!(user = %user.handle.fingerprint(), "User created");
        Ok(())
    }

    /// Fetch a user, failing with `UnknownUser` if absent.
    pub async fn user(&self, handle: &UserHandle) -> CeremonyResult<UserIdentity> {
        self.repository
            .get_user(handle)
            .await?
            .ok_or(CeremonyError::UnknownUser)
    }

    /// Persist a new credential. A duplicate id fails with
    /// `DuplicateCredential` and leaves the stored row untouched.
    pub async fn create(&self, credential: &Credential) -> CeremonyResult<()> {
        self.repository.create_credential(credential).await?;
        info!(
            user = %credential.user_handle.fingerprint(),
            credential = %credential.id.fingerprint(),
            attestation = %credential.attestation_type,
            "Credential created"
        );
        Ok(())
    }

    /// Every credential the user owns, revoked ones included.
    pub async fn for_user(&self, handle: &UserHandle) -> CeremonyResult<Vec<Credential>> {
        Ok(self.repository.credentials_for_user(handle).await?)
    }

    /// Credentials usable for login.
    pub async fn active_for_user(&self, handle: &UserHandle) -> CeremonyResult<Vec<Credential>> {
        let mut credentials = self.for_user(handle).await?;
        credentials.retain(|c| !c.is_revoked());
        Ok(credentials)
    }

    pub async fn get(&self, id: &CredentialId) -> CeremonyResult<Option<Credential>> {
        Ok(self.repository.credential_by_id(id).await?)
    }

    /// Atomic read-modify-write of one credential.
    pub async fn update<T, F>(&self, id: &CredentialId, mutate: F) -> CeremonyResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Credential) -> T + Send + 'static,
    {
        let result = self.repository.update_credential(id, mutate).await?;
        debug!(credential = %id.fingerprint(), "Credential updated");
        Ok(result)
    }

    /// Soft-revoke a credential. Idempotent; the original revocation time is kept.
    pub async fn revoke(&self, id: &CredentialId, revoked_at: u64) -> CeremonyResult<()> {
        self.repository.revoke_credential(id, revoked_at).await?;
        info!(credential = %id.fingerprint(), "Credential revoked");
        Ok(())
    }
}
