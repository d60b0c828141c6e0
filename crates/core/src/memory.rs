//! In-process repository backed by mutex-guarded maps.
//!
//! Locks are taken and released within each call; nothing awaits while a
//! guard is alive.

use crate::repository::{Repository, RepositoryError, RepositoryResult};
use crate::types::{Credential, CredentialId, UserHandle, UserIdentity};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    users: HashMap<UserHandle, UserIdentity>,
    credentials: HashMap<CredentialId, Credential>,
}

/// Repository kept entirely in memory. Suitable for tests and single-node
/// deployments that accept losing state on restart.
#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RepositoryResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|e| RepositoryError::Unavailable(format!("Lock error: {}", e)))
    }

    /// Number of stored credentials (for testing/monitoring)
    pub fn credential_count(&self) -> usize {
        self.tables
            .lock()
            .map(|t| t.credentials.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_user(&self, user: &UserIdentity) -> RepositoryResult<()> {
        let mut tables = self.lock()?;
        if tables.users.contains_key(&user.handle) {
            return Err(RepositoryError::DuplicateUser);
        }
        tables.users.insert(user.handle.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&self, handle: &UserHandle) -> RepositoryResult<Option<UserIdentity>> {
        Ok(self.lock()?.users.get(handle).cloned())
    }

    async fn create_credential(&self, credential: &Credential) -> RepositoryResult<()> {
        let mut tables = self.lock()?;
        if tables.credentials.contains_key(&credential.id) {
            return Err(RepositoryError::DuplicateCredential {
                credential_id: credential.id.fingerprint(),
            });
        }
        tables
            .credentials
            .insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    async fn credentials_for_user(&self, handle: &UserHandle) -> RepositoryResult<Vec<Credential>> {
        let tables = self.lock()?;
        let mut owned: Vec<Credential> = tables
            .credentials
            .values()
            .filter(|c| &c.user_handle == handle)
            .cloned()
            .collect();
        owned.sort_by_key(|c| c.created_at);
        Ok(owned)
    }

    async fn credential_by_id(&self, id: &CredentialId) -> RepositoryResult<Option<Credential>> {
        Ok(self.lock()?.credentials.get(id).cloned())
    }

    async fn update_credential<T, F>(&self, id: &CredentialId, mutate: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Credential) -> T + Send + 'static,
    {
        let mut tables = self.lock()?;
        let credential =
            tables
                .credentials
                .get_mut(id)
                .ok_or_else(|| RepositoryError::CredentialNotFound {
                    credential_id: id.fingerprint(),
                })?;

        // The id is the row key; a mutator must not move the row.
        let original_id = credential.id.clone();
        let out = mutate(credential);
        credential.id = original_id;
        Ok(out)
    }
}
