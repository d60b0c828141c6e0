//! SQLite-backed repository and session backend.
//!
//! - WAL journal mode for durability and concurrent readers
//! - Every call runs on the blocking pool; the connection mutex is never
//!   held across an `.await`
//! - Credential ids are the primary key, so a duplicate insert is rejected
//!   without touching the existing row
//! - `update_credential` runs SELECT, mutate and UPDATE inside one
//!   `BEGIN IMMEDIATE` transaction, which serializes writers per database
//!
//! # Schema
//!
//! ```text
//! users(handle BLOB PK, id TEXT UNIQUE, display_name TEXT, created_at INTEGER)
//! credentials(id BLOB PK, user_handle BLOB, body TEXT, sign_count INTEGER,
//!             clone_warning INTEGER, revoked_at INTEGER, updated_at INTEGER)
//! ceremony_sessions(key TEXT PK, value BLOB, expires_at INTEGER)
//! ```

use crate::config::StorageConfig;
use crate::error::CoreError;
use crate::repository::{Repository, RepositoryError, RepositoryResult};
use crate::session_backend::SessionBackend;
use crate::types::{current_timestamp, Credential, CredentialId, UserHandle, UserIdentity};
use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

impl From<rusqlite::Error> for RepositoryError {
    fn from(e: rusqlite::Error) -> Self {
        RepositoryError::Unavailable(e.to_string())
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

fn open_connection(path: &Path) -> RepositoryResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| RepositoryError::Unavailable(format!("IO error: {}", e)))?;
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    Ok(conn)
}

fn configured_path(config: &StorageConfig) -> crate::error::Result<&Path> {
    config
        .database_path
        .as_deref()
        .ok_or_else(|| CoreError::Config("storage.database_path is not set".to_string()))
}

/// Run `f` against the shared connection on the blocking pool.
async fn with_connection<T, F>(conn: &Arc<Mutex<Connection>>, f: F) -> RepositoryResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> RepositoryResult<T> + Send + 'static,
{
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let mut guard = conn
            .lock()
            .map_err(|e| RepositoryError::Unavailable(format!("Lock error: {}", e)))?;
        f(&mut guard)
    })
    .await
    .map_err(|e| RepositoryError::Unavailable(format!("Blocking task failed: {}", e)))?
}

/// SQLite integers are signed; later instants saturate instead of wrapping.
fn sql_millis(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

fn decode_credential(body: &str) -> RepositoryResult<Credential> {
    serde_json::from_str(body).map_err(|e| RepositoryError::Corrupted(e.to_string()))
}

fn encode_credential(credential: &Credential) -> RepositoryResult<String> {
    serde_json::to_string(credential).map_err(|e| RepositoryError::Corrupted(e.to_string()))
}

/// Durable repository for users and credentials.
#[derive(Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Create or open a repository at the specified path.
    pub fn open(path: impl AsRef<Path>) -> RepositoryResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening credential repository");

        let conn = open_connection(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the database named by `[storage] database_path`.
    pub fn from_config(config: &StorageConfig) -> crate::error::Result<Self> {
        Ok(Self::open(configured_path(config)?)?)
    }

    /// Open a private in-memory database (tests).
    pub fn open_in_memory() -> RepositoryResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> RepositoryResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                handle BLOB PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS credentials (
                id BLOB PRIMARY KEY,
                user_handle BLOB NOT NULL,
                body TEXT NOT NULL,
                sign_count INTEGER NOT NULL,
                clone_warning INTEGER NOT NULL DEFAULT 0,
                revoked_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_credentials_user ON credentials(user_handle);
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn create_user(&self, user: &UserIdentity) -> RepositoryResult<()> {
        let user = user.clone();
        with_connection(&self.conn, move |conn| {
            conn.execute(
                "INSERT INTO users (handle, id, display_name, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    user.handle.as_bytes(),
                    user.id.to_string(),
                    user.display_name,
                    sql_millis(user.created_at),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    RepositoryError::DuplicateUser
                } else {
                    e.into()
                }
            })?;
            debug!(user = %user.handle.fingerprint(), "User created");
            Ok(())
        })
        .await
    }

    async fn get_user(&self, handle: &UserHandle) -> RepositoryResult<Option<UserIdentity>> {
        let handle = handle.clone();
        with_connection(&self.conn, move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, display_name, created_at FROM users WHERE handle = ?1",
                    params![handle.as_bytes()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(id, display_name, created_at)| {
                let id = Uuid::parse_str(&id)
                    .map_err(|e| RepositoryError::Corrupted(format!("user id: {}", e)))?;
                Ok(UserIdentity {
                    id,
                    handle: handle.clone(),
                    display_name,
                    created_at: created_at as u64,
                })
            })
            .transpose()
        })
        .await
    }

    async fn create_credential(&self, credential: &Credential) -> RepositoryResult<()> {
        let credential = credential.clone();
        with_connection(&self.conn, move |conn| {
            let body = encode_credential(&credential)?;
            let now = sql_millis(current_timestamp());
            conn.execute(
                r#"
                INSERT INTO credentials (
                    id, user_handle, body, sign_count, clone_warning,
                    revoked_at, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    credential.id.as_bytes(),
                    credential.user_handle.as_bytes(),
                    body,
                    credential.authenticator.sign_count as i64,
                    credential.authenticator.clone_warning,
                    credential.revoked_at.map(sql_millis),
                    sql_millis(credential.created_at),
                    now,
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    RepositoryError::DuplicateCredential {
                        credential_id: credential.id.fingerprint(),
                    }
                } else {
                    e.into()
                }
            })?;
            Ok(())
        })
        .await
    }

    async fn credentials_for_user(&self, handle: &UserHandle) -> RepositoryResult<Vec<Credential>> {
        let handle = handle.clone();
        with_connection(&self.conn, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM credentials WHERE user_handle = ?1 ORDER BY created_at ASC",
            )?;
            let bodies = stmt
                .query_map(params![handle.as_bytes()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            bodies.iter().map(|b| decode_credential(b)).collect()
        })
        .await
    }

    async fn credential_by_id(&self, id: &CredentialId) -> RepositoryResult<Option<Credential>> {
        let id = id.clone();
        with_connection(&self.conn, move |conn| {
            let body = conn
                .query_row(
                    "SELECT body FROM credentials WHERE id = ?1",
                    params![id.as_bytes()],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            body.map(|b| decode_credential(&b)).transpose()
        })
        .await
    }

    async fn update_credential<T, F>(&self, id: &CredentialId, mutate: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Credential) -> T + Send + 'static,
    {
        let id = id.clone();
        with_connection(&self.conn, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let body = tx
                .query_row(
                    "SELECT body FROM credentials WHERE id = ?1",
                    params![id.as_bytes()],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
                .ok_or_else(|| RepositoryError::CredentialNotFound {
                    credential_id: id.fingerprint(),
                })?;

            let mut credential = decode_credential(&body)?;
            let out = mutate(&mut credential);
            credential.id = id.clone();

            tx.execute(
                r#"
                UPDATE credentials
                SET body = ?2, sign_count = ?3, clone_warning = ?4,
                    revoked_at = ?5, updated_at = ?6
                WHERE id = ?1
                "#,
                params![
                    id.as_bytes(),
                    encode_credential(&credential)?,
                    credential.authenticator.sign_count as i64,
                    credential.authenticator.clone_warning,
                    credential.revoked_at.map(sql_millis),
                    sql_millis(current_timestamp()),
                ],
            )?;

            tx.commit()?;
            Ok(out)
        })
        .await
    }
}

/// Durable session backend. `take` is a single `DELETE … RETURNING`
/// statement, so racing consumers cannot both observe a record.
#[derive(Clone)]
pub struct SqliteSessionBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionBackend {
    pub fn open(path: impl AsRef<Path>) -> RepositoryResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening session store");

        let conn = open_connection(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Sessions share the repository's database file in a separate table.
    pub fn from_config(config: &StorageConfig) -> crate::error::Result<Self> {
        Ok(Self::open(configured_path(config)?)?)
    }

    pub fn open_in_memory() -> RepositoryResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> RepositoryResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ceremony_sessions (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON ceremony_sessions(expires_at);
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl SessionBackend for SqliteSessionBackend {
    async fn put(&self, key: &str, value: Vec<u8>, expires_at: u64) -> RepositoryResult<()> {
        let key = key.to_string();
        with_connection(&self.conn, move |conn| {
            conn.execute(
                r#"
                INSERT INTO ceremony_sessions (key, value, expires_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
                "#,
                params![key, value, sql_millis(expires_at)],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> RepositoryResult<Option<Vec<u8>>> {
        let key = key.to_string();
        with_connection(&self.conn, move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM ceremony_sessions WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn take(&self, key: &str) -> RepositoryResult<Option<Vec<u8>>> {
        let key = key.to_string();
        with_connection(&self.conn, move |conn| {
            let value = conn
                .query_row(
                    "DELETE FROM ceremony_sessions WHERE key = ?1 RETURNING value",
                    params![key],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn evict_expired(&self, now: u64) -> RepositoryResult<usize> {
        with_connection(&self.conn, move |conn| {
            let removed = conn.execute(
                "DELETE FROM ceremony_sessions WHERE expires_at < ?1",
                params![sql_millis(now)],
            )?;
            Ok(removed)
        })
        .await
    }
}
