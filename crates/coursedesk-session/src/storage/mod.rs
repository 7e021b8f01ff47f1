//! Persistence for the session between runs.
//!
//! This module provides:
//! - `KeyValueStore`: the storage port, with in-memory, file and OS keychain backends
//! - `SessionStore`: the versioned session layout on top of any backend
//!
//! The credential is stored as an opaque string, the identity as a versioned
//! JSON record, and the last-active stamp as RFC 3339 text.

pub mod file;
pub mod keychain;
pub mod memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::auth::{AuthSession, Credential, Identity};

pub use file::FileStore;
pub use keychain::KeyringStore;
pub use memory::MemoryStore;

pub const CREDENTIAL_KEY: &str = "credential";
pub const IDENTITY_KEY: &str = "identity";
pub const LAST_ACTIVE_KEY: &str = "last_active";

/// Version of the identity record layout. Records with any other version are rejected.
const SCHEMA_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keychain error: {0}")]
    Keychain(#[from] keyring::Error),

    #[error("Corrupt session data: {0}")]
    Corrupt(String),
}

/// Synchronous string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct IdentityRecord {
    version: u32,
    identity: Identity,
}

/// Session layout over a `KeyValueStore`.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Load the persisted credential and identity.
    ///
    /// Returns `StorageError::Corrupt` when only one half of the pair is present or the
    /// identity record cannot be read.
    pub fn load(&self) -> Result<Option<AuthSession>, StorageError> {
        let credential = self.backend.get(CREDENTIAL_KEY)?;
        let identity = self.backend.get(IDENTITY_KEY)?;

        match (credential, identity) {
            (None, None) => Ok(None),
            (Some(credential), Some(identity)) => {
                let record: IdentityRecord = serde_json::from_str(&identity)
                    .map_err(|e| StorageError::Corrupt(format!("identity record: {}", e)))?;
                if record.version != SCHEMA_VERSION {
                    return Err(StorageError::Corrupt(format!(
                        "unsupported identity record version {}",
                        record.version
                    )));
                }
                Ok(Some(AuthSession {
                    credential: Credential::new(credential),
                    identity: record.identity,
                }))
            }
            _ => Err(StorageError::Corrupt(
                "credential and identity slots out of sync".to_string(),
            )),
        }
    }

    pub fn save(&self, session: &AuthSession) -> Result<(), StorageError> {
        let record = IdentityRecord {
            version: SCHEMA_VERSION,
            identity: session.identity.clone(),
        };
        let identity = serde_json::to_string(&record)
            .map_err(|e| StorageError::Corrupt(format!("identity record: {}", e)))?;
        let written = self
            .backend
            .set(IDENTITY_KEY, &identity)
            .and_then(|()| self.backend.set(CREDENTIAL_KEY, session.credential.token()));
        if let Err(e) = written {
            // A new identity must never sit next to an old credential.
            if let Err(cleanup) = self.clear() {
                warn!(error = %cleanup, "Failed to roll back partial session write");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove both halves of the session. Both removals are attempted even if one fails.
    pub fn clear(&self) -> Result<(), StorageError> {
        let credential = self.backend.remove(CREDENTIAL_KEY);
        let identity = self.backend.remove(IDENTITY_KEY);
        credential.and(identity)
    }

    /// An unreadable stamp reads as absent, which the inactivity check treats as idle.
    pub fn load_last_active(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self
            .backend
            .get(LAST_ACTIVE_KEY)?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|at| at.with_timezone(&Utc)))
    }

    pub fn save_last_active(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.backend.set(LAST_ACTIVE_KEY, &at.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::identity;
    use crate::auth::Role;

    fn store() -> (Arc<MemoryStore>, SessionStore) {
        let backend = Arc::new(MemoryStore::new());
        (backend.clone(), SessionStore::new(backend))
    }

    /// Backend whose writes to one slot always fail.
    struct FailingSlot {
        inner: MemoryStore,
        key: &'static str,
    }

    impl KeyValueStore for FailingSlot {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if key == self.key {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key)
        }
    }

    fn session() -> AuthSession {
        AuthSession {
            credential: Credential::new("tok"),
            identity: identity(Role::Student),
        }
    }

    #[test]
    fn test_empty_store_loads_none() {
        let (_, store) = store();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_writes_both_slots() {
        let (backend, store) = store();
        store.save(&session()).unwrap();

        assert_eq!(backend.get(CREDENTIAL_KEY).unwrap().as_deref(), Some("tok"));
        let raw = backend.get(IDENTITY_KEY).unwrap().unwrap();
        assert!(raw.contains(r#""version":1"#));
        assert_eq!(store.load().unwrap(), Some(session()));
    }

    #[test]
    fn test_failed_credential_write_leaves_no_half_pair() {
        let backend = Arc::new(FailingSlot {
            inner: MemoryStore::new(),
            key: CREDENTIAL_KEY,
        });
        backend.inner.set(CREDENTIAL_KEY, "old-token").unwrap();
        backend.inner.set(IDENTITY_KEY, "old-identity").unwrap();
        let store = SessionStore::new(backend.clone());

        assert!(matches!(store.save(&session()), Err(StorageError::Io(_))));

        assert!(backend.get(CREDENTIAL_KEY).unwrap().is_none());
        assert!(backend.get(IDENTITY_KEY).unwrap().is_none());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_clear_removes_both_slots_and_keeps_activity() {
        let (backend, store) = store();
        store.save(&session()).unwrap();
        store.save_last_active(Utc::now()).unwrap();

        store.clear().unwrap();
        store.clear().unwrap();

        assert!(backend.get(CREDENTIAL_KEY).unwrap().is_none());
        assert!(backend.get(IDENTITY_KEY).unwrap().is_none());
        assert!(store.load_last_active().unwrap().is_some());
    }

    #[test]
    fn test_half_written_session_is_corrupt() {
        let (backend, store) = store();
        backend.set(CREDENTIAL_KEY, "tok").unwrap();
        assert!(matches!(store.load(), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_unknown_version_is_corrupt() {
        let (backend, store) = store();
        backend.set(CREDENTIAL_KEY, "tok").unwrap();
        backend
            .set(
                IDENTITY_KEY,
                r#"{"version":2,"identity":{"id":"1","email":"e","username":"u","name":"n","role":"admin"}}"#,
            )
            .unwrap();
        assert!(matches!(store.load(), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_unversioned_identity_is_corrupt() {
        let (backend, store) = store();
        backend.set(CREDENTIAL_KEY, "tok").unwrap();
        backend
            .set(IDENTITY_KEY, r#"{"id":"1","email":"e","username":"u","name":"n","role":"admin"}"#)
            .unwrap();
        assert!(matches!(store.load(), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_last_active_stamp() {
        let (backend, store) = store();
        assert!(store.load_last_active().unwrap().is_none());

        let at = DateTime::from_timestamp(1_750_000_000, 0).unwrap();
        store.save_last_active(at).unwrap();
        assert_eq!(store.load_last_active().unwrap(), Some(at));

        backend.set(LAST_ACTIVE_KEY, "yesterday").unwrap();
        assert!(store.load_last_active().unwrap().is_none());
    }
}
