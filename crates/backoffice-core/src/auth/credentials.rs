use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::storage::{KeyValueStore, MemoryStore, StorageError};
use super::token;

/// Durable key holding the token pair and refresh expiry as one record
const CREDENTIAL_KEY: &str = "credential";

/// Durable key holding [`SessionMetadata`]
const METADATA_KEY: &str = "session_metadata";

/// Durable key holding the opaque [`PersistedSession`] blob
const PERSISTED_SESSION_KEY: &str = "persisted_session";

/// Every key removed on logout
const SESSION_KEYS: [&str; 3] = [CREDENTIAL_KEY, METADATA_KEY, PERSISTED_SESSION_KEY];

/// Bearer credential pair.
///
/// Also used as a partial update: `None` fields leave the stored value alone
/// (see [`CredentialStore::set`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Milliseconds since the epoch on the wire
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    #[cfg_attr(feature = "ts", ts(type = "number | null"))]
    pub refresh_token_expiry: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        refresh_token_expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token: Some(refresh_token.into()),
            refresh_token_expiry: Some(refresh_token_expiry),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none()
            && self.refresh_token.is_none()
            && self.refresh_token_expiry.is_none()
    }

    /// Overwrite the fields that are present in `update`.
    pub fn merge(&mut self, update: &Credential) {
        if let Some(ref access_token) = update.access_token {
            self.access_token = Some(access_token.clone());
        }
        if let Some(ref refresh_token) = update.refresh_token {
            self.refresh_token = Some(refresh_token.clone());
        }
        if let Some(expiry) = update.refresh_token_expiry {
            self.refresh_token_expiry = Some(expiry);
        }
    }
}

/// Auxiliary flags stored next to the credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(default)]
    pub password_forceful: bool,
    #[serde(default)]
    pub profile_complete: bool,
}

/// User profile, permissions and groups returned at login.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default)]
    pub user: serde_json::Value,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Session state persisted in a [`KeyValueStore`].
///
/// Reads never fail: a missing or unreadable record reads as empty. Writes to
/// the credential are merges performed under a lock, so the access and refresh
/// tokens are never observed half-updated.
pub struct CredentialStore {
    backend: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
    changes: watch::Sender<u64>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            backend,
            write_lock: Mutex::new(()),
            changes,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Current credential; absent fields are `None`.
    pub fn get(&self) -> Credential {
        self.read_lenient(CREDENTIAL_KEY).unwrap_or_default()
    }

    pub fn access_token(&self) -> Option<String> {
        self.get().access_token
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.get().refresh_token
    }

    /// Merge `update` into the stored credential.
    pub fn set(&self, update: &Credential) -> Result<(), StorageError> {
        if update.is_empty() {
            return Ok(());
        }
        {
            let _guard = self.write_lock.lock().map_err(|_| StorageError::Poisoned)?;
            let mut current: Credential = match self.read_strict(CREDENTIAL_KEY) {
                Ok(current) => current.unwrap_or_default(),
                Err(StorageError::Serialization(e)) => {
                    warn!(error = %e, "Replacing unreadable credential record");
                    Credential::default()
                }
                Err(e) => return Err(e),
            };
            current.merge(update);
            self.write(CREDENTIAL_KEY, &current)?;
        }
        debug!(
            access = update.access_token.is_some(),
            refresh = update.refresh_token.is_some(),
            "Credential updated"
        );
        self.notify();
        Ok(())
    }

    /// Remove the credential, metadata and persisted session.
    ///
    /// Every key is attempted even if an earlier removal fails; the first
    /// error is returned.
    pub fn clear(&self) -> Result<(), StorageError> {
        let result = {
            let _guard = self.write_lock.lock().map_err(|_| StorageError::Poisoned)?;
            SESSION_KEYS
                .iter()
                .map(|key| self.backend.remove(key))
                .fold(Ok(()), |acc, res| acc.and(res))
        };
        debug!("Session storage cleared");
        self.notify();
        result
    }

    pub fn metadata(&self) -> SessionMetadata {
        self.read_lenient(METADATA_KEY).unwrap_or_default()
    }

    pub fn set_metadata(&self, metadata: &SessionMetadata) -> Result<(), StorageError> {
        {
            let _guard = self.write_lock.lock().map_err(|_| StorageError::Poisoned)?;
            self.write(METADATA_KEY, metadata)?;
        }
        self.notify();
        Ok(())
    }

    pub fn persisted_session(&self) -> Option<PersistedSession> {
        self.read_lenient(PERSISTED_SESSION_KEY)
    }

    pub fn set_persisted_session(&self, session: &PersistedSession) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::Poisoned)?;
        self.write(PERSISTED_SESSION_KEY, session)
    }

    /// Whether the stored session can no longer be recovered.
    pub fn is_session_expired(&self) -> bool {
        token::is_session_expired(&self.get())
    }

    /// Receiver that changes on every credential or metadata write and on clear.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }

    fn read_strict<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.backend.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn read_lenient<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.read_strict(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Unreadable session record, treating as absent");
                None
            }
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        self.backend.set(key, &raw)
    }
}
