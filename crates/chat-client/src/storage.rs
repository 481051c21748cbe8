//! Credential persistence.
//!
//! The only state that outlives the process is the credential pair and the
//! display name, stored under fixed keys (`access_token`, `refresh_token`,
//! `username`). Absence of any key is treated as logged out.

use crate::errors::StorageError;
use common::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::NamedTempFile;
use tracing::debug;

/// Credentials as persisted. Every field is optional.
#[derive(Clone, Default)]
pub struct StoredCredentials {
    pub access_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub username: Option<String>,
}

impl fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("username", &self.username)
            .finish()
    }
}

impl StoredCredentials {
    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.username.is_none()
    }
}

/// Backing store for [`StoredCredentials`].
pub trait CredentialStore: Send + Sync {
    /// Read the stored credentials. Missing storage is `Ok(default)`.
    fn load(&self) -> Result<StoredCredentials, StorageError>;

    /// Replace the stored credentials.
    fn store(&self, credentials: &StoredCredentials) -> Result<(), StorageError>;

    /// Remove all stored credentials. Clearing empty storage succeeds.
    fn clear(&self) -> Result<(), StorageError>;
}

/// On-disk layout. Plain strings because `SecretString` does not serialize.
#[derive(Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
}

/// JSON file credential store.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<StoredCredentials, StorageError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(target: "chat.storage", path = %self.path.display(), "No credential file");
                return Ok(StoredCredentials::default());
            }
            Err(e) => return Err(e.into()),
        };

        let file: CredentialFile = serde_json::from_str(&raw)?;
        Ok(StoredCredentials {
            access_token: file.access_token.map(SecretString::from),
            refresh_token: file.refresh_token.map(SecretString::from),
            username: file.username,
        })
    }

    fn store(&self, credentials: &StoredCredentials) -> Result<(), StorageError> {
        let file = CredentialFile {
            access_token: credentials
                .access_token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
            refresh_token: credentials
                .refresh_token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
            username: credentials.username.clone(),
        };

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        // Temp files are created owner-only (0600 on unix) and renamed into
        // place, so the tokens are never readable by other users.
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&serde_json::to_vec_pretty(&file)?)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process credential store. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    inner: Arc<Mutex<StoredCredentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `credentials`.
    pub fn with_credentials(credentials: StoredCredentials) -> Self {
        Self {
            inner: Arc::new(Mutex::new(credentials)),
        }
    }

    /// Snapshot of the current contents.
    pub fn snapshot(&self) -> StoredCredentials {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<StoredCredentials, StorageError> {
        Ok(self.snapshot())
    }

    fn store(&self, credentials: &StoredCredentials) -> Result<(), StorageError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = credentials.clone();
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = StoredCredentials::default();
        Ok(())
    }
}
