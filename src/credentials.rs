//! Durable credential store for the transport session.
//!
//! One agent owns one credential record, `session/creds.json`. Every save
//! replaces the record wholesale through a temp file and an atomic rename,
//! so `load()` only ever observes a complete record: either the previous
//! one or the new one.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// File name of the credential record inside the session directory.
pub const CREDS_FILE: &str = "creds.json";

/// Suffix of the in-flight temp file written before the rename.
const TMP_SUFFIX: &str = "tmp";

/// Opaque authentication material handed to the transport.
///
/// The only field the agent itself interprets is the optional session id
/// used to seed a fresh store. Everything else (identity keys, registration
/// state, signal keys) round-trips untouched.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    /// Session identifier supplied at login, if the record was seeded from one.
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Transport-owned key material.
    #[serde(flatten)]
    pub material: BTreeMap<String, serde_json::Value>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("session_id", &self.session_id.as_ref().map(|_| "[REDACTED]"))
            .field("keys", &self.material.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Build a record that carries only a session id.
    pub fn from_session_id(session_id: String) -> Self {
        Self {
            session_id: Some(session_id),
            material: BTreeMap::new(),
        }
    }
}

/// Errors from the credential store.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// No record has been saved yet (or it was cleared).
    #[error("no stored credentials at {}", .0.display())]
    NotFound(PathBuf),

    /// A filesystem operation failed.
    #[error("credential store I/O failed at {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The record exists but is not valid JSON.
    #[error("stored credentials at {} are corrupt: {source}", path.display())]
    Corrupt {
        /// Path of the unreadable record.
        path: PathBuf,
        /// Parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The record could not be serialized.
    #[error("failed to serialize credentials: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CredentialError {
    /// Returns `true` for the "never initialized" case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Durable storage for one credential record.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the last successfully saved record.
    async fn load(&self) -> Result<Credentials, CredentialError>;

    /// Replace the stored record atomically.
    async fn save(&self, credentials: &Credentials) -> Result<(), CredentialError>;

    /// Remove every trace of the stored record.
    async fn clear(&self) -> Result<(), CredentialError>;
}

/// File-backed store rooted at a session directory.
#[derive(Debug)]
pub struct FileCredentialStore {
    dir: PathBuf,
    /// Serialises writers so concurrent saves never share the temp file.
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// The session directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the credential record.
    pub fn record_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }

    /// Path of the temp file used during saves.
    pub fn temp_path(&self) -> PathBuf {
        self.record_path().with_extension(format!("json.{TMP_SUFFIX}"))
    }

    async fn write_temp(&self, tmp_path: &Path, bytes: &[u8]) -> Result<(), CredentialError> {
        let io_err = |source| CredentialError::Io {
            path: tmp_path.to_owned(),
            source,
        };

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(tmp_path).await.map_err(io_err)?;
        file.write_all(bytes).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Credentials, CredentialError> {
        let path = self.record_path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CredentialError::NotFound(path));
            }
            Err(source) => return Err(CredentialError::Io { path, source }),
        };

        serde_json::from_slice(&bytes).map_err(|source| CredentialError::Corrupt { path, source })
    }

    async fn save(&self, credentials: &Credentials) -> Result<(), CredentialError> {
        let json = serde_json::to_vec_pretty(credentials)?;
        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| CredentialError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let tmp_path = self.temp_path();
        let path = self.record_path();
        self.write_temp(&tmp_path, &json).await?;

        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| CredentialError::Io {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), "credentials saved");
        Ok(())
    }

    async fn clear(&self) -> Result<(), CredentialError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                info!(dir = %self.dir.display(), "session directory cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CredentialError::Io {
                path: self.dir.clone(),
                source,
            }),
        }
    }
}

/// Ensure a session id carries the expected prefix.
///
/// Surrounding whitespace is trimmed; an empty prefix leaves the id as-is.
pub fn normalize_session_id(raw: &str, prefix: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with(prefix) {
        trimmed.to_owned()
    } else {
        format!("{prefix}{trimmed}")
    }
}

/// Seed a store with a session id, replacing any existing record.
///
/// # Errors
///
/// Returns an error when the record cannot be written.
pub async fn seed_session_id(
    store: &dyn CredentialStore,
    raw: &str,
    prefix: &str,
) -> Result<(), CredentialError> {
    let credentials = Credentials::from_session_id(normalize_session_id(raw, prefix));
    store.save(&credentials).await
}
