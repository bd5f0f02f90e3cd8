//! Per-conversation moderation flags.
//!
//! A plain owned map handed to the [`EventRouter`](crate::router::EventRouter).
//! Mutations are synchronous and visible to the very next lookup. Binding the
//! state to a file is optional; the snapshot is rewritten atomically after a
//! flag changes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::ConversationId;

/// Conversation-scoped moderation feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Feature {
    /// Delete status mentions posted into the conversation.
    #[serde(rename = "antistatus")]
    AntiStatusMention,
}

impl Feature {
    /// Command keyword for the feature.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AntiStatusMention => "antistatus",
        }
    }

    /// All features, in command-matching order.
    pub fn all() -> &'static [Feature] {
        &[Self::AntiStatusMention]
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suffix given to an unreadable snapshot when it is moved aside.
const CORRUPT_SUFFIX: &str = "corrupt";

/// Flag map keyed by conversation.
pub type FlagMap = BTreeMap<ConversationId, BTreeMap<Feature, bool>>;

/// In-memory moderation state with optional file persistence.
#[derive(Debug, Default)]
pub struct ModerationState {
    flags: FlagMap,
    persist_path: Option<PathBuf>,
}

impl ModerationState {
    /// Empty, memory-only state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot from `path` and keep persisting back to it.
    ///
    /// A missing file yields empty state.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_from(path: &Path) -> anyhow::Result<Self> {
        let flags = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FlagMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        Ok(Self {
            flags,
            persist_path: Some(path.to_owned()),
        })
    }

    /// Load from `path`, moving an unreadable snapshot aside.
    ///
    /// A snapshot that fails to load is renamed to `<name>.corrupt` and the
    /// state starts empty, still bound to `path`. If the rename fails too,
    /// the state is memory-only so the bad file is never overwritten.
    pub async fn open(path: &Path) -> Self {
        let err = match Self::load_from(path).await {
            Ok(state) => return state,
            Err(e) => e,
        };

        let aside = quarantine_path(path);
        match tokio::fs::rename(path, &aside).await {
            Ok(()) => {
                warn!(
                    error = %err,
                    moved_to = %aside.display(),
                    "moderation flags unreadable, moved aside and starting empty"
                );
                Self {
                    flags: FlagMap::new(),
                    persist_path: Some(path.to_owned()),
                }
            }
            Err(rename_err) => {
                warn!(
                    error = %err,
                    rename_error = %rename_err,
                    path = %path.display(),
                    "moderation flags unreadable, running without persistence"
                );
                Self::new()
            }
        }
    }

    /// Whether changes are written back to a file.
    pub fn is_persistent(&self) -> bool {
        self.persist_path.is_some()
    }

    /// Set a feature flag. Returns `true` if the stored value changed.
    ///
    /// The entry is created on first toggle, so switching a feature off
    /// records an explicit `false`.
    pub fn set_flag(&mut self, conversation: &ConversationId, feature: Feature, enabled: bool) -> bool {
        let entry = self.flags.entry(conversation.clone()).or_default();
        let previous = entry.insert(feature, enabled);
        previous != Some(enabled)
    }

    /// Whether `feature` is on for `conversation`. Unknown conversations are off.
    pub fn is_enabled(&self, conversation: &ConversationId, feature: Feature) -> bool {
        self.flags
            .get(conversation)
            .and_then(|features| features.get(&feature))
            .copied()
            .unwrap_or(false)
    }

    /// Read-only view of the whole map.
    pub fn flags(&self) -> &FlagMap {
        &self.flags
    }

    /// Write the snapshot to the bound file, if any.
    ///
    /// Writes to a temp file first and renames it over the target.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or file operations fail.
    pub async fn persist(&self) -> anyhow::Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };

        let json = serde_json::to_vec_pretty(&self.flags)
            .context("failed to serialize moderation flags")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .context("failed to write moderation temp file")?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .context("failed to rename moderation temp file")?;

        debug!(path = %path.display(), "moderation flags persisted");
        Ok(())
    }
}

/// `moderation.json` becomes `moderation.json.corrupt`.
fn quarantine_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(CORRUPT_SUFFIX);
    path.with_file_name(name)
}
