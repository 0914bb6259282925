//! Metadata index: the `.dropboxbackupmeta` JSON document stored at the root of
//! a backup target. It maps each backed-up relative path to the permission bits,
//! ownership and modification time the content itself cannot carry.
//!
//! Directories and symbolic links are recorded too, so empty folders and links
//! come back on restore even though neither is uploaded as content.
//!
//! Entries created by `rebuild` only know mtime and size; every other field is
//! optional for that reason.

pub mod apply;
pub mod capture;
#[cfg(unix)]
pub mod owners;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::remote::{BackupTarget, RemoteError, RemoteStore};

pub use apply::{ApplyOutcome, apply_entry, apply_link_entry};
pub use capture::MetadataCapture;

/// File name of the index at the remote backup root.
pub const INDEX_FILE_NAME: &str = ".dropboxbackupmeta";
pub const INDEX_VERSION: u32 = 1;

/// What a recorded path was on the source machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    File,
    Dir,
    Symlink,
}

impl EntryKind {
    pub fn is_file(&self) -> bool {
        *self == EntryKind::File
    }
}

/// Recorded metadata for one file, directory or symbolic link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Omitted for files, which keeps documents from older builds readable.
    #[serde(default, skip_serializing_if = "EntryKind::is_file")]
    pub kind: EntryKind,
    /// Link text of a symbolic link, stored verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symlink_target: Option<String>,
    /// Permission bits (including setuid/setgid/sticky), `mode & 0o7777`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    #[serde(default)]
    pub mtime_nsec: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl IndexEntry {
    /// True for entries rebuilt from a listing (no permission or owner data).
    pub fn is_lossy(&self) -> bool {
        self.mode.is_none() && self.uid.is_none() && self.owner.is_none()
    }

    /// Whether `current` describes the same file state as this recorded entry.
    /// Lossy entries never match, so rebuilt files are always re-uploaded.
    pub fn unchanged(&self, current: &IndexEntry) -> bool {
        !self.is_lossy()
            && self.kind == current.kind
            && self.size == current.size
            && self.mtime == current.mtime
            && self.mtime_nsec == current.mtime_nsec
            && self.mode == current.mode
            && self.uid == current.uid
            && self.gid == current.gid
    }

    /// Modification time as a UTC timestamp.
    pub fn modified_utc(&self) -> Option<DateTime<Utc>> {
        self.mtime
            .and_then(|secs| DateTime::from_timestamp(secs, self.mtime_nsec))
    }
}

/// The whole index document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub version: u32,
    #[serde(default)]
    pub entries: BTreeMap<String, IndexEntry>,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, rel: &str) -> Option<&IndexEntry> {
        self.entries.get(rel)
    }

    pub fn insert(&mut self, rel: impl Into<String>, entry: IndexEntry) {
        self.entries.insert(rel.into(), entry);
    }

    pub fn remove(&mut self, rel: &str) -> Option<IndexEntry> {
        self.entries.remove(rel)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    /// Parse an index document; documents newer than this build understands are refused.
    pub fn from_json(bytes: &[u8]) -> Result<Self, String> {
        let index: Index = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        if index.version > INDEX_VERSION {
            return Err(format!(
                "index version {} is newer than supported version {INDEX_VERSION}",
                index.version
            ));
        }
        Ok(index)
    }

    /// Fetch and parse the index of `target`.
    ///
    /// Returns Ok(None) when the target has no index yet, or when the stored
    /// document cannot be parsed (logged as a warning). Transport and auth
    /// failures propagate.
    pub fn load(store: &dyn RemoteStore, target: &BackupTarget) -> Result<Option<Index>, RemoteError> {
        let path = target.index_path();
        let bytes = match store.download_bytes(&path) {
            Ok(b) => b,
            Err(RemoteError::NotFound(_)) => {
                debug!(path = %path, "No index stored yet");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        match Index::from_json(&bytes) {
            Ok(index) => {
                debug!(path = %path, entries = index.len(), "Loaded index");
                Ok(Some(index))
            }
            Err(reason) => {
                warn!(path = %path, error = %reason, "Stored index is unreadable; ignoring it");
                Ok(None)
            }
        }
    }

    /// Upload the index, replacing whatever is stored for `target`.
    pub fn save(&self, store: &dyn RemoteStore, target: &BackupTarget) -> Result<(), RemoteError> {
        let path = target.index_path();
        let bytes = self.to_json().map_err(|e| RemoteError::Transport {
            path: path.clone(),
            reason: format!("encode index: {e}"),
        })?;
        store.upload_bytes(&bytes, &path)?;
        debug!(path = %path, entries = self.len(), "Saved index");
        Ok(())
    }
}
