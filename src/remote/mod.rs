//! Remote storage seam.
//! `RemoteStore` is what the backup/restore/rebuild walkers consume; the Dropbox
//! client implements it, tests implement it in memory.
//!
//! Every operation returns a typed `Result<_, RemoteError>` so callers decide
//! per-file policy with a `match` rather than by inspecting raw responses.

pub mod dropbox;
pub mod oauth;
pub mod target;

use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use dropbox::{Account, DropboxClient, Session};
pub use target::BackupTarget;

/// Failure modes of a single remote call.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Token missing, expired or revoked (HTTP 401).
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("remote path not found: {0}")]
    NotFound(String),

    /// Any other non-success answer from the API.
    #[error("API error on {path} (HTTP {status}): {summary}")]
    Api {
        path: String,
        status: u16,
        summary: String,
    },

    /// Connection, TLS, timeout or body decoding failure.
    #[error("transport error on {path}: {reason}")]
    Transport { path: String, reason: String },

    /// Local side of a transfer failed (reading the source or writing the target).
    #[error("local I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RemoteError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        RemoteError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Remote path the error is about, when known.
    pub fn path_hint(&self) -> Option<&str> {
        match self {
            RemoteError::NotFound(p) => Some(p),
            RemoteError::Api { path, .. } | RemoteError::Transport { path, .. } => Some(path),
            RemoteError::Io { path, .. } => path.to_str(),
            RemoteError::Auth(_) => None,
        }
    }

    /// True when retrying the rest of a walk is pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RemoteError::Auth(_))
    }
}

/// Kind of a listed remote entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    File,
    Folder,
}

/// One entry as reported by the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Absolute remote path with display casing, e.g. `/home/docs/a.txt`.
    pub path: String,
    pub kind: RemoteKind,
    /// Size in bytes (0 for folders).
    pub size: u64,
    /// Client-side modification time recorded at upload, when the store keeps one.
    pub modified: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    pub fn is_file(&self) -> bool {
        self.kind == RemoteKind::File
    }
}

/// Lazily fetched, finite listing of a remote tree.
pub type Listing<'a> = Box<dyn Iterator<Item = Result<RemoteEntry, RemoteError>> + 'a>;

/// Operations the walkers need from a cloud store.
pub trait RemoteStore {
    /// Recursively list everything below `path` (the folder itself excluded).
    fn list(&self, path: &str) -> Result<Listing<'_>, RemoteError>;

    /// Upload a local file, overwriting `remote`. `modified` is kept as the
    /// entry's client-side modification time when the store supports it.
    fn upload(
        &self,
        local: &Path,
        remote: &str,
        modified: Option<DateTime<Utc>>,
    ) -> Result<RemoteEntry, RemoteError>;

    /// Upload an in-memory buffer, overwriting `remote`.
    fn upload_bytes(&self, data: &[u8], remote: &str) -> Result<RemoteEntry, RemoteError>;

    /// Download `remote` into `local` (replacing it).
    fn download(&self, remote: &str, local: &Path) -> Result<RemoteEntry, RemoteError>;

    fn download_bytes(&self, remote: &str) -> Result<Vec<u8>, RemoteError>;

    fn stat(&self, remote: &str) -> Result<RemoteEntry, RemoteError>;

    /// Create a folder (and parents). An existing folder is not an error.
    fn create_folder(&self, remote: &str) -> Result<(), RemoteError>;
}

/// Join a remote root and a `/`-separated relative path.
pub fn join_remote(root: &str, rel: &str) -> String {
    let root = root.trim_end_matches('/');
    let rel = rel.trim_start_matches('/');
    if rel.is_empty() {
        if root.is_empty() { "/".to_string() } else { root.to_string() }
    } else {
        format!("{root}/{rel}")
    }
}

/// Strip `root` from `path`, comparing segments case-insensitively (Dropbox
/// paths are case-insensitive but listings report display casing).
/// Returns the `/`-separated relative path, or None if `path` is not below `root`.
pub fn relative_to_root(root: &str, path: &str) -> Option<String> {
    let mut root_segs = root.split('/').filter(|s| !s.is_empty());
    let mut path_segs = path.split('/').filter(|s| !s.is_empty());
    for r in root_segs.by_ref() {
        match path_segs.next() {
            Some(p) if p.to_lowercase() == r.to_lowercase() => {}
            _ => return None,
        }
    }
    let rest: Vec<&str> = path_segs.collect();
    if rest.is_empty() {
        None
    } else {
        Some(rest.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_handles_slashes() {
        assert_eq!(join_remote("/home", "a/b.txt"), "/home/a/b.txt");
        assert_eq!(join_remote("/home/", "/a.txt"), "/home/a.txt");
        assert_eq!(join_remote("/home", ""), "/home");
        assert_eq!(join_remote("", ""), "/");
    }

    #[test]
    fn relative_is_case_insensitive() {
        assert_eq!(
            relative_to_root("/home/Docs", "/Home/docs/Sub/A.txt").as_deref(),
            Some("Sub/A.txt")
        );
    }

    #[test]
    fn relative_rejects_outside_and_root_itself() {
        assert_eq!(relative_to_root("/home/docs", "/home/other/a.txt"), None);
        assert_eq!(relative_to_root("/home/docs", "/home/docs"), None);
        assert_eq!(relative_to_root("/home/docs", "/home"), None);
    }

    #[test]
    fn auth_is_fatal_others_are_not() {
        assert!(RemoteError::Auth("x".into()).is_fatal());
        assert!(!RemoteError::NotFound("/x".into()).is_fatal());
    }
}
