//! The user-facing flows. Each takes an explicit `RemoteStore` (normally the
//! session's Dropbox client) and returns a report of what happened per file.

pub mod backup;
pub mod connect;
pub mod rebuild;
pub mod restore;

use std::fmt;
use std::path::PathBuf;

pub use backup::{BackupOptions, BackupReport, backup};
pub use connect::{Authorizer, ConnectOptions, DropboxAuthorizer, connect, disconnect};
pub use rebuild::{RebuildReport, rebuild};
pub use restore::{RestoreReport, restore};

/// A local entry the backup walker did not upload, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub path: PathBuf,
    pub reason: &'static str,
}

impl fmt::Display for Skipped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path.display(), self.reason)
    }
}
