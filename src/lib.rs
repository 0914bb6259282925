//! Core library for `dropback`.
//!
//! Backs up local directory trees to Dropbox and restores them, keeping
//! permission bits, ownership and modification times in a JSON index stored
//! next to the content. The binary is a thin layer over these modules:
//! credentials + config in, a `Session` built once, then one of the flows in
//! [`ops`].

pub mod cli;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod index;
pub mod ops;
pub mod output;
pub mod platform;
pub mod remote;
pub mod shutdown;
pub mod utils;

pub use config::types::{Config, LogLevel};
pub use config::{CONFIG_ENV, default_config_path, path_has_symlink_ancestor};
pub use credentials::{CredentialStore, Credentials, SaveLocation};
pub use errors::DropbackError;
pub use index::{EntryKind, INDEX_FILE_NAME, Index, IndexEntry};
pub use ops::{BackupOptions, BackupReport, RebuildReport, RestoreReport, Skipped};
pub use remote::{BackupTarget, RemoteEntry, RemoteError, RemoteKind, RemoteStore};
