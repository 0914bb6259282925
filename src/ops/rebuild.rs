//! Rebuild a target's index from what is actually stored remotely.
//!
//! The result is lossy: only mtime (from Dropbox's client_modified) and size
//! survive. With `keep_known`, entries of the previous index are carried over
//! for paths that still exist, matched case-insensitively like Dropbox does;
//! directory entries come along for folders that are still listed.

use anyhow::Result;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::errors::DropbackError;
use crate::index::{EntryKind, INDEX_FILE_NAME, Index, IndexEntry, capture};
use crate::remote::{BackupTarget, RemoteError, RemoteStore, relative_to_root};
use crate::shutdown;

#[derive(Debug, Default)]
pub struct RebuildReport {
    /// Number of entries in the new index.
    pub entries: usize,
    /// Entries copied from the previous index.
    pub carried_over: usize,
    /// Paths in the previous index with no remote file.
    pub dropped: Vec<String>,
}

/// The previous index, drained as remote paths are matched against it.
struct Previous {
    index: Index,
    /// Lowercased key to the key as stored.
    folded: HashMap<String, String>,
}

impl Previous {
    fn new(index: Index) -> Self {
        let folded = index.entries.keys().map(|k| (k.to_lowercase(), k.clone())).collect();
        Self { index, folded }
    }

    /// Remove and return the entry recorded for `rel` under any casing, if it
    /// has the expected kind.
    fn take(&mut self, rel: &str, kind: EntryKind) -> Option<IndexEntry> {
        let key = if self.index.get(rel).is_some() {
            rel.to_string()
        } else {
            self.folded.get(&rel.to_lowercase())?.clone()
        };
        if self.index.get(&key)?.kind != kind {
            return None;
        }
        self.index.remove(&key)
    }
}

/// Replace the index of `target` with one derived from its remote listing.
pub fn rebuild(store: &dyn RemoteStore, target: &BackupTarget, keep_known: bool) -> Result<RebuildReport> {
    let root = target.remote_root();
    let previous = Index::load(store, target)
        .map_err(DropbackError::from)?
        .unwrap_or_default();
    if keep_known && previous.is_empty() {
        warn!(target = %target, "No readable previous index; nothing to carry over");
    }

    let listing = match store.list(&root) {
        Ok(l) => l,
        Err(RemoteError::NotFound(_)) => {
            return Err(DropbackError::NotFound(format!("backup {target} (remote folder {root})")).into());
        }
        Err(e) => return Err(DropbackError::from(e).into()),
    };

    let mut previous = Previous::new(previous);
    let mut rebuilt = Index::new();
    let mut report = RebuildReport::default();

    for item in listing {
        if shutdown::is_requested() {
            // Nothing written yet; the previous index stays in place.
            return Err(DropbackError::Interrupted.into());
        }
        let entry = item.map_err(DropbackError::from)?;
        let Some(rel) = relative_to_root(&root, &entry.path) else {
            continue;
        };
        if rel == INDEX_FILE_NAME {
            continue;
        }

        let new_entry = if entry.is_file() {
            match previous.take(&rel, EntryKind::File) {
                Some(old) if keep_known => {
                    report.carried_over += 1;
                    old
                }
                _ => capture::from_remote(&entry),
            }
        } else {
            // Folders are only indexed when their recorded metadata is kept.
            match previous.take(&rel, EntryKind::Dir) {
                Some(old) if keep_known => {
                    report.carried_over += 1;
                    old
                }
                _ => continue,
            }
        };
        debug!(path = %rel, lossy = new_entry.is_lossy(), "Indexed");
        rebuilt.insert(rel, new_entry);
    }

    report.dropped = previous.index.entries.into_keys().collect();
    report.entries = rebuilt.len();
    rebuilt.save(store, target).map_err(DropbackError::from)?;

    info!(
        target = %target,
        entries = report.entries,
        carried_over = report.carried_over,
        dropped = report.dropped.len(),
        "Index rebuilt"
    );
    Ok(report)
}
