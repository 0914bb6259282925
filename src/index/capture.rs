//! Building index entries from local files and from remote listings.

use filetime::FileTime;
use std::collections::HashMap;
use std::fs;

use super::{EntryKind, IndexEntry};
use crate::remote::RemoteEntry;

/// Captures entries from local metadata, caching uid/gid name lookups for the
/// duration of one walk.
#[derive(Debug, Default)]
pub struct MetadataCapture {
    users: HashMap<u32, Option<String>>,
    groups: HashMap<u32, Option<String>>,
}

impl MetadataCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for a file, directory or link, from `symlink_metadata` of it.
    /// A link's target is filled in by the caller.
    #[cfg(unix)]
    pub fn capture(&mut self, meta: &fs::Metadata) -> IndexEntry {
        use std::os::unix::fs::MetadataExt;

        let uid = meta.uid();
        let gid = meta.gid();
        let owner = self
            .users
            .entry(uid)
            .or_insert_with(|| super::owners::user_name(uid))
            .clone();
        let group = self
            .groups
            .entry(gid)
            .or_insert_with(|| super::owners::group_name(gid))
            .clone();

        IndexEntry {
            kind: kind_of(meta),
            mode: Some(meta.mode() & 0o7777),
            uid: Some(uid),
            gid: Some(gid),
            owner,
            group,
            mtime: Some(meta.mtime()),
            mtime_nsec: meta.mtime_nsec().clamp(0, 999_999_999) as u32,
            size: meta.is_file().then(|| meta.len()),
            ..Default::default()
        }
    }

    /// Without POSIX metadata only the read-only bit, mtime and size are kept.
    #[cfg(not(unix))]
    pub fn capture(&mut self, meta: &fs::Metadata) -> IndexEntry {
        let mt = FileTime::from_last_modification_time(meta);
        IndexEntry {
            kind: kind_of(meta),
            mode: Some(if meta.permissions().readonly() { 0o444 } else { 0o644 }),
            mtime: Some(mt.unix_seconds()),
            mtime_nsec: mt.nanoseconds(),
            size: meta.is_file().then(|| meta.len()),
            ..Default::default()
        }
    }
}

fn kind_of(meta: &fs::Metadata) -> EntryKind {
    let ft = meta.file_type();
    if ft.is_symlink() {
        EntryKind::Symlink
    } else if ft.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::File
    }
}

/// Lossy entry for a file or folder known only from a remote listing.
pub fn from_remote(entry: &RemoteEntry) -> IndexEntry {
    let is_file = entry.is_file();
    let mtime = entry
        .modified
        .map(|t| FileTime::from_unix_time(t.timestamp(), t.timestamp_subsec_nanos()));
    IndexEntry {
        kind: if is_file { EntryKind::File } else { EntryKind::Dir },
        mtime: mtime.map(|t| t.unix_seconds()),
        mtime_nsec: mtime.map(|t| t.nanoseconds()).unwrap_or(0),
        size: is_file.then_some(entry.size),
        ..Default::default()
    }
}
