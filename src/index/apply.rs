//! Restoring recorded metadata onto a downloaded file, a directory, or a
//! recreated symbolic link.
//!
//! Order is owner/group, then permission bits, then mtime: chown clears the
//! setuid/setgid bits, and chmod/chown would not disturb the mtime set last.
//! Each step is attempted independently; failures become warnings on the
//! outcome instead of errors.
//!
//! Links get owner and mtime on the link itself; their permission bits are
//! not meaningful on Linux and are left alone.

use filetime::{FileTime, set_file_mtime, set_symlink_file_times};
use std::fs;
use std::path::Path;
use tracing::{debug, trace};

use super::IndexEntry;
use crate::errors::DropbackError;
use crate::utils::describe_io_error;

/// What was applied to one file, and what could not be.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// Steps that succeeded: "owner", "mode", "mtime".
    pub applied: Vec<&'static str>,
    /// One `DropbackError::Metadata` per failed or skipped step.
    pub warnings: Vec<DropbackError>,
}

impl ApplyOutcome {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    fn warn(&mut self, path: &Path, what: &'static str, context: String) {
        debug!(path = %path.display(), what, %context, "Metadata step not applied");
        self.warnings.push(DropbackError::Metadata {
            path: path.to_path_buf(),
            what,
            context,
        });
    }
}

/// Apply `entry` to the file or directory at `path`.
pub fn apply_entry(path: &Path, entry: &IndexEntry) -> ApplyOutcome {
    let mut out = ApplyOutcome::default();
    apply_owner(path, entry, true, &mut out);
    apply_mode(path, entry, &mut out);
    apply_mtime(path, entry, &mut out);
    out
}

/// Apply `entry` to the symbolic link at `path` without following it.
pub fn apply_link_entry(path: &Path, entry: &IndexEntry) -> ApplyOutcome {
    let mut out = ApplyOutcome::default();
    apply_owner(path, entry, false, &mut out);
    apply_link_mtime(path, entry, &mut out);
    out
}

#[cfg(unix)]
fn apply_owner(path: &Path, entry: &IndexEntry, follow: bool, out: &mut ApplyOutcome) {
    use super::owners::{gid_by_name, uid_by_name};

    // Names win over numeric ids so restores onto another machine land on the same account.
    let uid = entry.owner.as_deref().and_then(uid_by_name).or(entry.uid);
    let gid = entry.group.as_deref().and_then(gid_by_name).or(entry.gid);
    if uid.is_none() && gid.is_none() {
        if entry.owner.is_some() || entry.group.is_some() {
            out.warn(
                path,
                "owner",
                format!(
                    "recorded owner {}:{} is unknown on this system",
                    entry.owner.as_deref().unwrap_or("?"),
                    entry.group.as_deref().unwrap_or("?")
                ),
            );
        }
        return;
    }

    let res = if follow {
        std::os::unix::fs::chown(path, uid, gid)
    } else {
        std::os::unix::fs::lchown(path, uid, gid)
    };
    match res {
        Ok(()) => {
            trace!(path = %path.display(), ?uid, ?gid, "Restored owner");
            out.applied.push("owner");
        }
        Err(e) => out.warn(path, "owner", describe_io_error("chown", path, &e)),
    }
}

#[cfg(not(unix))]
fn apply_owner(path: &Path, entry: &IndexEntry, _follow: bool, out: &mut ApplyOutcome) {
    if entry.uid.is_some() || entry.owner.is_some() {
        out.warn(path, "owner", "ownership cannot be restored on this platform".into());
    }
}

fn apply_mode(path: &Path, entry: &IndexEntry, out: &mut ApplyOutcome) {
    let Some(mode) = entry.mode else { return };

    #[cfg(unix)]
    let perms = {
        use std::os::unix::fs::PermissionsExt;
        fs::Permissions::from_mode(mode & 0o7777)
    };
    #[cfg(not(unix))]
    let perms = match fs::metadata(path) {
        Ok(m) => {
            let mut p = m.permissions();
            p.set_readonly(mode & 0o200 == 0);
            p
        }
        Err(e) => return out.warn(path, "mode", describe_io_error("stat", path, &e)),
    };

    match fs::set_permissions(path, perms) {
        Ok(()) => {
            trace!(path = %path.display(), mode = format!("{:o}", mode), "Restored mode");
            out.applied.push("mode");
        }
        Err(e) => out.warn(path, "mode", describe_io_error("chmod", path, &e)),
    }
}

fn apply_mtime(path: &Path, entry: &IndexEntry, out: &mut ApplyOutcome) {
    let Some(secs) = entry.mtime else { return };
    let mt = FileTime::from_unix_time(secs, entry.mtime_nsec);
    match set_file_mtime(path, mt) {
        Ok(()) => {
            trace!(path = %path.display(), mtime = secs, "Restored mtime");
            out.applied.push("mtime");
        }
        Err(e) => out.warn(path, "mtime", describe_io_error("set mtime", path, &e)),
    }
}

fn apply_link_mtime(path: &Path, entry: &IndexEntry, out: &mut ApplyOutcome) {
    let Some(secs) = entry.mtime else { return };
    let mt = FileTime::from_unix_time(secs, entry.mtime_nsec);
    let atime = fs::symlink_metadata(path)
        .map(|m| FileTime::from_last_access_time(&m))
        .unwrap_or(mt);
    match set_symlink_file_times(path, atime, mt) {
        Ok(()) => {
            trace!(path = %path.display(), mtime = secs, "Restored link mtime");
            out.applied.push("mtime");
        }
        Err(e) => out.warn(path, "mtime", describe_io_error("set link mtime", path, &e)),
    }
}
