//! Restore walker: download a backup target into a local directory and
//! re-apply the recorded owner, permission bits and mtime.
//!
//! Phases: recorded directories are created, files are downloaded, links are
//! recreated, and directory metadata is applied last, deepest first, so that
//! writing children does not disturb a parent's mtime or trip over its mode.

use anyhow::Result;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::errors::DropbackError;
use crate::index::{
    ApplyOutcome, EntryKind, INDEX_FILE_NAME, Index, IndexEntry, apply_entry, apply_link_entry,
};
use crate::remote::{BackupTarget, RemoteError, RemoteStore, relative_to_root};
use crate::shutdown;
use crate::utils::{describe_io_error, safe_join};

#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Relative paths whose content was written.
    pub restored: Vec<String>,
    /// Restored paths whose recorded metadata was applied without any warning.
    pub metadata_applied: Vec<String>,
    /// One `DropbackError::Metadata` per metadata step that failed or was skipped.
    pub metadata_warnings: Vec<DropbackError>,
    /// Restored paths with no index entry (default metadata kept).
    pub content_only: Vec<String>,
    /// Recorded directories created or found in place.
    pub directories: Vec<String>,
    /// Symbolic links recreated.
    pub links: Vec<String>,
    pub failed: Vec<DropbackError>,
    /// True when the target had no readable index.
    pub index_missing: bool,
}

impl RestoreReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Index lookup tolerant of Dropbox's case-insensitive paths.
struct Lookup<'a> {
    index: &'a Index,
    folded: HashMap<String, &'a IndexEntry>,
}

impl<'a> Lookup<'a> {
    fn new(index: &'a Index) -> Self {
        let folded = index
            .entries
            .iter()
            .filter(|(_, v)| v.kind.is_file())
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        Self { index, folded }
    }

    /// Recorded file entry for `rel`.
    fn get(&self, rel: &str) -> Option<&'a IndexEntry> {
        self.index
            .get(rel)
            .filter(|e| e.kind.is_file())
            .or_else(|| self.folded.get(&rel.to_lowercase()).copied())
    }
}

/// Restore every file of `target` below `dest`, with the directories and
/// symbolic links its index records.
///
/// `dest` must already exist. Download failures and refused paths are
/// recorded per file; metadata problems are warnings and never fail a file.
pub fn restore(store: &dyn RemoteStore, target: &BackupTarget, dest: &Path) -> Result<RestoreReport> {
    if !dest.is_dir() {
        return Err(DropbackError::NotFound(format!("destination directory {}", dest.display())).into());
    }

    let mut report = RestoreReport::default();
    let index = Index::load(store, target).map_err(DropbackError::from)?;
    if index.is_none() {
        warn!(target = %target, "No metadata index found; restoring content only");
        report.index_missing = true;
    }
    let lookup = index.as_ref().map(Lookup::new);

    let root = target.remote_root();
    let listing = match store.list(&root) {
        Ok(l) => l,
        Err(RemoteError::NotFound(_)) => {
            return Err(DropbackError::NotFound(format!("backup {target} (remote folder {root})")).into());
        }
        Err(e) => return Err(DropbackError::from(e).into()),
    };
    info!(target = %target, dest = %dest.display(), "Starting restore");

    let dirs = match &index {
        Some(idx) => create_directories(idx, dest, &mut report)?,
        None => Vec::new(),
    };

    for item in listing {
        if shutdown::is_requested() {
            warn!(restored = report.restored.len(), "Restore interrupted");
            return Err(DropbackError::Interrupted.into());
        }
        let entry = item.map_err(DropbackError::from)?;
        if !entry.is_file() {
            continue;
        }
        let Some(rel) = relative_to_root(&root, &entry.path) else {
            debug!(path = %entry.path, "Listed entry outside backup root; ignoring");
            continue;
        };
        if rel == INDEX_FILE_NAME {
            continue;
        }

        let Some(local) = safe_join(dest, &rel) else {
            warn!(path = %entry.path, "Refusing path that escapes the destination");
            report.failed.push(DropbackError::Transfer {
                path: entry.path.clone(),
                reason: "path escapes the destination directory".into(),
            });
            continue;
        };

        if let Some(parent) = local.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            report.failed.push(DropbackError::Transfer {
                path: rel,
                reason: describe_io_error("create directory", parent, &e),
            });
            continue;
        }

        match store.download(&entry.path, &local) {
            Ok(_) => debug!(path = %rel, "Downloaded"),
            Err(e) if e.is_fatal() => return Err(DropbackError::from(e).into()),
            Err(e) => {
                warn!(path = %rel, error = %e, "Download failed");
                report.failed.push(DropbackError::Transfer {
                    path: rel,
                    reason: e.to_string(),
                });
                continue;
            }
        }

        match lookup.as_ref().and_then(|l| l.get(&rel)) {
            Some(recorded) => record_outcome(&mut report, &rel, apply_entry(&local, recorded)),
            None => report.content_only.push(rel.clone()),
        }
        report.restored.push(rel);
    }

    if let Some(idx) = &index {
        restore_links(idx, dest, &mut report)?;
    }

    // Deepest first: a parent's mode may forbid writing into it.
    for (rel, local, recorded) in dirs.iter().rev() {
        if shutdown::is_requested() {
            return Err(DropbackError::Interrupted.into());
        }
        record_outcome(&mut report, rel, apply_entry(local, recorded));
    }

    info!(
        restored = report.restored.len(),
        directories = report.directories.len(),
        links = report.links.len(),
        metadata_applied = report.metadata_applied.len(),
        warnings = report.metadata_warnings.len(),
        content_only = report.content_only.len(),
        failed = report.failed.len(),
        "Restore finished"
    );
    Ok(report)
}

fn record_outcome(report: &mut RestoreReport, rel: &str, outcome: ApplyOutcome) {
    if outcome.is_clean() {
        report.metadata_applied.push(rel.to_string());
    } else {
        for w in &outcome.warnings {
            warn!(warning = %w, "Metadata not fully restored");
        }
        report.metadata_warnings.extend(outcome.warnings);
    }
}

/// Create every recorded directory, parents first. Returns the ones that now
/// exist, in index order, for the final metadata pass.
fn create_directories<'a>(
    index: &'a Index,
    dest: &Path,
    report: &mut RestoreReport,
) -> Result<Vec<(String, PathBuf, &'a IndexEntry)>> {
    let mut created = Vec::new();
    for (rel, recorded) in index.entries.iter().filter(|(_, e)| e.kind == EntryKind::Dir) {
        if shutdown::is_requested() {
            return Err(DropbackError::Interrupted.into());
        }
        let Some(local) = safe_join(dest, rel) else {
            refuse_escape(report, rel);
            continue;
        };
        if let Err(e) = fs::create_dir_all(&local) {
            report.failed.push(DropbackError::Transfer {
                path: rel.clone(),
                reason: describe_io_error("create directory", &local, &e),
            });
            continue;
        }
        debug!(path = %rel, "Directory in place");
        report.directories.push(rel.clone());
        created.push((rel.clone(), local, recorded));
    }
    Ok(created)
}

/// Recreate recorded links, deepest first so no link is created before a
/// path below it.
fn restore_links(index: &Index, dest: &Path, report: &mut RestoreReport) -> Result<()> {
    let links = index
        .entries
        .iter()
        .rev()
        .filter(|(_, e)| e.kind == EntryKind::Symlink);
    for (rel, recorded) in links {
        if shutdown::is_requested() {
            return Err(DropbackError::Interrupted.into());
        }
        let Some(link_target) = recorded.symlink_target.as_deref() else {
            report.failed.push(DropbackError::Transfer {
                path: rel.clone(),
                reason: "link has no recorded target".into(),
            });
            continue;
        };
        let Some(local) = safe_join(dest, rel) else {
            refuse_escape(report, rel);
            continue;
        };
        if has_link_ancestor(dest, &local) {
            warn!(path = %rel, "Refusing link below another link");
            report.failed.push(DropbackError::Transfer {
                path: rel.clone(),
                reason: "a parent directory is a symbolic link".into(),
            });
            continue;
        }
        if let Some(parent) = local.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            report.failed.push(DropbackError::Transfer {
                path: rel.clone(),
                reason: describe_io_error("create directory", parent, &e),
            });
            continue;
        }
        if let Err(e) = make_link(link_target, &local) {
            warn!(path = %rel, error = %e, "Could not recreate link");
            report.failed.push(DropbackError::Transfer {
                path: rel.clone(),
                reason: describe_io_error("create link", &local, &e),
            });
            continue;
        }
        debug!(path = %rel, target = link_target, "Recreated link");
        record_outcome(report, rel, apply_link_entry(&local, recorded));
        report.links.push(rel.clone());
    }
    Ok(())
}

/// Create `local` as a link to `target`, replacing an existing link but never
/// a file or directory.
#[cfg(unix)]
fn make_link(target: &str, local: &Path) -> io::Result<()> {
    match std::os::unix::fs::symlink(target, local) {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if !fs::symlink_metadata(local)?.file_type().is_symlink() {
                return Err(e);
            }
            fs::remove_file(local)?;
            std::os::unix::fs::symlink(target, local)
        }
        other => other,
    }
}

#[cfg(not(unix))]
fn make_link(_target: &str, _local: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not restored on this platform",
    ))
}

/// Whether any directory between `dest` and `local` is a symbolic link.
fn has_link_ancestor(dest: &Path, local: &Path) -> bool {
    local
        .ancestors()
        .skip(1)
        .take_while(|a| *a != dest && a.starts_with(dest))
        .any(|a| fs::symlink_metadata(a).is_ok_and(|m| m.file_type().is_symlink()))
}

fn refuse_escape(report: &mut RestoreReport, rel: &str) {
    warn!(path = %rel, "Refusing path that escapes the destination");
    report.failed.push(DropbackError::Transfer {
        path: rel.to_string(),
        reason: "path escapes the destination directory".into(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_directory_and_link_entries() {
        let mut idx = Index::new();
        idx.insert(
            "Sub",
            IndexEntry {
                kind: EntryKind::Dir,
                ..Default::default()
            },
        );
        let l = Lookup::new(&idx);
        assert!(l.get("Sub").is_none());
        assert!(l.get("sub").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn link_ancestors_are_detected() {
        let td = tempfile::tempdir().unwrap();
        let real = td.path().join("real");
        fs::create_dir(&real).unwrap();
        std::os::unix::fs::symlink(&real, td.path().join("via")).unwrap();
        assert!(has_link_ancestor(td.path(), &td.path().join("via/x")));
        assert!(!has_link_ancestor(td.path(), &td.path().join("real/x")));
        assert!(!has_link_ancestor(td.path(), &td.path().join("via")));
    }

    #[test]
    fn lookup_falls_back_to_case_insensitive_match() {
        let mut idx = Index::new();
        idx.insert(
            "Docs/Readme.md",
            IndexEntry {
                mode: Some(0o600),
                ..Default::default()
            },
        );
        let l = Lookup::new(&idx);
        assert!(l.get("Docs/Readme.md").is_some());
        assert_eq!(l.get("docs/README.md").and_then(|e| e.mode), Some(0o600));
        assert!(l.get("other").is_none());
    }
}
