//! Backup walker: mirror a local tree into a backup target and record each
//! file's metadata in the target's index.
//!
//! Directories and symbolic links are recorded in the index only. Links are
//! never followed and their targets are never uploaded.

use anyhow::Result;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::Skipped;
use crate::config::Config;
use crate::credentials::is_credentials_file;
use crate::errors::DropbackError;
use crate::index::{INDEX_FILE_NAME, Index, MetadataCapture};
use crate::remote::{BackupTarget, RemoteError, RemoteStore};
use crate::shutdown;
use crate::utils::{describe_io_error, io_error_with_help, relative_slash_path};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOptions {
    /// Skip files whose recorded size, mtime, mode and owner still match.
    pub skip_unchanged: bool,
    /// Persist the index after this many uploads; 0 saves only at the end.
    pub index_flush_interval: u32,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            skip_unchanged: false,
            index_flush_interval: 1,
        }
    }
}

impl From<&Config> for BackupOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            skip_unchanged: cfg.skip_unchanged,
            index_flush_interval: cfg.index_flush_interval,
        }
    }
}

#[derive(Debug, Default)]
pub struct BackupReport {
    /// Relative paths uploaded in this run.
    pub uploaded: Vec<String>,
    /// Relative paths left alone because the index says they did not change.
    pub unchanged: Vec<String>,
    /// Directories recorded in the index.
    pub directories: Vec<String>,
    /// Symbolic links recorded in the index with their target.
    pub links: Vec<String>,
    pub skipped: Vec<Skipped>,
    pub failed: Vec<DropbackError>,
}

impl BackupReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// How the walk ended, when it ended early.
enum Halt {
    Interrupted,
    Fatal(RemoteError),
}

/// Back up every regular file below `source` into `target`, recording
/// directories and symbolic links alongside.
///
/// Per-file failures are collected in the report and the walk goes on. An
/// authentication failure or Ctrl-C stops the walk; the index is persisted
/// either way before returning.
pub fn backup(
    store: &dyn RemoteStore,
    source: &Path,
    target: &BackupTarget,
    opts: &BackupOptions,
) -> Result<BackupReport> {
    match fs::metadata(source) {
        Ok(m) if m.is_dir() => {}
        Ok(_) => {
            return Err(DropbackError::NotFound(format!(
                "source {} is not a directory",
                source.display()
            ))
            .into());
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(DropbackError::NotFound(format!("source directory {}", source.display())).into());
        }
        Err(e) => return Err(io_error_with_help("stat source", source)(e)),
    }

    let root = target.remote_root();
    store.create_folder(&root).map_err(DropbackError::from)?;
    let mut index = Index::load(store, target)
        .map_err(DropbackError::from)?
        .unwrap_or_default();
    info!(source = %source.display(), target = %target, known = index.len(), "Starting backup");

    let mut report = BackupReport::default();
    let mut capture = MetadataCapture::new();
    let mut since_flush: u32 = 0;
    let mut halt: Option<Halt> = None;
    // Dropbox paths are case-insensitive; the first spelling wins.
    let mut folded: HashMap<String, String> = HashMap::new();

    let mut walker = WalkDir::new(source)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();

    while let Some(item) = walker.next() {
        if shutdown::is_requested() {
            halt = Some(Halt::Interrupted);
            break;
        }

        let entry = match item {
            Ok(e) => e,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf());
                warn!(path = %path.display(), error = %e, "Cannot read entry");
                report.failed.push(DropbackError::Transfer {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let path = entry.path();
        let ft = entry.file_type();

        if !ft.is_dir() && !ft.is_symlink() && !ft.is_file() {
            skip(&mut report, path, "not a regular file");
            continue;
        }
        let Some(rel) = relative_slash_path(source, path) else {
            skip(&mut report, path, "name is not valid UTF-8");
            continue;
        };
        if rel == INDEX_FILE_NAME {
            skip(&mut report, path, "name reserved for the metadata index");
            continue;
        }
        if ft.is_file() && is_credentials_file(path) {
            skip(&mut report, path, "credentials file");
            continue;
        }
        if let Some(first) = folded.get(&rel.to_lowercase()) {
            debug!(path = %rel, first = %first, "Case-insensitive name clash");
            skip(&mut report, path, "name differs only by case from another entry");
            if ft.is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }
        folded.insert(rel.to_lowercase(), rel.clone());

        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                report.failed.push(DropbackError::Transfer {
                    path: rel,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let mut current = capture.capture(&meta);

        if ft.is_dir() {
            debug!(path = %rel, "Recorded directory");
            index.insert(rel.clone(), current);
            report.directories.push(rel);
            continue;
        }
        if ft.is_symlink() {
            let link = match fs::read_link(path) {
                Ok(t) => t,
                Err(e) => {
                    report.failed.push(DropbackError::Transfer {
                        reason: describe_io_error("read link", path, &e),
                        path: rel,
                    });
                    continue;
                }
            };
            let Some(link) = link.to_str() else {
                skip(&mut report, path, "link target is not valid UTF-8");
                continue;
            };
            current.symlink_target = Some(link.to_string());
            debug!(path = %rel, target = link, "Recorded symbolic link");
            index.insert(rel.clone(), current);
            report.links.push(rel);
            continue;
        }

        if opts.skip_unchanged
            && index.get(&rel).is_some_and(|known| known.unchanged(&current))
        {
            debug!(path = %rel, "Unchanged; not uploading");
            report.unchanged.push(rel);
            continue;
        }

        let remote = target.remote_path(&rel);
        match store.upload(path, &remote, current.modified_utc()) {
            Ok(_) => {
                debug!(path = %rel, remote = %remote, "Uploaded");
                index.insert(rel.clone(), current);
                report.uploaded.push(rel);
                since_flush += 1;
            }
            Err(e) if e.is_fatal() => {
                error!(path = %rel, error = %e, "Upload rejected; stopping backup");
                halt = Some(Halt::Fatal(e));
                break;
            }
            Err(RemoteError::Io { path: local, source: err }) => {
                let reason = describe_io_error("read", &local, &err);
                warn!(path = %rel, error = %reason, "Upload failed");
                report.failed.push(DropbackError::Transfer { path: rel, reason });
            }
            Err(e) => {
                warn!(path = %rel, error = %e, "Upload failed");
                report.failed.push(DropbackError::Transfer {
                    path: rel,
                    reason: e.to_string(),
                });
            }
        }

        if opts.index_flush_interval > 0 && since_flush >= opts.index_flush_interval {
            since_flush = 0;
            if let Err(e) = index.save(store, target) {
                if e.is_fatal() {
                    halt = Some(Halt::Fatal(e));
                    break;
                }
                warn!(error = %e, "Could not save index; will retry at the end");
            }
        }
    }

    // Always persist what we have, including after an interrupt.
    let saved = index.save(store, target);

    match halt {
        Some(Halt::Interrupted) => {
            if let Err(e) = saved {
                error!(error = %e, "Could not save index after interrupt");
            }
            warn!(uploaded = report.uploaded.len(), "Backup interrupted");
            return Err(DropbackError::Interrupted.into());
        }
        Some(Halt::Fatal(e)) => {
            if let Err(save_err) = saved {
                debug!(error = %save_err, "Index not saved after fatal error");
            }
            return Err(DropbackError::from(e).into());
        }
        None => saved.map_err(DropbackError::from)?,
    }

    info!(
        uploaded = report.uploaded.len(),
        unchanged = report.unchanged.len(),
        directories = report.directories.len(),
        links = report.links.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Backup finished"
    );
    Ok(report)
}

fn skip(report: &mut BackupReport, path: &Path, reason: &'static str) {
    info!(path = %path.display(), reason, "Skipped");
    report.skipped.push(Skipped {
        path: path.to_path_buf(),
        reason,
    });
}
