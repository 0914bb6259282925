//! Shared helpers for integration tests: an in-memory `RemoteStore`.
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use dropback::remote::Listing;
use dropback::{RemoteEntry, RemoteError, RemoteKind, RemoteStore};

#[derive(Debug, Clone)]
struct Stored {
    /// Display casing as first written.
    path: String,
    data: Vec<u8>,
    modified: Option<DateTime<Utc>>,
}

/// Case-insensitive file store keyed like Dropbox (lowercased absolute path).
#[derive(Default)]
pub struct MemoryStore {
    files: RefCell<BTreeMap<String, Stored>>,
    /// Remote paths (lowercased) whose uploads/downloads fail with a non-fatal API error.
    failing: RefCell<HashSet<String>>,
    /// Reject every call as unauthenticated once this many uploads succeeded.
    auth_fail_after: Cell<Option<usize>>,
    uploads: Cell<usize>,
}

fn key(path: &str) -> String {
    path.to_lowercase()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, remote: &str) {
        self.failing.borrow_mut().insert(key(remote));
    }

    pub fn fail_auth_after(&self, uploads: usize) {
        self.auth_fail_after.set(Some(uploads));
    }

    /// Successful uploads so far (index writes included).
    pub fn upload_count(&self) -> usize {
        self.uploads.get()
    }

    /// Place a file directly, bypassing upload accounting.
    pub fn put(&self, remote: &str, data: &[u8], modified: Option<DateTime<Utc>>) {
        self.files.borrow_mut().insert(
            key(remote),
            Stored {
                path: remote.to_string(),
                data: data.to_vec(),
                modified,
            },
        );
    }

    pub fn get(&self, remote: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(&key(remote)).map(|s| s.data.clone())
    }

    pub fn contains(&self, remote: &str) -> bool {
        self.files.borrow().contains_key(&key(remote))
    }

    pub fn remove(&self, remote: &str) {
        self.files.borrow_mut().remove(&key(remote));
    }

    fn check_auth(&self) -> Result<(), RemoteError> {
        match self.auth_fail_after.get() {
            Some(n) if self.uploads.get() >= n => Err(RemoteError::Auth("token revoked".into())),
            _ => Ok(()),
        }
    }

    fn check_failing(&self, remote: &str) -> Result<(), RemoteError> {
        if self.failing.borrow().contains(&key(remote)) {
            return Err(RemoteError::Api {
                path: remote.to_string(),
                status: 500,
                summary: "injected failure".into(),
            });
        }
        Ok(())
    }

    fn entry(s: &Stored) -> RemoteEntry {
        RemoteEntry {
            path: s.path.clone(),
            kind: RemoteKind::File,
            size: s.data.len() as u64,
            modified: s.modified,
        }
    }

    fn store(&self, remote: &str, data: Vec<u8>, modified: Option<DateTime<Utc>>) -> RemoteEntry {
        let stored = Stored {
            path: remote.to_string(),
            data,
            modified,
        };
        let entry = Self::entry(&stored);
        self.files.borrow_mut().insert(key(remote), stored);
        self.uploads.set(self.uploads.get() + 1);
        entry
    }
}

impl RemoteStore for MemoryStore {
    /// Recursive listing: folders implied by stored files come first, in the
    /// casing of the first file seen below them.
    fn list(&self, path: &str) -> Result<Listing<'_>, RemoteError> {
        self.check_auth()?;
        let prefix = format!("{}/", key(path).trim_end_matches('/'));
        let files = self.files.borrow();
        let below: Vec<&Stored> = files
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, s)| s)
            .collect();
        if below.is_empty() {
            return Err(RemoteError::NotFound(path.to_string()));
        }

        let mut folders: BTreeMap<String, String> = BTreeMap::new();
        for s in &below {
            let mut end = prefix.len();
            while let Some(i) = s.path[end..].find('/') {
                end += i;
                folders
                    .entry(key(&s.path[..end]))
                    .or_insert_with(|| s.path[..end].to_string());
                end += 1;
            }
        }
        let mut found: Vec<Result<RemoteEntry, RemoteError>> = folders
            .into_values()
            .map(|p| {
                Ok(RemoteEntry {
                    path: p,
                    kind: RemoteKind::Folder,
                    size: 0,
                    modified: None,
                })
            })
            .collect();
        found.extend(below.into_iter().map(|s| Ok(Self::entry(s))));
        Ok(Box::new(found.into_iter()))
    }

    fn upload(
        &self,
        local: &Path,
        remote: &str,
        modified: Option<DateTime<Utc>>,
    ) -> Result<RemoteEntry, RemoteError> {
        self.check_auth()?;
        self.check_failing(remote)?;
        let data = fs::read(local).map_err(|source| RemoteError::Io {
            path: local.to_path_buf(),
            source,
        })?;
        Ok(self.store(remote, data, modified))
    }

    fn upload_bytes(&self, data: &[u8], remote: &str) -> Result<RemoteEntry, RemoteError> {
        self.check_auth()?;
        self.check_failing(remote)?;
        Ok(self.store(remote, data.to_vec(), None))
    }

    fn download(&self, remote: &str, local: &Path) -> Result<RemoteEntry, RemoteError> {
        self.check_auth()?;
        self.check_failing(remote)?;
        let stored = self
            .files
            .borrow()
            .get(&key(remote))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(remote.to_string()))?;
        fs::write(local, &stored.data).map_err(|source| RemoteError::Io {
            path: local.to_path_buf(),
            source,
        })?;
        Ok(Self::entry(&stored))
    }

    fn download_bytes(&self, remote: &str) -> Result<Vec<u8>, RemoteError> {
        self.check_auth()?;
        self.get(remote).ok_or_else(|| RemoteError::NotFound(remote.to_string()))
    }

    fn stat(&self, remote: &str) -> Result<RemoteEntry, RemoteError> {
        self.check_auth()?;
        self.files
            .borrow()
            .get(&key(remote))
            .map(Self::entry)
            .ok_or_else(|| RemoteError::NotFound(remote.to_string()))
    }

    fn create_folder(&self, _remote: &str) -> Result<(), RemoteError> {
        self.check_auth()
    }
}
