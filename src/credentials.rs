//! Credential store: the Dropbox app key/secret and the user's access token.
//!
//! The file (`dropback_credentials.xml`) is looked up in order:
//! 1) `$DROPBACK_CREDENTIALS` (explicit file path)
//! 2) the current working directory
//! 3) `/etc/dropback` (shared by every user of the machine)
//!
//! Saving rewrites the first file found so that re-running `connect` never
//! leaves two competing copies behind.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::DropbackError;
use crate::platform::write_file_atomic_0600;
use crate::utils::io_error_with_help;

pub const CREDENTIALS_FILE_NAME: &str = "dropback_credentials.xml";
pub const CREDENTIALS_ENV: &str = "DROPBACK_CREDENTIALS";
pub const SYSTEM_CREDENTIALS_DIR: &str = "/etc/dropback";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "credentials", deny_unknown_fields)]
pub struct Credentials {
    pub app_key: String,
    pub app_secret: String,
    pub access_token: String,
}

// Keep secrets out of debug logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_key", &self.app_key)
            .field("app_secret", &"<redacted>")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn to_xml(&self) -> Result<String> {
        let body = quick_xml::se::to_string(self).context("serialize credentials")?;
        Ok(format!("{body}\n"))
    }

    pub fn from_xml(s: &str) -> Result<Self> {
        let creds: Credentials = quick_xml::de::from_str(s).context("parse credentials xml")?;
        if creds.access_token.trim().is_empty() {
            return Err(DropbackError::Config("credentials file has an empty access_token".into()).into());
        }
        Ok(creds)
    }
}

/// Where `save` writes when no credentials file exists yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveLocation {
    /// Existing file if any, else the current directory.
    #[default]
    Auto,
    /// The system-wide directory.
    System,
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    explicit: Option<PathBuf>,
    local_dir: PathBuf,
    system_dir: PathBuf,
}

impl CredentialStore {
    /// Store using `$DROPBACK_CREDENTIALS`, the current directory and `/etc/dropback`.
    pub fn from_env() -> Result<Self> {
        let explicit = env::var_os(CREDENTIALS_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let cwd = env::current_dir().context("determine current directory")?;
        Ok(Self::with_dirs(explicit, cwd, PathBuf::from(SYSTEM_CREDENTIALS_DIR)))
    }

    pub fn with_dirs(explicit: Option<PathBuf>, local_dir: PathBuf, system_dir: PathBuf) -> Self {
        Self {
            explicit,
            local_dir,
            system_dir,
        }
    }

    /// Candidate files in search order.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut out = Vec::with_capacity(3);
        if let Some(p) = &self.explicit {
            out.push(p.clone());
        }
        out.push(self.local_dir.join(CREDENTIALS_FILE_NAME));
        out.push(self.system_dir.join(CREDENTIALS_FILE_NAME));
        out
    }

    /// First candidate that exists.
    pub fn active_path(&self) -> Option<PathBuf> {
        self.candidates().into_iter().find(|p| p.is_file())
    }

    /// Load credentials from the first existing candidate.
    pub fn load(&self) -> Result<(Credentials, PathBuf)> {
        let Some(path) = self.active_path() else {
            return Err(DropbackError::CredentialsNotFound {
                searched: self.searched_list(),
            }
            .into());
        };
        let text = fs::read_to_string(&path).map_err(io_error_with_help("read credentials", &path))?;
        let creds = Credentials::from_xml(&text)
            .with_context(|| format!("load credentials from '{}'", path.display()))?;
        debug!(path = %path.display(), "Loaded credentials");
        Ok((creds, path))
    }

    /// Persist `creds`, replacing the active file when there is one. Returns the path written.
    pub fn save(&self, creds: &Credentials, location: SaveLocation) -> Result<PathBuf> {
        let path = self.save_target(location);
        write_file_atomic_0600(&path, creds.to_xml()?.as_bytes())
            .with_context(|| format!("write credentials to '{}'", path.display()))?;
        info!(path = %path.display(), "Saved credentials");
        Ok(path)
    }

    fn save_target(&self, location: SaveLocation) -> PathBuf {
        if let Some(p) = &self.explicit {
            return p.clone();
        }
        match location {
            SaveLocation::System => self.system_dir.join(CREDENTIALS_FILE_NAME),
            SaveLocation::Auto => self
                .active_path()
                .unwrap_or_else(|| self.local_dir.join(CREDENTIALS_FILE_NAME)),
        }
    }

    /// Delete the active credentials file. Ok(None) when there was nothing to delete.
    pub fn clear(&self) -> Result<Option<PathBuf>> {
        let Some(path) = self.active_path() else {
            return Ok(None);
        };
        fs::remove_file(&path).map_err(io_error_with_help("remove credentials", &path))?;
        info!(path = %path.display(), "Removed credentials");
        Ok(Some(path))
    }

    fn searched_list(&self) -> String {
        self.candidates()
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// True when `path` looks like a credentials file written by this tool.
pub fn is_credentials_file(path: &Path) -> bool {
    path.file_name().is_some_and(|n| n == CREDENTIALS_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Credentials {
        Credentials {
            app_key: "key".into(),
            app_secret: "secret".into(),
            access_token: "sl.token".into(),
        }
    }

    #[test]
    fn xml_round_trip() {
        let xml = sample().to_xml().unwrap();
        assert!(xml.starts_with("<credentials>"));
        assert_eq!(Credentials::from_xml(&xml).unwrap(), sample());
    }

    #[test]
    fn debug_hides_secrets() {
        let s = format!("{:?}", sample());
        assert!(!s.contains("sl.token"));
        assert!(!s.contains("secret\""));
    }

    #[test]
    fn empty_token_is_rejected() {
        let xml = "<credentials><app_key>k</app_key><app_secret>s</app_secret><access_token> </access_token></credentials>";
        assert!(Credentials::from_xml(xml).is_err());
    }

    #[test]
    fn system_file_is_found_and_overwritten_in_place() {
        let local = tempdir().unwrap();
        let system = tempdir().unwrap();
        let store = CredentialStore::with_dirs(None, local.path().into(), system.path().into());

        let first = store.save(&sample(), SaveLocation::System).unwrap();
        assert_eq!(first, system.path().join(CREDENTIALS_FILE_NAME));

        let mut updated = sample();
        updated.access_token = "sl.other".into();
        let second = store.save(&updated, SaveLocation::Auto).unwrap();
        assert_eq!(second, first, "existing file should be reused");
        assert!(!local.path().join(CREDENTIALS_FILE_NAME).exists());
        assert_eq!(store.load().unwrap().0.access_token, "sl.other");
    }

    #[test]
    fn missing_credentials_name_every_location() {
        let local = tempdir().unwrap();
        let system = tempdir().unwrap();
        let store = CredentialStore::with_dirs(None, local.path().into(), system.path().into());
        let err = store.load().unwrap_err();
        let de = err.downcast_ref::<DropbackError>().unwrap();
        assert!(matches!(de, DropbackError::CredentialsNotFound { .. }));
        assert!(err.to_string().contains(&local.path().display().to_string()));
        assert_eq!(store.clear().unwrap(), None);
    }
}
