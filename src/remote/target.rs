//! Backup target parsing: `<name>:/<folder>` -> remote root `/<name>/<folder>`.

use std::fmt;
use std::str::FromStr;

use crate::errors::DropbackError;
use crate::index::INDEX_FILE_NAME;

use super::join_remote;

/// A named backup and the folder inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTarget {
    pub name: String,
    /// Normalized folder, always starting with `/`, never ending with one (except `/`).
    pub folder: String,
}

impl BackupTarget {
    /// Parse `name:/folder`, or a bare `name` meaning `name:/`.
    pub fn parse(s: &str) -> Result<Self, DropbackError> {
        let invalid = || DropbackError::InvalidTarget(s.to_string());
        let trimmed = s.trim();
        let (name, folder) = match trimmed.split_once(':') {
            Some((n, f)) => (n, f),
            None => (trimmed, "/"),
        };

        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return Err(invalid()),
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(invalid());
        }

        if !folder.starts_with('/') {
            return Err(invalid());
        }
        let mut segs = Vec::new();
        for seg in folder.split('/').filter(|s| !s.is_empty()) {
            if seg == "." || seg == ".." {
                return Err(invalid());
            }
            segs.push(seg);
        }

        Ok(Self {
            name: name.to_string(),
            folder: format!("/{}", segs.join("/")),
        })
    }

    /// Absolute remote folder holding the mirrored tree.
    pub fn remote_root(&self) -> String {
        join_remote(&format!("/{}", self.name), &self.folder)
    }

    /// Remote path of the metadata index for this target.
    pub fn index_path(&self) -> String {
        join_remote(&self.remote_root(), INDEX_FILE_NAME)
    }

    /// Remote path for a `/`-separated relative path.
    pub fn remote_path(&self, rel: &str) -> String {
        join_remote(&self.remote_root(), rel)
    }
}

impl FromStr for BackupTarget {
    type Err = DropbackError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BackupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.folder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_folder() {
        let t = BackupTarget::parse("home:/documents/work/").unwrap();
        assert_eq!(t.name, "home");
        assert_eq!(t.folder, "/documents/work");
        assert_eq!(t.remote_root(), "/home/documents/work");
        assert_eq!(t.index_path(), "/home/documents/work/.dropboxbackupmeta");
        assert_eq!(t.remote_path("sub/b.txt"), "/home/documents/work/sub/b.txt");
    }

    #[test]
    fn bare_name_is_root_folder() {
        let t = BackupTarget::parse("srv_01").unwrap();
        assert_eq!(t.folder, "/");
        assert_eq!(t.remote_root(), "/srv_01");
        assert_eq!(t.to_string(), "srv_01:/");
    }

    #[test]
    fn rejects_bad_names_and_paths() {
        for bad in ["1abc:/x", ":/x", "na me:/x", "home:relative", "home:/a/../b", "home:/./a", ""] {
            assert!(BackupTarget::parse(bad).is_err(), "{bad} should be rejected");
        }
    }
}
