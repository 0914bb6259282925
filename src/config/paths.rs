//! Config file location and symlink checks.

use dirs::config_dir;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file (or a directory holding `config.xml`).
pub const CONFIG_ENV: &str = "DROPBACK_CONFIG";

const CONFIG_FILE_NAME: &str = "config.xml";

/// OS-appropriate default config path.
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(mut base) = config_dir() {
        base.push("dropback");
        base.push(CONFIG_FILE_NAME);
        Some(base)
    } else {
        env::var("HOME").ok().map(|h| {
            PathBuf::from(h)
                .join(".config")
                .join("dropback")
                .join(CONFIG_FILE_NAME)
        })
    }
}

/// Config path in effect and whether it came from `DROPBACK_CONFIG`.
pub fn config_path() -> Option<(PathBuf, bool)> {
    if let Some(raw) = env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        let p = PathBuf::from(raw);
        let p = if p.is_dir() { p.join(CONFIG_FILE_NAME) } else { p };
        return Some((p, true));
    }
    default_config_path().map(|p| (p, false))
}

/// Return true if any existing ancestor of `path` is a symlink.
pub fn path_has_symlink_ancestor(path: &Path) -> io::Result<bool> {
    let mut p = path.parent();
    while let Some(anc) = p {
        if anc.exists() {
            let meta = fs::symlink_metadata(anc)?;
            if meta.file_type().is_symlink() {
                return Ok(true);
            }
        }
        p = anc.parent();
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn env_directory_resolves_to_config_xml() {
        let td = tempdir().unwrap();
        // SAFETY: serialized test; no other thread reads the environment concurrently.
        unsafe { env::set_var(CONFIG_ENV, td.path()) };
        let (p, explicit) = config_path().unwrap();
        unsafe { env::remove_var(CONFIG_ENV) };
        assert!(explicit);
        assert_eq!(p, td.path().join("config.xml"));
    }

    #[cfg(unix)]
    #[test]
    fn detects_symlinked_ancestor() {
        let td = tempdir().unwrap();
        let real = td.path().join("real");
        fs::create_dir(&real).unwrap();
        let link = td.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        assert!(path_has_symlink_ancestor(&link.join("config.xml")).unwrap());
        assert!(!path_has_symlink_ancestor(&real.join("config.xml")).unwrap());
    }
}
