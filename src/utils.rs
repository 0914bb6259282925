//! Small path and I/O helpers shared by the walkers.

use anyhow::anyhow;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Format a human-friendly message with op/path plus platform-aware hints.
fn build_message(op: &str, path: &Path, e: &io::Error) -> String {
    let mut msg = format!("{} '{}': {}", op, path.display(), e);

    if let Some(code) = e.raw_os_error() {
        #[cfg(unix)]
        {
            let hint = match code {
                libc::EACCES | libc::EPERM => {
                    Some("permission denied; check ownership, or run as root to restore owners")
                }
                libc::ENOENT => Some("path not found; verify it exists"),
                libc::ENOSPC => Some("insufficient space on device"),
                libc::EROFS => Some("read-only filesystem; cannot write here"),
                libc::ELOOP => Some("too many symbolic link levels; possible symlink cycle"),
                libc::ENAMETOOLONG => Some("filename or path too long"),
                libc::EMFILE | libc::ENFILE => Some("too many open files; raise the limit"),
                _ => None,
            };
            if let Some(h) = hint {
                msg.push_str("; ");
                msg.push_str(h);
            }
        }
        msg.push_str(&format!(" [os code: {code}]"));
    } else {
        match e.kind() {
            io::ErrorKind::PermissionDenied => msg.push_str("; permission denied"),
            io::ErrorKind::NotFound => msg.push_str("; path not found"),
            _ => {}
        }
    }
    msg
}

/// Adapter for anyhow::Result code.
/// Returns a closure for `.map_err(...)` that converts io::Error -> anyhow::Error.
pub fn io_error_with_help<'a>(
    op: &'a str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> anyhow::Error + 'a {
    move |e: io::Error| anyhow!(build_message(op, path, &e))
}

/// Same message as `io_error_with_help`, for per-file reports that keep a String.
pub fn describe_io_error(op: &str, path: &Path, e: &io::Error) -> String {
    build_message(op, path, e)
}

/// `/`-separated path of `path` below `root`. None for the root itself, paths
/// outside it, and names that are not valid UTF-8.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(s) => parts.push(s.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() { None } else { Some(parts.join("/")) }
}

/// Join a `/`-separated relative path below `dest`, refusing anything that could
/// escape it (`..`, absolute paths, empty segments only).
pub fn safe_join(dest: &Path, rel: &str) -> Option<PathBuf> {
    let mut out = dest.to_path_buf();
    let mut pushed = false;
    for seg in rel.split('/') {
        match seg {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\\') || s.contains('\0') => return None,
            s => {
                out.push(s);
                pushed = true;
            }
        }
    }
    pushed.then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_slash_path_joins_components() {
        let root = Path::new("/data/src");
        assert_eq!(
            relative_slash_path(root, Path::new("/data/src/sub/b.txt")).as_deref(),
            Some("sub/b.txt")
        );
        assert_eq!(relative_slash_path(root, root), None);
        assert_eq!(relative_slash_path(root, Path::new("/data/other")), None);
    }

    #[cfg(unix)]
    #[test]
    fn relative_slash_path_rejects_non_utf8() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        let root = Path::new("/r");
        let bad = root.join(OsStr::from_bytes(b"caf\xe9.txt"));
        assert_eq!(relative_slash_path(root, &bad), None);
    }

    #[test]
    fn safe_join_refuses_escapes() {
        let dest = Path::new("/restore");
        assert_eq!(safe_join(dest, "a/b.txt"), Some(PathBuf::from("/restore/a/b.txt")));
        assert_eq!(safe_join(dest, "/a//b.txt"), Some(PathBuf::from("/restore/a/b.txt")));
        assert_eq!(safe_join(dest, "../etc/passwd"), None);
        assert_eq!(safe_join(dest, "a/../../x"), None);
        assert_eq!(safe_join(dest, ""), None);
    }

    #[test]
    fn io_help_mentions_op_and_path() {
        let e = io::Error::from(io::ErrorKind::NotFound);
        let msg = describe_io_error("open source", Path::new("/nope"), &e);
        assert!(msg.contains("open source '/nope'"));
        assert!(msg.contains("not found"));
    }
}
