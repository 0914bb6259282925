//! Platform-specific helpers.
//! Hides OS differences behind a uniform API so the rest of the crate stays portable.

mod temp;
#[cfg(unix)]
mod unix;
#[cfg(not(unix))]
mod windows;

pub use temp::tmp_sibling_name;

#[cfg(unix)]
pub use unix::{open_log_file_secure_append, set_dir_mode_0700, write_file_atomic_0600};

#[cfg(not(unix))]
pub use windows::{open_log_file_secure_append, set_dir_mode_0700, write_file_atomic_0600};
