//! Config module.
//! Provides configuration types, the config file location, XML loading, and validation.

pub mod paths;
pub mod types;
mod validate;
pub mod xml;

pub use paths::{CONFIG_ENV, config_path, default_config_path, path_has_symlink_ancestor};
pub use types::{Config, LogLevel};
pub use xml::{LoadResult, create_template_config, load_config_from_xml_path, load_or_init};

/// Defaults shared across submodules.
pub const DEFAULT_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_CHUNK_SIZE_MB: u64 = 100;
/// Dropbox refuses single upload requests above 150 MiB.
pub const MAX_CHUNK_SIZE_MB: u64 = 150;
pub const DEFAULT_INDEX_FLUSH_INTERVAL: u32 = 1;
