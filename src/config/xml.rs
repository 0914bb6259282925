//! XML configuration support.
//! - Loads settings from config.xml (quick_xml + serde).
//! - Creates a commented template at the default location when none exists.
//!
//! Unknown elements are rejected so typos surface instead of being silently ignored.

use anyhow::{Context, Result};
use quick_xml::de::from_str as from_xml_str;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::paths::{config_path, path_has_symlink_ancestor};
use super::types::{Config, LogLevel};
use super::{DEFAULT_CHUNK_SIZE_MB, DEFAULT_INDEX_FLUSH_INTERVAL, DEFAULT_TIMEOUT_SECS};
use crate::errors::DropbackError;
use crate::platform::{set_dir_mode_0700, write_file_atomic_0600};

/// Struct mirroring the XML config for deserialization.
#[derive(Debug, Default, Deserialize)]
#[serde(rename = "config")]
#[serde(deny_unknown_fields)]
struct XmlConfig {
    log_level: Option<String>,
    log_file: Option<String>,
    app_key: Option<String>,
    app_secret: Option<String>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    timeout_seconds: Option<u64>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    chunk_size_mb: Option<u64>,
    skip_unchanged: Option<bool>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    index_flush_interval: Option<u64>,
}

/// Outcome of locating and reading the config file.
#[derive(Debug)]
pub enum LoadResult {
    Loaded(Config, PathBuf),
    /// No file existed at the default location; a template was written and defaults apply.
    CreatedTemplate(PathBuf),
    /// No usable config location (no home directory); defaults apply.
    Defaults,
}

// Trims whitespace; rejects non-numeric text instead of silently defaulting.
fn de_u64_trimmed_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse::<u64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected a whole number, got '{s}'"))),
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// Map XmlConfig -> Config, keeping defaults for absent fields.
fn xml_to_config(parsed: XmlConfig) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(s) = non_empty(parsed.log_level) {
        cfg.log_level = s
            .parse::<LogLevel>()
            .map_err(DropbackError::Config)?;
    }
    cfg.log_file = non_empty(parsed.log_file).map(PathBuf::from);
    cfg.app_key = non_empty(parsed.app_key);
    cfg.app_secret = non_empty(parsed.app_secret);
    cfg.timeout = Duration::from_secs(parsed.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS));
    cfg.chunk_size = parsed.chunk_size_mb.unwrap_or(DEFAULT_CHUNK_SIZE_MB).saturating_mul(1024 * 1024);
    cfg.skip_unchanged = parsed.skip_unchanged.unwrap_or(false);
    cfg.index_flush_interval = match parsed.index_flush_interval {
        Some(n) => u32::try_from(n).map_err(|_| {
            DropbackError::Config(format!("index_flush_interval {n} is out of range"))
        })?,
        None => DEFAULT_INDEX_FLUSH_INTERVAL,
    };

    Ok(cfg)
}

/// Load a Config from a specific XML file path.
pub fn load_config_from_xml_path(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read config xml '{}'", path.display()))?;
    if contents.trim().is_empty() {
        debug!(path = %path.display(), "Config file is empty; using defaults");
        return Ok(Config::default());
    }
    let parsed: XmlConfig = from_xml_str(&contents)
        .map_err(|e| DropbackError::Config(format!("{}: {e}", path.display())))?;
    let cfg = xml_to_config(parsed)
        .with_context(|| format!("interpret config xml '{}'", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Locate the config (DROPBACK_CONFIG or the OS default), load it, or write a
/// template at the default location when nothing is there yet.
/// An explicit DROPBACK_CONFIG that points at a missing file is an error.
pub fn load_or_init() -> Result<LoadResult> {
    let Some((path, explicit)) = config_path() else {
        return Ok(LoadResult::Defaults);
    };

    if path.exists() {
        let cfg = load_config_from_xml_path(&path)?;
        return Ok(LoadResult::Loaded(cfg, path));
    }
    if explicit {
        return Err(DropbackError::Config(format!(
            "config file named by DROPBACK_CONFIG does not exist: {}",
            path.display()
        ))
        .into());
    }
    create_template_config(&path)?;
    Ok(LoadResult::CreatedTemplate(path))
}

const TEMPLATE: &str = "\
<!--
  dropback configuration (XML). Every element is optional.

    log_level             -> quiet | normal | info | debug
    log_file              -> append logs to this file as well (leave empty to disable)
    app_key, app_secret   -> Dropbox app credentials used by `dropback connect`
    timeout_seconds       -> per-request HTTP timeout
    chunk_size_mb         -> files above this size upload in chunks of this size (max 150)
    skip_unchanged        -> skip files whose size, mtime, mode and owner match the index
    index_flush_interval  -> upload the index after this many files (0 = only at the end)

  CLI flags override XML values. Set DROPBACK_CONFIG to use another file.
-->
<config>
  <log_level>normal</log_level>
  <log_file></log_file>
  <app_key></app_key>
  <app_secret></app_secret>
  <timeout_seconds>{timeout}</timeout_seconds>
  <chunk_size_mb>{chunk}</chunk_size_mb>
  <skip_unchanged>false</skip_unchanged>
  <index_flush_interval>{flush}</index_flush_interval>
</config>
";

/// Create the template config file and its parent directory.
/// Refuses to write through a symlinked ancestor.
pub fn create_template_config(path: &Path) -> Result<()> {
    if path_has_symlink_ancestor(path)? {
        return Err(anyhow::anyhow!(
            "Refusing to create config: ancestor of {} is a symlink",
            path.display()
        ));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create config dir '{}'", parent.display()))?;
        let _ = set_dir_mode_0700(parent);
    }

    let content = TEMPLATE
        .replace("{timeout}", &DEFAULT_TIMEOUT_SECS.to_string())
        .replace("{chunk}", &DEFAULT_CHUNK_SIZE_MB.to_string())
        .replace("{flush}", &DEFAULT_INDEX_FLUSH_INTERVAL.to_string());

    write_file_atomic_0600(path, content.as_bytes())?;
    info!(path = %path.display(), "Created template config");
    Ok(())
}
