//! CLI definition and parsing.
//!
//! Notes:
//! - `--debug` is a shorthand for `--log-level debug` and wins over it.
//! - Global flags may appear before or after the subcommand.

use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::types::{Config, LogLevel};
use crate::remote::BackupTarget;

/// Back up directories to Dropbox, keeping permissions, ownership and mtimes.
/// CLI flags override config values (which are loaded from XML if present).
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Enable debug logging (equivalent to `--log-level debug`).
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Set log level: quiet, normal, info, debug.
    #[arg(long, global = true, value_parser = LogLevel::from_str)]
    pub log_level: Option<LogLevel>,

    /// Emit logs in structured JSON.
    #[arg(long, global = true)]
    pub json: bool,

    /// Print the config file location used by dropback and exit.
    #[arg(long)]
    pub print_config: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Link a Dropbox account and store its access token.
    Connect {
        /// Dropbox app key (falls back to config, then existing credentials, then a prompt).
        #[arg(long)]
        app_key: Option<String>,
        /// Dropbox app secret.
        #[arg(long)]
        app_secret: Option<String>,
        /// Store credentials system-wide (/etc/dropback) instead of the current directory.
        #[arg(long)]
        system: bool,
    },

    /// Forget the stored credentials and revoke the token.
    Disconnect {
        /// Only delete the local credentials file.
        #[arg(long)]
        no_revoke: bool,
    },

    /// Upload a directory tree to a backup target.
    Backup {
        /// Local directory to back up.
        #[arg(value_hint = ValueHint::DirPath)]
        source: PathBuf,
        /// Backup target, `<name>:/<folder>` or just `<name>`.
        #[arg(value_parser = BackupTarget::parse)]
        target: BackupTarget,
        /// Skip files whose size, mtime, mode and owner match the stored index.
        #[arg(long)]
        skip_unchanged: bool,
    },

    /// Download a backup target into an existing directory.
    Restore {
        #[arg(value_parser = BackupTarget::parse)]
        target: BackupTarget,
        /// Existing local directory to restore into.
        #[arg(value_hint = ValueHint::DirPath)]
        dest: PathBuf,
    },

    /// Regenerate a target's index from the files stored remotely.
    Rebuild {
        #[arg(value_parser = BackupTarget::parse)]
        target: BackupTarget,
        /// Keep previous entries for files that still exist remotely.
        #[arg(long)]
        keep_known: bool,
    },
}

impl Args {
    /// Effective log level derived from flags.
    /// Precedence: --debug > --log-level value > None (use config default).
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        if self.debug {
            return Some(LogLevel::Debug);
        }
        self.log_level
    }

    /// Apply CLI overrides to a loaded Config (in-place). No-ops for unset flags.
    pub fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(level) = self.effective_log_level() {
            cfg.log_level = level;
        }
        match &self.command {
            Some(Command::Backup {
                skip_unchanged: true,
                ..
            }) => cfg.skip_unchanged = true,
            Some(Command::Connect {
                app_key,
                app_secret,
                ..
            }) => {
                if let Some(k) = app_key {
                    cfg.app_key = Some(k.clone());
                }
                if let Some(s) = app_secret {
                    cfg.app_secret = Some(s.clone());
                }
            }
            _ => {}
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}
