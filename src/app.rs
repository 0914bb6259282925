//! Application orchestrator.
//! Loads/merges config, initializes logging, installs the Ctrl-C handler,
//! builds the Dropbox session and runs the selected subcommand.

use anyhow::Result;
use std::io;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use dropback::cli::{Args, Command};
use dropback::config::{CONFIG_ENV, LoadResult, default_config_path, load_or_init};
use dropback::ops::connect::{ConnectOptions, DropboxAuthorizer};
use dropback::ops::{self, BackupOptions};
use dropback::output as out;
use dropback::remote::dropbox::ClientOptions;
use dropback::remote::{DropboxClient, Session};
use dropback::{Config, CredentialStore, DropbackError, SaveLocation, shutdown};

use crate::logging::init_tracing;

/// Exit status when the command ran but some files failed.
const EXIT_PARTIAL: u8 = 2;

/// How a command that did not error finished.
enum Outcome {
    Clean,
    Partial,
}

/// Run the CLI application.
pub fn run(args: Args) -> ExitCode {
    if args.print_config {
        print_config();
        return ExitCode::SUCCESS;
    }
    let Some(command) = args.command.clone() else {
        out::print_error("No subcommand given. Run `dropback --help` for usage.");
        return ExitCode::FAILURE;
    };

    // Config is read before logging so its log settings apply.
    let (mut cfg, cfg_path) = match load_config() {
        Ok(v) => v,
        Err(e) => {
            out::print_error(&format!("{e:#}"));
            return ExitCode::FAILURE;
        }
    };
    args.apply_overrides(&mut cfg);

    let guard_opt = match init_tracing(cfg.log_level, cfg.log_file.as_deref(), args.json) {
        Ok(g) => g,
        Err(e) => {
            out::print_error(&format!("Failed to initialize logging: {e}"));
            return ExitCode::FAILURE;
        }
    };

    // Guard needs to be dropped on SIGINT to flush logs.
    let guard_slot = Arc::new(Mutex::new(guard_opt));
    {
        let guard_slot = Arc::clone(&guard_slot);
        let installed = ctrlc::set_handler(move || {
            if shutdown::is_requested() {
                // Second Ctrl-C: stop waiting for the current transfer.
                if let Ok(mut g) = guard_slot.lock() {
                    let _ = g.take();
                }
                std::process::exit(130);
            }
            shutdown::request();
            out::print_warn("Received interrupt; finishing the current file and saving the index...");
        });
        if let Err(e) = installed {
            error!(error = %e, "Failed to install Ctrl-C handler");
        }
    }

    match &cfg_path {
        Some(p) => debug!(config = %p.display(), "Loaded config"),
        None => debug!("Using built-in config defaults"),
    }
    debug!(?command, "Starting dropback");

    let result = dispatch(&command, &cfg);

    let code = match result {
        Ok(Outcome::Clean) => ExitCode::SUCCESS,
        Ok(Outcome::Partial) => ExitCode::from(EXIT_PARTIAL),
        Err(e) => {
            let code = log_failure(&e);
            out::print_error(&format!("{e:#}"));
            code
        }
    };

    // Ensure logs are flushed before exit
    if let Ok(mut g) = guard_slot.lock() {
        let _ = g.take();
    }
    code
}

fn print_config() {
    if let Ok(cfg_env) = std::env::var(CONFIG_ENV) {
        out::print_info(&format!("Using {CONFIG_ENV} (explicit):\n  {cfg_env}\n"));
        out::print_info(&format!("To override, unset {CONFIG_ENV} or set it to another file."));
        return;
    }
    match default_config_path() {
        Some(p) => {
            out::print_info(&format!("Default dropback config path:\n  {}\n", p.display()));
            if p.exists() {
                out::print_info("A config file already exists at that location.");
            } else {
                out::print_info("No config file exists there yet; one is created on the next run.");
            }
        }
        None => out::print_error("Could not determine a default config path (no home directory)."),
    }
}

fn load_config() -> Result<(Config, Option<std::path::PathBuf>)> {
    Ok(match load_or_init()? {
        LoadResult::Loaded(cfg, path) => (cfg, Some(path)),
        LoadResult::CreatedTemplate(path) => {
            out::print_success(&format!(
                "A template dropback config was written to: {}",
                path.display()
            ));
            out::print_info(&format!(
                "Edit it to set log_level, log_file or transfer settings. To use a different location set {CONFIG_ENV}."
            ));
            (Config::default(), Some(path))
        }
        LoadResult::Defaults => (Config::default(), None),
    })
}

fn dispatch(command: &Command, cfg: &Config) -> Result<Outcome> {
    let client_opts = ClientOptions::from(cfg);
    match command {
        Command::Connect { system, .. } => {
            let store = CredentialStore::from_env()?;
            let auth = DropboxAuthorizer::new(client_opts);
            let opts = ConnectOptions {
                app_key: cfg.app_key.clone(),
                app_secret: cfg.app_secret.clone(),
                location: if *system { SaveLocation::System } else { SaveLocation::Auto },
            };
            let connected = ops::connect(&store, &auth, &opts, &mut io::stdin().lock())?;
            out::print_success(&format!(
                "Linked Dropbox account '{}'; credentials saved to {}",
                connected.account.display_name,
                connected.path.display()
            ));
            Ok(Outcome::Clean)
        }
        Command::Disconnect { no_revoke } => {
            let store = CredentialStore::from_env()?;
            let auth = DropboxAuthorizer::new(client_opts);
            match ops::disconnect(&store, &auth, !no_revoke)? {
                Some(p) => out::print_success(&format!("Removed credentials {}", p.display())),
                None => out::print_warn("No stored credentials found; nothing to do."),
            }
            Ok(Outcome::Clean)
        }
        Command::Backup { source, target, .. } => {
            let session = open_session(&client_opts)?;
            let report = ops::backup(&session.client, source, target, &BackupOptions::from(cfg))?;
            for s in &report.skipped {
                out::print_warn(&format!("skipped {s}"));
            }
            for f in &report.failed {
                out::print_error(&f.to_string());
            }
            out::print_user(&out::summary(
                "backup",
                &[
                    ("uploaded", report.uploaded.len()),
                    ("unchanged", report.unchanged.len()),
                    ("directories", report.directories.len()),
                    ("links", report.links.len()),
                    ("skipped", report.skipped.len()),
                    ("failed", report.failed.len()),
                ],
            ));
            Ok(if report.is_success() { Outcome::Clean } else { Outcome::Partial })
        }
        Command::Restore { target, dest } => {
            let session = open_session(&client_opts)?;
            let report = ops::restore(&session.client, target, dest)?;
            if report.index_missing {
                out::print_warn("No metadata index found; files were restored with default permissions.");
            }
            for w in &report.metadata_warnings {
                out::print_warn(&w.to_string());
            }
            for f in &report.failed {
                out::print_error(&f.to_string());
            }
            out::print_user(&out::summary(
                "restore",
                &[
                    ("restored", report.restored.len()),
                    ("metadata_applied", report.metadata_applied.len()),
                    ("metadata_warnings", report.metadata_warnings.len()),
                    ("content_only", report.content_only.len()),
                    ("directories", report.directories.len()),
                    ("links", report.links.len()),
                    ("failed", report.failed.len()),
                ],
            ));
            Ok(if report.is_success() { Outcome::Clean } else { Outcome::Partial })
        }
        Command::Rebuild { target, keep_known } => {
            let session = open_session(&client_opts)?;
            let report = ops::rebuild(&session.client, target, *keep_known)?;
            for d in &report.dropped {
                info!(path = %d, "Dropped from index (no remote file)");
            }
            out::print_user(&out::summary(
                "rebuild",
                &[
                    ("entries", report.entries),
                    ("carried_over", report.carried_over),
                    ("dropped", report.dropped.len()),
                ],
            ));
            Ok(Outcome::Clean)
        }
    }
}

/// Load credentials and authenticate once for this invocation.
fn open_session(opts: &ClientOptions) -> Result<Session> {
    let store = CredentialStore::from_env()?;
    let (creds, path) = store.load()?;
    debug!(credentials = %path.display(), "Authenticating");
    let session = DropboxClient::authenticate(&creds, opts).map_err(DropbackError::from)?;
    out::print_info(&format!("Using Dropbox account '{}'", session.account.display_name));
    Ok(session)
}

/// Log a structured error record and pick the exit status.
fn log_failure(e: &anyhow::Error) -> ExitCode {
    match e.downcast_ref::<DropbackError>() {
        Some(de) => {
            let code = de.code();
            match de {
                DropbackError::Metadata { path, what, .. } => {
                    error!(code, kind = de.kind(), path = %path.display(), what, "Command failed")
                }
                DropbackError::Transfer { path, reason } => {
                    error!(code, kind = de.kind(), path = %path, %reason, "Command failed")
                }
                _ => error!(code, kind = de.kind(), error = %de, "Command failed"),
            }
            if matches!(de, DropbackError::Interrupted) {
                ExitCode::from(130)
            } else {
                ExitCode::FAILURE
            }
        }
        None => {
            error!(error = ?e, "Command failed");
            ExitCode::FAILURE
        }
    }
}
