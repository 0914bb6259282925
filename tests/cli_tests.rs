use clap::Parser;
use std::path::PathBuf;

use dropback::cli::{Args, Command};
use dropback::config::types::{Config, LogLevel};
use dropback::BackupTarget;

#[test]
fn backup_parses_source_and_target() {
    let args = Args::parse_from(["dropback", "backup", "/srv/data", "home:/documents"]);
    match args.command {
        Some(Command::Backup {
            source,
            target,
            skip_unchanged,
        }) => {
            assert_eq!(source, PathBuf::from("/srv/data"));
            assert_eq!(target, BackupTarget::parse("home:/documents").unwrap());
            assert!(!skip_unchanged);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn invalid_target_is_a_parse_error() {
    assert!(Args::try_parse_from(["dropback", "restore", "9bad:/x", "/tmp"]).is_err());
    assert!(Args::try_parse_from(["dropback", "rebuild", "home:relative"]).is_err());
}

#[test]
fn missing_arguments_are_rejected() {
    assert!(Args::try_parse_from(["dropback", "backup", "/srv/data"]).is_err());
    assert!(Args::try_parse_from(["dropback", "restore", "home:/x"]).is_err());
}

#[test]
fn effective_log_level_precedence() {
    let args = Args::parse_from(["dropback", "--debug", "--log-level", "quiet", "disconnect"]);
    assert_eq!(args.effective_log_level(), Some(LogLevel::Debug)); // --debug wins

    let args = Args::parse_from(["dropback", "rebuild", "home", "--log-level", "info"]);
    assert_eq!(args.effective_log_level(), Some(LogLevel::Info));

    let args = Args::parse_from(["dropback", "disconnect"]);
    assert_eq!(args.effective_log_level(), None);
}

#[test]
fn apply_overrides_sets_flags() {
    let args = Args::parse_from([
        "dropback",
        "--log-level",
        "info",
        "backup",
        "--skip-unchanged",
        "/src",
        "home",
    ]);
    let mut cfg = Config::default();
    args.apply_overrides(&mut cfg);
    assert_eq!(cfg.log_level, LogLevel::Info);
    assert!(cfg.skip_unchanged);
}

#[test]
fn connect_flags_override_config_credentials() {
    let args = Args::parse_from(["dropback", "connect", "--app-key", "k", "--system"]);
    let mut cfg = Config {
        app_key: Some("from-config".into()),
        app_secret: Some("secret".into()),
        ..Config::default()
    };
    args.apply_overrides(&mut cfg);
    assert_eq!(cfg.app_key.as_deref(), Some("k"));
    assert_eq!(cfg.app_secret.as_deref(), Some("secret"));
    assert!(matches!(args.command, Some(Command::Connect { system: true, .. })));
}

#[test]
fn unknown_log_level_is_rejected() {
    assert!(Args::try_parse_from(["dropback", "--log-level", "loud", "disconnect"]).is_err());
}
