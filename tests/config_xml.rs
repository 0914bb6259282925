//! XML config parsing and DROPBACK_CONFIG resolution.

use serial_test::serial;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

use dropback::config::{LoadResult, create_template_config, load_config_from_xml_path, load_or_init};
use dropback::{CONFIG_ENV, Config, LogLevel};

#[test]
fn reads_every_field() {
    let td = tempdir().unwrap();
    let cfg_path = td.path().join("config.xml");
    let log_file = td.path().join("dropback.log");
    let xml = format!(
        r#"
<config>
  <log_level>debug</log_level>
  <log_file>{}</log_file>
  <app_key> key123 </app_key>
  <app_secret>sec</app_secret>
  <timeout_seconds> 60 </timeout_seconds>
  <chunk_size_mb>8</chunk_size_mb>
  <skip_unchanged>true</skip_unchanged>
  <index_flush_interval>25</index_flush_interval>
</config>
"#,
        log_file.display()
    );
    fs::write(&cfg_path, xml).unwrap();

    let cfg = load_config_from_xml_path(&cfg_path).expect("load config");
    assert_eq!(cfg.log_level, LogLevel::Debug);
    assert_eq!(cfg.log_file.as_deref(), Some(log_file.as_path()));
    assert_eq!(cfg.app_key.as_deref(), Some("key123"));
    assert_eq!(cfg.app_secret.as_deref(), Some("sec"));
    assert_eq!(cfg.timeout, Duration::from_secs(60));
    assert_eq!(cfg.chunk_size, 8 * 1024 * 1024);
    assert!(cfg.skip_unchanged);
    assert_eq!(cfg.index_flush_interval, 25);
}

#[test]
fn missing_elements_keep_defaults() {
    let td = tempdir().unwrap();
    let p = td.path().join("config.xml");
    fs::write(&p, "<config><log_level>quiet</log_level></config>").unwrap();
    let cfg = load_config_from_xml_path(&p).unwrap();
    assert_eq!(
        cfg,
        Config {
            log_level: LogLevel::Quiet,
            ..Config::default()
        }
    );

    fs::write(&p, "  \n").unwrap();
    assert_eq!(load_config_from_xml_path(&p).unwrap(), Config::default());
}

#[test]
fn unknown_elements_and_bad_values_are_rejected() {
    let td = tempdir().unwrap();
    let p = td.path().join("config.xml");

    fs::write(&p, "<config><download_base>/x</download_base></config>").unwrap();
    assert!(load_config_from_xml_path(&p).is_err());

    fs::write(&p, "<config><timeout_seconds>soon</timeout_seconds></config>").unwrap();
    assert!(load_config_from_xml_path(&p).is_err());

    fs::write(&p, "<config><chunk_size_mb>151</chunk_size_mb></config>").unwrap();
    assert!(load_config_from_xml_path(&p).is_err());

    fs::write(&p, "<config><timeout_seconds>0</timeout_seconds></config>").unwrap();
    assert!(load_config_from_xml_path(&p).is_err());

    fs::write(&p, "<config><log_level>loud</log_level></config>").unwrap();
    assert!(load_config_from_xml_path(&p).is_err());
}

#[test]
fn template_parses_to_defaults() {
    let td = tempdir().unwrap();
    let p = td.path().join("nested").join("config.xml");
    create_template_config(&p).unwrap();
    assert_eq!(load_config_from_xml_path(&p).unwrap(), Config::default());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}

#[test]
#[serial]
fn env_override_is_loaded() {
    let td = tempdir().unwrap();
    let p = td.path().join("custom.xml");
    fs::write(&p, "<config><skip_unchanged>true</skip_unchanged></config>").unwrap();

    unsafe {
        std::env::set_var(CONFIG_ENV, &p);
    }
    let res = load_or_init();
    unsafe {
        std::env::remove_var(CONFIG_ENV);
    }

    match res.unwrap() {
        LoadResult::Loaded(cfg, path) => {
            assert!(cfg.skip_unchanged);
            assert_eq!(path, p);
        }
        other => panic!("expected Loaded, got {other:?}"),
    }
}

#[test]
#[serial]
fn env_override_to_missing_file_is_an_error() {
    let td = tempdir().unwrap();
    let p = td.path().join("absent.xml");

    unsafe {
        std::env::set_var(CONFIG_ENV, &p);
    }
    let res = load_or_init();
    unsafe {
        std::env::remove_var(CONFIG_ENV);
    }

    assert!(res.is_err());
    assert!(!p.exists(), "no template should be written for an explicit path");
}
