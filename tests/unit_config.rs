use std::fs;

use nexapro::config::{Config, CONFIG_FILE_NAME};
use nexapro::error::Error;
use nexapro::reconcile::ReconcileMode;

#[test]
fn config_defaults_when_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config::load_from_dir(dir.path()).expect("defaults");

    assert_eq!(config.gateway.base_url, "http://localhost:3001/api");
    assert!(config.gateway.timeout_secs.is_none());
    assert_eq!(config.session.role, "member");
    assert_eq!(config.session.name, "unknown");
    assert_eq!(config.sync.reconcile_mode, ReconcileMode::Always);
    assert!(!config.sync.offline_fallback);
    assert!(config.sync.activity_log);
    assert_eq!(config.events.capacity, 256);
}

#[test]
fn config_overrides_from_toml() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join(CONFIG_FILE_NAME);
    let toml = r#"
[gateway]
base_url = "https://nexapro.example.com/api"
timeout_secs = 15

[session]
user_id = 7
name = "Ana"
role = "manager"
token = "secret"

[sync]
reconcile_mode = "respect_overrides"
offline_fallback = true
activity_log = false

[events]
capacity = 32
"#;

    fs::write(&config_path, toml)?;

    let config = Config::load_from_dir(dir.path())?;

    assert_eq!(config.gateway.base_url, "https://nexapro.example.com/api");
    assert_eq!(config.gateway.timeout_secs, Some(15));
    assert_eq!(config.session.user_id, 7);
    assert_eq!(config.session.role, "manager");
    assert_eq!(config.session.token.as_deref(), Some("secret"));
    assert_eq!(config.sync.reconcile_mode, ReconcileMode::RespectOverrides);
    assert!(config.sync.offline_fallback);
    assert!(!config.sync.activity_log);
    assert_eq!(config.events.capacity, 32);

    Ok(())
}

#[test]
fn invalid_file_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        "[gateway]\nbase_url = \"ftp://files.example.com\"\n",
    )?;

    let err = Config::load_from_dir(dir.path()).expect_err("bad scheme");
    assert!(matches!(err, Error::InvalidConfig(_)));

    fs::write(dir.path().join(CONFIG_FILE_NAME), "[gateway\n")?;
    let err = Config::load_from_dir(dir.path()).expect_err("bad toml");
    assert!(matches!(err, Error::TomlParse(_)));
    Ok(())
}

#[test]
fn explicit_path_wins_over_discovery() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("custom.toml");
    let mut config = Config::default();
    config.session.role = "admin".to_string();
    config.events.capacity = 8;
    config.save(&path)?;

    let loaded = Config::discover(Some(&path))?;
    assert_eq!(loaded.session.role, "admin");
    assert_eq!(loaded.events.capacity, 8);
    Ok(())
}
