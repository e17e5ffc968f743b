//! Tests for loading settings and rules files

use std::fs;

use tcpfwd::{ConfigManager, ForwardingRule, Settings};
use tempfile::TempDir;

#[test]
fn test_load_rules_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("rules.json");
    fs::write(
        &path,
        r#"[
            { "target": "10.0.0.5:3389", "port": 13389 },
            { "target": "db.internal:5432", "port": 15432 }
        ]"#,
    )
    .unwrap();

    let rules = ConfigManager::load_rules_from_file(&path).unwrap();
    assert_eq!(
        rules,
        vec![
            ForwardingRule::new("10.0.0.5:3389", 13389),
            ForwardingRule::new("db.internal:5432", 15432),
        ]
    );
}

#[test]
fn test_missing_rules_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nope.json");

    let err = ConfigManager::load_rules_from_file(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("nope.json"));
}

#[test]
fn test_malformed_rules_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("rules.json");
    fs::write(&path, r#"{ "target": "10.0.0.5:3389", "port": 13389 }"#).unwrap();

    let err = ConfigManager::load_rules_from_file(&path).unwrap_err();
    assert!(err.to_string().contains("Could not decode rules file"));
}

#[test]
fn test_missing_settings_file_gives_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("tcpfwd.toml");

    let settings = ConfigManager::load_settings_from_file(&path).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
fn test_load_settings_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("tcpfwd.toml");
    fs::write(
        &path,
        r#"
listen_host = "127.0.0.1"
buffer_size = 65536
log_to_file = false
"#,
    )
    .unwrap();

    let settings = ConfigManager::load_settings_from_file(&path).unwrap();
    assert_eq!(settings.listen_host, "127.0.0.1");
    assert_eq!(settings.buffer_size, 65536);
    assert!(!settings.log_to_file);
    assert_eq!(settings.log_level, "info");
    assert!(settings.validate().is_ok());
}

#[test]
fn test_invalid_settings_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("tcpfwd.toml");
    fs::write(&path, "buffer_size = \"large\"\n").unwrap();

    assert!(ConfigManager::load_settings_from_file(&path).is_err());
}
