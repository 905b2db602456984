//! Tests for configuration loading and root folder resolution
//!
//! Uses serial_test for tests that manipulate CELLAR_ROOT so ENV changes
//! never race with each other.

use cellar_common::config::{load_toml_config, resolve_root_folder, TomlConfig, ROOT_FOLDER_ENV};
use serial_test::serial;
use std::env;
use std::path::PathBuf;

#[test]
fn test_missing_config_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_toml_config(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(config.matching.auto_match_threshold, 50);
    assert_eq!(config.matching.fallback_trigger_count, 5);
    assert_eq!(config.scoring.name_exact, 40);
    assert_eq!(config.sync.lock_ttl_secs, 300);
    assert_eq!(config.outbox.max_attempts, 5);
}

#[test]
fn test_partial_config_keeps_unset_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cellar-ingest.toml");
    std::fs::write(
        &path,
        r#"
        [matching]
        auto_match_threshold = 60

        [scoring]
        vintage_exact = 25

        [sync]
        reimport_policy = "replace"
        "#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();

    assert_eq!(config.matching.auto_match_threshold, 60);
    assert_eq!(config.matching.trigram_limit, 15);
    assert_eq!(config.scoring.vintage_exact, 25);
    assert_eq!(config.scoring.producer_exact, 30);
    assert_eq!(config.sync.reimport_policy, "replace");
    assert_eq!(config.sync.lock_ttl_secs, 300);
}

#[test]
fn test_malformed_config_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[matching\nauto_match_threshold = ").unwrap();

    assert!(load_toml_config(&path).is_err());
}

#[test]
#[serial]
fn test_cli_argument_wins_over_environment() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/from-env");

    let root = resolve_root_folder(Some("/tmp/from-cli"), None);
    assert_eq!(root, PathBuf::from("/tmp/from-cli"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_environment_wins_over_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/from-env");
    let config = TomlConfig {
        root_folder: Some("/tmp/from-toml".to_string()),
        ..Default::default()
    };

    let root = resolve_root_folder(None, Some(&config));
    assert_eq!(root, PathBuf::from("/tmp/from-env"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_toml_used_when_no_cli_or_environment() {
    env::remove_var(ROOT_FOLDER_ENV);
    let config = TomlConfig {
        root_folder: Some("/tmp/from-toml".to_string()),
        ..Default::default()
    };

    let root = resolve_root_folder(None, Some(&config));
    assert_eq!(root, PathBuf::from("/tmp/from-toml"));
}

#[test]
#[serial]
fn test_default_root_folder_is_not_empty() {
    env::remove_var(ROOT_FOLDER_ENV);

    let root = resolve_root_folder(None, None);
    assert!(!root.as_os_str().is_empty());
}
