//! Unit tests for configuration and graceful degradation
//!
//! Tests that manipulate LTR_ROOT_FOLDER are marked with #[serial]
//! to ensure they run sequentially, not in parallel.

use ltr_common::config::{
    load_toml_config, load_toml_config_or_default, write_toml_config, AlignerTomlConfig,
    CompiledDefaults, LoggingConfig, RootFolderInitializer, RootFolderResolver, TomlConfig,
    ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_compiled_defaults_for_current_platform() {
    let defaults = CompiledDefaults::for_current_platform();

    assert!(!defaults.root_folder.as_os_str().is_empty());
    assert_eq!(defaults.log_level, "info");
    assert!(defaults.log_file.is_none());
    assert!(defaults.root_folder.to_string_lossy().contains("lingtrain"));
}

#[test]
#[serial]
fn test_resolver_with_no_overrides_uses_default() {
    env::remove_var(ROOT_FOLDER_ENV);

    let resolver = RootFolderResolver::new("test-module").with_config_path(None);
    let root_folder = resolver.resolve();

    assert_eq!(root_folder, CompiledDefaults::for_current_platform().root_folder);
}

#[test]
#[serial]
fn test_resolver_env_var_beats_toml() {
    let temp_dir = TempDir::new().unwrap();
    let toml_path = temp_dir.path().join("config.toml");
    std::fs::write(&toml_path, "root_folder = \"/tmp/from-toml\"\n").unwrap();

    env::set_var(ROOT_FOLDER_ENV, "/tmp/from-env");
    let resolver = RootFolderResolver::new("test-module").with_config_path(Some(toml_path));
    let root_folder = resolver.resolve();
    env::remove_var(ROOT_FOLDER_ENV);

    assert_eq!(root_folder, PathBuf::from("/tmp/from-env"));
}

#[test]
#[serial]
fn test_resolver_cli_arg_beats_env() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/from-env");
    let resolver = RootFolderResolver::new("test-module")
        .with_cli_arg(Some(PathBuf::from("/tmp/from-cli")))
        .with_config_path(None);
    let root_folder = resolver.resolve();
    env::remove_var(ROOT_FOLDER_ENV);

    assert_eq!(root_folder, PathBuf::from("/tmp/from-cli"));
}

#[test]
#[serial]
fn test_resolver_uses_toml_when_env_missing() {
    env::remove_var(ROOT_FOLDER_ENV);

    let temp_dir = TempDir::new().unwrap();
    let toml_path = temp_dir.path().join("config.toml");
    std::fs::write(&toml_path, "root_folder = \"/tmp/from-toml\"\n").unwrap();

    let resolver = RootFolderResolver::new("test-module").with_config_path(Some(toml_path));
    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/from-toml"));
}

#[test]
fn test_initializer_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("nested").join("root");

    let initializer = RootFolderInitializer::new(root.clone());
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert_eq!(initializer.database_path(), root.join("lingtrain.db"));
}

#[test]
fn test_toml_round_trip_through_file() {
    let temp_dir = TempDir::new().unwrap();
    let toml_path = temp_dir.path().join("config.toml");

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/data/lingtrain")),
        logging: LoggingConfig {
            level: "debug".to_string(),
            log_file: None,
        },
        aligner: AlignerTomlConfig {
            processors: Some(4),
            batch_size: Some(100),
            ..Default::default()
        },
    };

    write_toml_config(&config, &toml_path).unwrap();
    let loaded = load_toml_config(&toml_path).unwrap();

    assert_eq!(loaded, config);
}

#[test]
fn test_partial_toml_fills_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let toml_path = temp_dir.path().join("config.toml");
    std::fs::write(&toml_path, "[aligner]\nprocessors = 3\n").unwrap();

    let config = load_toml_config(&toml_path).unwrap();

    assert_eq!(config.aligner.processors, Some(3));
    assert_eq!(config.aligner.batch_size, None);
    assert_eq!(config.logging.level, "info");
    assert!(config.root_folder.is_none());
}

#[test]
fn test_missing_or_invalid_toml_degrades_to_defaults() {
    let temp_dir = TempDir::new().unwrap();

    let missing = temp_dir.path().join("missing.toml");
    assert_eq!(load_toml_config_or_default(Some(&missing)), TomlConfig::default());

    let invalid = temp_dir.path().join("invalid.toml");
    std::fs::write(&invalid, "this is [not toml").unwrap();
    assert!(load_toml_config(&invalid).is_err());
    assert_eq!(load_toml_config_or_default(Some(&invalid)), TomlConfig::default());

    assert_eq!(load_toml_config_or_default(None), TomlConfig::default());
}
