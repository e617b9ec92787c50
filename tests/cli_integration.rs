//! CLI integration tests.
//!
//! These tests verify the CLI argument parsing and configuration loading.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

use status_relay::cli::{parse_args_from, Args, Subcommand};
use status_relay::config::{Config, ConfigError};

fn args(args: &[&str]) -> Vec<OsString> {
    std::iter::once("status-relay")
        .chain(args.iter().copied())
        .map(OsString::from)
        .collect()
}

fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

// ============================================================================
// CLI Argument Tests
// ============================================================================

#[test]
fn test_cli_defaults() {
    let result = parse_args_from(args(&[])).unwrap();

    assert_eq!(result.command, Subcommand::Run);
    assert!(result.config.is_none());
    assert!(result.data_dir.is_none());
    assert!(result.name.is_none());
    assert!(result.phone.is_none());
    assert!(!result.yes);
}

#[test]
fn test_cli_full_add() {
    let result = parse_args_from(args(&[
        "-c",
        "/etc/status-relay.json",
        "-l",
        "debug",
        "add",
        "--name",
        "david",
        "--phone",
        "+234 801 234 5678",
    ]))
    .unwrap();

    assert_eq!(result.command, Subcommand::Add);
    assert_eq!(result.name.as_deref(), Some("david"));
    assert_eq!(result.phone.as_deref(), Some("+234 801 234 5678"));
    assert_eq!(result.log_level, Some("debug".to_string()));
    assert_eq!(
        result.config.unwrap().to_str().unwrap(),
        "/etc/status-relay.json"
    );
}

#[test]
fn test_cli_remove_confirmed() {
    let result = parse_args_from(args(&["remove", "--yes", "alice"])).unwrap();
    assert_eq!(result.command, Subcommand::Remove);
    assert_eq!(result.name.as_deref(), Some("alice"));
    assert!(result.yes);
}

#[test]
fn test_cli_rejects_garbage() {
    assert!(parse_args_from(args(&["launch"])).is_err());
    assert!(parse_args_from(args(&["run", "now"])).is_err());
    assert!(parse_args_from(args(&["--port", "80"])).is_err());
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_config_file_then_args() {
    let file = config_file(
        r#"{
            "storage": { "sessions_dir": "/from/file/sessions" },
            "supervisor": { "poll_interval_secs": 3 },
            "logging": { "level": "warn" }
        }"#,
    );

    let mut config = Config::from_file(file.path()).unwrap();
    assert_eq!(
        config.storage.sessions_dir,
        PathBuf::from("/from/file/sessions")
    );

    let args = Args {
        data_dir: Some(PathBuf::from("/from/args")),
        log_level: Some("trace".to_string()),
        ..Args::default()
    };
    config.apply_args(&args);

    // CLI wins over the file
    assert_eq!(
        config.storage.sessions_dir,
        PathBuf::from("/from/args/sessions")
    );
    assert_eq!(config.log_filter(), "trace");
    // Untouched file values survive
    assert_eq!(
        config.supervisor_config().unwrap().poll_interval,
        Duration::from_secs(3)
    );
}

#[test]
fn test_config_load_with_file() {
    let file = config_file(r#"{ "commands": { "prefix": "/", "retention_hours": 6 } }"#);
    let args = Args {
        config: Some(file.path().to_path_buf()),
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();
    assert_eq!(config.retention(), Duration::from_secs(6 * 3600));
    assert_eq!(config.supervisor_config().unwrap().prefix, '/');
}

#[test]
fn test_config_load_rejects_invalid() {
    let file = config_file(r#"{ "transport": { "backend": "smoke-signals" } }"#);
    let args = Args {
        config: Some(file.path().to_path_buf()),
        ..Args::default()
    };

    match Config::load(&args) {
        Err(ConfigError::InvalidValue(key, value)) => {
            assert_eq!(key, "transport.backend");
            assert_eq!(value, "smoke-signals");
        }
        other => panic!("expected invalid backend, got {other:?}"),
    }
}

#[test]
fn test_config_load_missing_file() {
    let args = Args {
        config: Some(PathBuf::from("/definitely/not/here.json")),
        ..Args::default()
    };
    assert!(matches!(Config::load(&args), Err(ConfigError::Io(_))));
}
