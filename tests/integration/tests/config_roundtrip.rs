//! Config save/load roundtrip integration tests.
//!
//! These tests verify that configuration can be serialized, written to disk,
//! loaded back with identical field values, and overridden from the
//! environment.

use sesame_core::config::{AlgorithmPreference, Config, ConfigBuilder, LogLevel};
use sesame_core::env::vars;
use sesame_core::ConfigError;
use std::path::Path;
use tempfile::TempDir;

#[test]
fn test_config_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sesame.json5");

    let config = Config::default();
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.service.bus_name, "org.freedesktop.secrets");
}

#[test]
fn test_config_modify_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sesame.json5");

    let config = ConfigBuilder::new()
        .bus_name("org.example.Vault")
        .algorithm(AlgorithmPreference::Plain)
        .window_id("wayland:abc")
        .log_level(LogLevel::Debug)
        .build();
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.service.bus_name, "org.example.Vault");
    assert_eq!(loaded.session.algorithm, AlgorithmPreference::Plain);
    assert_eq!(loaded.prompt.window_id.as_deref(), Some("wayland:abc"));
    assert_eq!(loaded.logging.level, LogLevel::Debug);
}

#[test]
fn test_config_load_nonexistent() {
    let result = Config::load(Path::new("/nonexistent/sesame.json5"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[test]
fn test_config_parse_invalid() {
    let result = Config::parse("not valid json");
    assert!(result.is_err());
}

#[test]
fn test_config_json5_comments() {
    let config = Config::parse(
        r#"{
            // Prefer plain transfer on this machine
            session: { algorithm: "plain" },
        }"#,
    )
    .unwrap();
    assert_eq!(config.session.algorithm, AlgorithmPreference::Plain);
    assert_eq!(config.service.object_path, "/org/freedesktop/secrets");
}

// Only test in this binary that touches the environment
#[test]
fn test_env_overrides() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sesame.json5");
    ConfigBuilder::new()
        .algorithm(AlgorithmPreference::Plain)
        .build()
        .save(&path)
        .unwrap();

    std::env::set_var(vars::SESAME_CONFIG, &path);
    std::env::set_var(vars::SESAME_SESSION_ALGORITHM, "dh-aes");
    std::env::set_var(vars::SESAME_WINDOW_ID, "x11:7");
    std::env::set_var(vars::SESAME_LOG_LEVEL, "warning");

    let loaded = Config::load_or_default().unwrap();
    assert_eq!(loaded.session.algorithm, AlgorithmPreference::DhAes);
    assert_eq!(loaded.prompt.window_id.as_deref(), Some("x11:7"));
    assert_eq!(loaded.logging.level, LogLevel::Warn);

    std::env::set_var(vars::SESAME_SESSION_ALGORITHM, "rot13");
    assert!(matches!(
        Config::load_or_default(),
        Err(ConfigError::Validation(_))
    ));

    for var in [
        vars::SESAME_CONFIG,
        vars::SESAME_SESSION_ALGORITHM,
        vars::SESAME_WINDOW_ID,
        vars::SESAME_LOG_LEVEL,
    ] {
        std::env::remove_var(var);
    }
}
