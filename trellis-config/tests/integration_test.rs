//! Integration tests for trellis-config

use std::fs;
use trellis_config::*;
use trellis_core::{ContainerOptions, ExplicitBean};

#[test]
fn test_toml_file_then_env_override() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.toml");
    fs::write(
        &path,
        r#"
        [server]
        port = 9000
        static_root = "./assets/"

        [[beans]]
        id = "store"
        type = "app::MemoryStore"
        "#,
    )
    .unwrap();

    let manager = ConfigManager::with_prefix(DEFAULT_PREFIX);
    manager.load_file(&path).unwrap();

    let env = EnvLoader::trellis().load_from([
        ("TRELLIS_SERVER__PORT".to_string(), "9100".to_string()),
        ("TRELLIS_CONTAINER__AUTOWIRE_SINGLE_IMPL".to_string(), "false".to_string()),
        ("HOME".to_string(), "/root".to_string()),
    ]);
    manager.apply_env(env);

    let config = manager.app_config().unwrap();
    let gateway = config.gateway_config();
    assert_eq!(gateway.port, 9100);
    assert_eq!(gateway.host, "127.0.0.1");
    assert_eq!(gateway.static_root.to_str(), Some("./assets/"));
    assert_eq!(
        config.container_options(),
        ContainerOptions {
            autowire_single_impl: false,
        }
    );
    assert_eq!(config.explicit_beans(), vec![ExplicitBean::new("store", "app::MemoryStore")]);
    assert!(!manager.has("home"));
}

#[test]
fn test_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.json");
    fs::write(&path, r#"{"server": {"sequential": true}, "logging": {"format": "compact"}}"#).unwrap();

    let config = AppConfig::from_file(&path).unwrap();
    assert!(config.gateway_config().sequential);
    assert_eq!(config.gateway_config().port, 8080);
    assert_eq!(config.logging.format, "compact");
}

#[test]
fn test_builder_layers_sources() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.toml");
    let local = dir.path().join("local.json");
    fs::write(&base, "[server]\nport = 7000\nhost = \"0.0.0.0\"").unwrap();
    fs::write(&local, r#"{"server": {"port": 7001}}"#).unwrap();

    let manager = ConfigManager::builder()
        .file(&base)
        .optional_file(&local)
        .optional_file(dir.path().join("missing.toml"))
        .build()
        .unwrap();

    assert_eq!(manager.get_int("server.port").unwrap(), 7001);
    assert_eq!(manager.get_string("server.host").unwrap(), "0.0.0.0");
    assert_eq!(manager.keys(), vec!["server"]);
}

#[test]
fn test_missing_required_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let result = ConfigManager::builder().file(dir.path().join("absent.toml")).build();
    assert!(matches!(result, Err(ConfigError::LoadError(_))));
}

#[test]
fn test_invalid_settings_are_rejected() {
    let manager = ConfigManager::new();
    manager.set("logging.level", "chatty").unwrap();
    assert!(matches!(manager.app_config(), Err(ConfigError::ValidationError(_))));

    manager.set("logging.level", "warn").unwrap();
    manager.set("server.port", "not a port").unwrap();
    assert!(matches!(manager.app_config(), Err(ConfigError::DeserializationError(_))));
}

#[test]
fn test_extract_custom_section() {
    #[derive(serde::Deserialize)]
    struct Feature {
        enabled: bool,
        ratio: f64,
    }

    let manager = ConfigManager::new();
    manager.set("feature.enabled", true).unwrap();
    manager.set("feature.ratio", 0.25).unwrap();

    let feature: Feature = manager.get("feature").unwrap();
    assert!(feature.enabled);
    assert_eq!(feature.ratio, 0.25);
    assert_eq!(manager.get_float("feature.ratio").unwrap(), 0.25);
}
