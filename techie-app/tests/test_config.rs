#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::path::PathBuf;
use techie_app::config::ClientConfig;
use techie_executor::Shell;

#[test]
fn test_config_full_yaml() {
    let config_yaml = r#"
ws_endpoint: wss://agent.example.com/ws
api_endpoint: https://api.example.com
shell: pwsh
settings_path: /tmp/techie/settings.yaml
token: abc123
"#;

    let config = ClientConfig::from_yaml(config_yaml).unwrap();
    assert_eq!(config.ws_endpoint, "wss://agent.example.com/ws");
    assert_eq!(config.api_endpoint, "https://api.example.com");
    assert_eq!(config.settings_path, PathBuf::from("/tmp/techie/settings.yaml"));
    assert_eq!(config.token.as_deref(), Some("abc123"));
    assert_eq!(config.shell(), Shell::new("pwsh", "-Command"));
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_optional_fields_default() {
    let config_yaml = r#"
ws_endpoint: ws://localhost:9000/ws
api_endpoint: http://localhost:9000
"#;

    let config = ClientConfig::from_yaml(config_yaml).unwrap();
    assert_eq!(config.shell, None);
    assert_eq!(config.token, None);
    assert_eq!(config.settings_path, ClientConfig::default().settings_path);
    assert_eq!(config.shell(), Shell::platform_default());
}

#[test]
fn test_missing_file_gives_defaults() {
    let temp = tempfile::tempdir().unwrap();
    let config = ClientConfig::load(&temp.path().join("absent.yaml")).unwrap();
    assert_eq!(config, ClientConfig::default());
}

#[test]
fn test_save_and_load() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("nested").join("config.yaml");

    let config = ClientConfig {
        token: Some("secret".to_string()),
        shell: Some("bash".to_string()),
        ..ClientConfig::default()
    };
    config.save(&path).unwrap();

    let loaded = ClientConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_malformed_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("config.yaml");
    std::fs::write(&path, "ws_endpoint: [unclosed").unwrap();

    let err = ClientConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse"));
}

#[test]
fn test_overrides_replace_non_empty_values() {
    let vars: HashMap<&str, &str> = [
        ("TECHIE_WS_ENDPOINT", "wss://override/ws"),
        ("TECHIE_API_ENDPOINT", "  "),
        ("TECHIE_TOKEN", "tok"),
    ]
    .into_iter()
    .collect();

    let mut config = ClientConfig::default();
    config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

    assert_eq!(config.ws_endpoint, "wss://override/ws");
    assert_eq!(config.api_endpoint, ClientConfig::default().api_endpoint);
    assert_eq!(config.token.as_deref(), Some("tok"));
}

#[test]
fn test_validate_rejects_bad_endpoints() {
    let config = ClientConfig {
        ws_endpoint: "http://wrong-scheme".to_string(),
        ..ClientConfig::default()
    };
    assert!(config.validate().is_err());

    let config = ClientConfig {
        api_endpoint: "ftp://files".to_string(),
        ..ClientConfig::default()
    };
    assert!(config.validate().is_err());

    let config = ClientConfig {
        shell: Some(" ".to_string()),
        ..ClientConfig::default()
    };
    assert!(config.validate().is_err());
}
