//! Config module tests

use super::*;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("QUILLMQ_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${QUILLMQ_TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("QUILLMQ_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    // Unset var should use default
    std::env::remove_var("QUILLMQ_TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${QUILLMQ_TEST_VAR_UNSET:-default_value}\"");
    assert_eq!(result, "value = \"default_value\"");

    // Set var should use env value
    std::env::set_var("QUILLMQ_TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${QUILLMQ_TEST_VAR_SET:-default_value}\"");
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("QUILLMQ_TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("QUILLMQ_TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${QUILLMQ_TEST_VAR_MISSING}\"");
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_load_config_with_env_substitution() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("quillmq.toml");

    std::env::set_var("QUILLMQ_TEST_INFLIGHT", "8");

    let config_content = r#"
[limits]
max_inflight = ${QUILLMQ_TEST_INFLIGHT}
max_retries = ${QUILLMQ_TEST_RETRIES:-5}
retry_interval = "250ms"
"#;

    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::load(&config_path).unwrap();
    assert_eq!(config.limits.max_inflight, 8);
    assert_eq!(config.limits.max_retries, 5); // Uses default
    assert_eq!(config.limits.retry_interval, Duration::from_millis(250));
    // Untouched sections keep their defaults
    assert_eq!(config.session.default_keep_alive, 60);

    std::env::remove_var("QUILLMQ_TEST_INFLIGHT");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = Config::load(temp_dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.limits.max_connections, 100_000);
    assert_eq!(config.limits.retry_interval, Duration::from_secs(10));
    assert_eq!(config.persistence.backend, BackendType::Memory);
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.limits.max_connections, 100_000);
    assert_eq!(config.limits.max_inflight, 32);
    assert_eq!(config.limits.max_queued_messages, 1000);
    assert_eq!(config.limits.max_awaiting_rel, 100);
    assert_eq!(config.limits.max_retries, 3);
    assert_eq!(config.mqtt.max_qos, 2);
    assert!(config.mqtt.retain_available);
    assert!(!config.persistence.enabled);
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_full_config() {
    let toml = r#"
[log]
level = "debug"

[limits]
max_connections = 50000
max_inflight = 16
max_queued_messages = 500
max_awaiting_rel = 50
retry_interval = "20s"
max_retries = 5
outbound_channel_capacity = 64

[session]
default_keep_alive = 30
max_keep_alive = 300

[mqtt]
max_qos = 1
retain_available = false
max_topic_levels = 8

[persistence]
enabled = true
backend = "fjall"
path = "/var/lib/quillmq"
"#;

    let config = Config::parse(toml).unwrap();
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.limits.max_connections, 50000);
    assert_eq!(config.limits.max_inflight, 16);
    assert_eq!(config.limits.retry_interval, Duration::from_secs(20));
    assert_eq!(config.limits.outbound_channel_capacity, 64);
    assert_eq!(config.session.max_keep_alive, 300);
    assert_eq!(config.mqtt.max_qos, 1);
    assert!(!config.mqtt.retain_available);
    assert_eq!(config.mqtt.max_topic_levels, 8);
    assert!(config.persistence.enabled);
    assert_eq!(config.persistence.backend, BackendType::Fjall);
}

#[test]
fn test_invalid_max_qos() {
    let toml = r#"
[mqtt]
max_qos = 3
"#;
    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_invalid_max_inflight() {
    let toml = r#"
[limits]
max_inflight = 0
"#;
    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_invalid_retry_interval() {
    let toml = r#"
[limits]
retry_interval = "0s"
"#;
    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_invalid_keep_alive_range() {
    let toml = r#"
[session]
default_keep_alive = 120
max_keep_alive = 60
"#;
    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_unknown_backend_is_parse_error() {
    let toml = r#"
[persistence]
backend = "redis"
"#;
    assert!(matches!(Config::parse(toml), Err(ConfigError::Parse(_))));
}

#[test]
fn test_open_storage() {
    let disabled = PersistenceConfig::default();
    assert!(disabled.open_storage().unwrap().is_none());

    let memory = PersistenceConfig {
        enabled: true,
        ..Default::default()
    };
    assert!(memory.open_storage().unwrap().is_some());

    let temp_dir = tempfile::tempdir().unwrap();
    let fjall = PersistenceConfig {
        enabled: true,
        backend: BackendType::Fjall,
        path: temp_dir.path().join("retained"),
    };
    assert!(fjall.open_storage().unwrap().is_some());
}
