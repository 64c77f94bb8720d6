use std::io::Write;

use waypoint_core::config::AppConfig;
use waypoint_core::WaypointError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[model]
provider = "deepseek"
model_id = "deepseek-chat"
api_key = "sk-test-key"
base_url = "https://api.deepseek.com"
max_tokens = 2048
temperature = 0.2

[model.retry]
max_retries = 5
initial_backoff_ms = 200

[[fallback_models]]
provider = "openai"
model_id = "gpt-4o-mini"
api_key = "sk-fallback"

[limits]
request_limit = 8
output_retries = 2
seat_attempts = 4

[graph]
max_steps = 40
history_dir = "/tmp/waypoint-history"

[weather]
weather_api_key = "wx-key"
geo_api_key = "geo-key"

[database]
path = ":memory:"
force_rollback = true
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.provider, "deepseek");
    assert_eq!(config.model.model_id, "deepseek-chat");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, 2048);
    let retry = config.model.retry.as_ref().expect("retry config");
    assert_eq!(retry.max_retries, 5);
    assert_eq!(retry.initial_backoff_ms, 200);
    assert_eq!(retry.max_backoff_ms, 30000);

    assert_eq!(config.fallback_models.len(), 1);
    assert_eq!(config.fallback_models[0].model_id, "gpt-4o-mini");

    assert_eq!(config.limits.request_limit, Some(8));
    assert_eq!(config.limits.output_retries, 2);
    assert_eq!(config.limits.seat_attempts, 4);
    assert_eq!(config.graph.max_steps, Some(40));
    assert_eq!(
        config.graph.history_path(),
        std::path::PathBuf::from("/tmp/waypoint-history")
    );
    assert_eq!(config.weather.geo_api_key.as_deref(), Some("geo-key"));
    assert!(config.database.is_memory());
    assert!(config.database.force_rollback);
}

#[test]
fn test_env_var_references_expand() {
    std::env::set_var("WAYPOINT_CONFIG_TEST_KEY", "sk-from-env");
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(
        br#"
[model]
model_id = "gpt-4o"
api_key = "${WAYPOINT_CONFIG_TEST_KEY}"
"#,
    )
    .unwrap();

    let config = AppConfig::load(tmp.path()).unwrap();
    assert_eq!(config.model.api_key.as_deref(), Some("sk-from-env"));
    std::env::remove_var("WAYPOINT_CONFIG_TEST_KEY");
}

#[test]
fn test_masked_config_hides_secrets() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(
        br#"
[model]
model_id = "gpt-4o"
api_key = "sk-secret"

[weather]
weather_api_key = "wx-secret"
"#,
    )
    .unwrap();

    let config = AppConfig::load(tmp.path()).unwrap();
    let printed = toml::to_string_pretty(&config.masked()).unwrap();
    assert!(!printed.contains("sk-secret"));
    assert!(!printed.contains("wx-secret"));
    assert!(printed.contains("****"));
    // The original is untouched
    assert_eq!(config.model.api_key.as_deref(), Some("sk-secret"));
}

#[test]
fn test_missing_file_and_bad_toml() {
    let dir = tempfile::tempdir().unwrap();
    let err = AppConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, WaypointError::ConfigNotFound(_)));

    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(b"[model\nmodel_id = ").unwrap();
    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, WaypointError::Config(_)));
}
