use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WaypointError};

/// Top-level Waypoint configuration.
///
/// Built once at startup and threaded into whatever needs it; nothing reads
/// settings from ambient globals after this point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl ModelConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            provider: default_provider(),
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for transient LLM transport failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Ceilings for external calls and local re-prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum model requests per run (None = unlimited).
    #[serde(default = "default_request_limit")]
    pub request_limit: Option<u32>,
    /// Maximum total tokens per run (None = unlimited).
    #[serde(default)]
    pub total_tokens_limit: Option<u64>,
    /// Re-prompts allowed when structured output fails validation.
    #[serde(default = "default_output_retries")]
    pub output_retries: u32,
    /// Seat selection attempts before falling back to the default seat.
    #[serde(default = "default_seat_attempts")]
    pub seat_attempts: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            request_limit: default_request_limit(),
            total_tokens_limit: None,
            output_retries: default_output_retries(),
            seat_attempts: default_seat_attempts(),
        }
    }
}

fn default_request_limit() -> Option<u32> { Some(15) }
fn default_output_retries() -> u32 { 1 }
fn default_seat_attempts() -> u32 { 3 }

/// Graph runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Optional cap on steps per run. Unset means the runner never stops a
    /// cycling graph on its own.
    #[serde(default)]
    pub max_steps: Option<usize>,
    /// Directory holding persisted run histories.
    #[serde(default = "default_history_dir")]
    pub history_dir: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_steps: None,
            history_dir: default_history_dir(),
        }
    }
}

impl GraphConfig {
    pub fn history_path(&self) -> PathBuf {
        expand_home(&self.history_dir)
    }
}

fn default_history_dir() -> String { "~/.waypoint/history".to_string() }

/// Weather and geocoding API keys. Missing keys select canned responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeatherConfig {
    #[serde(default)]
    pub weather_api_key: Option<String>,
    #[serde(default)]
    pub geo_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite path, or ":memory:".
    #[serde(default = "default_database_path")]
    pub path: String,
    /// Discard writes at the end of the process (test profile).
    #[serde(default)]
    pub force_rollback: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            force_rollback: false,
        }
    }
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.path == ":memory:"
    }

    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

fn default_database_path() -> String { "~/.waypoint/forecasts.db".to_string() }

/// Deployment profile selecting which prefixed environment variables apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvState {
    #[default]
    Dev,
    Prod,
    Test,
}

impl EnvState {
    /// Variable prefix for this profile, e.g. `DEV_`.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Dev => "DEV_",
            Self::Prod => "PROD_",
            Self::Test => "TEST_",
        }
    }

    /// Read the profile from `ENV_STATE`, defaulting to dev.
    pub fn from_env() -> Result<Self> {
        match std::env::var("ENV_STATE") {
            Ok(value) => value.parse().map_err(WaypointError::Config),
            Err(_) => Ok(Self::default()),
        }
    }
}

impl FromStr for EnvState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Self::Dev),
            "prod" => Ok(Self::Prod),
            "test" => Ok(Self::Test),
            other => Err(format!("unknown env state '{}' (expected dev, prod, or test)", other)),
        }
    }
}

impl fmt::Display for EnvState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dev => "dev",
            Self::Prod => "prod",
            Self::Test => "test",
        };
        f.write_str(name)
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WaypointError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded)
            .map_err(|e| WaypointError::Config(e.to_string()))
    }

    /// Build a configuration from `<PREFIX>_*` environment variables.
    pub fn from_env(state: EnvState) -> Self {
        Self::from_lookup(state, |key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(state: EnvState, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| {
            lookup(&format!("{}{}", state.prefix(), name)).filter(|v| !v.is_empty())
        };

        let mut model = ModelConfig::new(var("MODEL_ID").unwrap_or_else(|| "gpt-4o".to_string()));
        model.api_key = var("OPENAI_API_KEY");
        model.base_url = var("BASE_URL");

        let mut database = DatabaseConfig::default();
        if state == EnvState::Test {
            database.path = ":memory:".to_string();
            database.force_rollback = true;
        }
        if let Some(url) = var("DATABASE_URL") {
            database.path = url;
        }
        if let Some(flag) = var("DB_FORCE_ROLL_BACK") {
            database.force_rollback = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        Self {
            model,
            fallback_models: vec![],
            limits: LimitsConfig::default(),
            graph: GraphConfig::default(),
            weather: WeatherConfig {
                weather_api_key: var("WEATHER_API_KEY"),
                geo_api_key: var("GEO_API_KEY"),
            },
            database,
        }
    }

    /// A copy safe to print: every secret replaced with a mask.
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        mask(&mut copy.model.api_key);
        for fallback in &mut copy.fallback_models {
            mask(&mut fallback.api_key);
        }
        mask(&mut copy.weather.weather_api_key);
        mask(&mut copy.weather.geo_api_key);
        copy
    }
}

fn mask(secret: &mut Option<String>) {
    if secret.is_some() {
        *secret = Some("****".to_string());
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Leave unresolved references visible
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var("HOME").ok().map(PathBuf::from) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_WAYPOINT_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_WAYPOINT_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_WAYPOINT_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_WAYPOINT_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_WAYPOINT_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let toml_str = r#"
[model]
model_id = "gpt-4o"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.provider, "openai");
        assert_eq!(config.limits.request_limit, Some(15));
        assert_eq!(config.limits.output_retries, 1);
        assert_eq!(config.limits.seat_attempts, 3);
        assert!(config.graph.max_steps.is_none());
        assert!(config.weather.weather_api_key.is_none());
        assert!(config.fallback_models.is_empty());
    }

    #[test]
    fn test_from_lookup_uses_profile_prefix() {
        let vars: HashMap<&str, &str> = [
            ("PROD_OPENAI_API_KEY", "sk-prod"),
            ("PROD_BASE_URL", "https://api.deepseek.com"),
            ("PROD_MODEL_ID", "deepseek-chat"),
            ("DEV_OPENAI_API_KEY", "sk-dev"),
            ("PROD_GEO_API_KEY", "geo"),
        ]
        .into_iter()
        .collect();

        let config = AppConfig::from_lookup(EnvState::Prod, |k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.model.api_key.as_deref(), Some("sk-prod"));
        assert_eq!(config.model.base_url.as_deref(), Some("https://api.deepseek.com"));
        assert_eq!(config.model.model_id, "deepseek-chat");
        assert_eq!(config.weather.geo_api_key.as_deref(), Some("geo"));
        assert!(config.weather.weather_api_key.is_none());
        assert!(!config.database.force_rollback);
    }

    #[test]
    fn test_test_profile_forces_rollback() {
        let config = AppConfig::from_lookup(EnvState::Test, |_| None);
        assert!(config.database.is_memory());
        assert!(config.database.force_rollback);
        assert_eq!(config.model.model_id, "gpt-4o");
    }

    #[test]
    fn test_env_state_parse() {
        assert_eq!("PROD".parse::<EnvState>().unwrap(), EnvState::Prod);
        assert_eq!(" test ".parse::<EnvState>().unwrap(), EnvState::Test);
        assert!("staging".parse::<EnvState>().is_err());
        assert_eq!(EnvState::Dev.to_string(), "dev");
    }

    #[test]
    fn test_masked_hides_secrets() {
        let mut config = AppConfig::from_lookup(EnvState::Dev, |_| None);
        config.model.api_key = Some("sk-secret".into());
        config.weather.weather_api_key = Some("w".into());
        let masked = config.masked();
        assert_eq!(masked.model.api_key.as_deref(), Some("****"));
        assert_eq!(masked.weather.weather_api_key.as_deref(), Some("****"));
        assert!(masked.weather.geo_api_key.is_none());
    }
}
