use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaypointError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM provider returned HTTP {status}: {body}")]
    LlmHttp { status: u16, body: String },

    #[error("LLM request timed out: {0}")]
    LlmTimeout(String),

    #[error("LLM connection failed: {0}")]
    LlmConnection(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // External service errors (weather, geocoding)
    #[error("Service error: {service}: {message}")]
    Service { service: String, message: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WaypointError>;
