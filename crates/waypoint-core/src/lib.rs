pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{AppConfig, EnvState};
pub use error::{Result, WaypointError};
pub use traits::LlmClient;
pub use types::*;
