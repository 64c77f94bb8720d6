//! The concrete flows: a question/answer loop, an email feedback loop, a
//! flight booking pipeline, and a concurrent weather forecast fan-out.

pub mod email;
pub mod flight;
pub mod forecast;
pub mod prompt;
pub mod question;
pub mod store;

pub use prompt::{ScriptedPrompter, UserPrompter};
pub use store::{ForecastStore, StoredForecast};
