use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use waypoint_core::config::LimitsConfig;
use waypoint_core::types::TokenUsage;

use crate::error::AgentError;

/// Ceilings checked around every model request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageLimits {
    pub request_limit: Option<u32>,
    pub total_tokens_limit: Option<u64>,
}

impl UsageLimits {
    pub fn requests(limit: u32) -> Self {
        Self {
            request_limit: Some(limit),
            total_tokens_limit: None,
        }
    }
}

impl From<&LimitsConfig> for UsageLimits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            request_limit: config.request_limit,
            total_tokens_limit: config.total_tokens_limit,
        }
    }
}

/// Running totals for one or more agent runs.
///
/// Shared by reference when several agents are delegated to within one
/// logical run, so a single budget covers all of them.
#[derive(Debug, Default)]
pub struct Usage {
    requests: AtomicU32,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl Usage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.load(Ordering::SeqCst) + self.output_tokens.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens.load(Ordering::SeqCst),
            output_tokens: self.output_tokens.load(Ordering::SeqCst),
        }
    }

    /// Count the next request, or fail without counting it if that would
    /// pass the request limit.
    pub fn check_before_request(&self, limits: &UsageLimits) -> Result<(), AgentError> {
        let Some(limit) = limits.request_limit else {
            self.requests.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        };
        self.requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| {
                AgentError::UsageLimitExceeded(format!(
                    "The next request would exceed the request_limit of {}",
                    limit
                ))
            })
    }

    /// Add the tokens reported for a response.
    pub fn record(&self, usage: TokenUsage) {
        self.input_tokens.fetch_add(usage.input_tokens, Ordering::SeqCst);
        self.output_tokens.fetch_add(usage.output_tokens, Ordering::SeqCst);
    }

    pub fn check_tokens(&self, limits: &UsageLimits) -> Result<(), AgentError> {
        match limits.total_tokens_limit {
            Some(limit) if self.total_tokens() > limit => Err(AgentError::UsageLimitExceeded(
                format!(
                    "Exceeded the total_tokens_limit of {} (total_tokens={})",
                    limit,
                    self.total_tokens()
                ),
            )),
            _ => Ok(()),
        }
    }
}
