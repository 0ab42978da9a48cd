//! Error types for personas-agent.

use std::path::PathBuf;
use thiserror::Error;

/// Startup errors raised before the agent runs.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Invalid value for {name}: {value:?} ({message})")]
    InvalidEnv {
        name: &'static str,
        value: String,
        message: String,
    },

    #[error("Event feed unavailable after {0} attempts")]
    FeedUnavailable(u32),
}

impl AgentError {
    pub fn invalid_env(name: &'static str, value: &str, message: impl Into<String>) -> Self {
        AgentError::InvalidEnv {
            name,
            value: value.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for personas-agent startup.
pub type AgentResult<T> = Result<T, AgentError>;
