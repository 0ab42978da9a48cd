//! Agent configuration
//!
//! Plain-value configuration read once at startup and handed to the core
//! components. Loading from files and environment lives in the binary.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Top-level agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Canvas (surface) connection settings
    pub surface: SurfaceConfig,

    /// Generative backend settings
    pub generation: GenerationConfig,

    /// Retry policy for outbound calls
    pub retry: RetryConfig,

    /// Event stream reconnection settings
    pub stream: StreamConfig,

    /// Debounce settings for question detection
    pub debounce: DebounceConfig,

    /// Workflow thresholds and timeouts
    pub workflow: WorkflowConfig,
}

/// Canvas server connection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Base URL of the canvas server (e.g. https://canvus.example.com)
    pub server_url: String,

    /// Canvas identifier to watch
    pub canvas_id: String,

    /// API key sent as `Private-Token`
    pub api_key: Option<String>,

    /// Per-request HTTP timeout in seconds (default: 30)
    pub request_timeout_secs: u64,
}

/// Generative text and image backends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Gemini API key
    pub gemini_api_key: Option<String>,

    /// Model used for persona chat sessions (default: gemini-2.5-flash)
    pub chat_model: String,

    /// Model used for persona generation (default: gemini-2.5-flash)
    pub persona_model: String,

    /// Sampling temperature (default: 0.7)
    pub temperature: f32,

    /// OpenAI API key for headshot images
    pub openai_api_key: Option<String>,

    /// Image model (default: dall-e-2)
    pub image_model: String,

    /// Image size (default: 512x512)
    pub image_size: String,

    /// Per-request HTTP timeout in seconds (default: 60)
    pub request_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            chat_model: "gemini-2.5-flash".to_string(),
            persona_model: "gemini-2.5-flash".to_string(),
            temperature: 0.7,
            openai_api_key: None,
            image_model: "dall-e-2".to_string(),
            image_size: "512x512".to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// Exponential backoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry in milliseconds (default: 1000)
    pub initial_delay_ms: u64,

    /// Cap for any single delay in milliseconds (default: 32000)
    pub max_delay_ms: u64,

    /// Total attempts including the first (default: 5)
    pub max_attempts: u32,

    /// Fraction of the delay randomised either way (default: 0.1)
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 32_000,
            max_attempts: 5,
            jitter_fraction: 0.1,
        }
    }
}

/// Event stream reconnection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// First reconnect delay in milliseconds (default: 1000)
    pub initial_backoff_ms: u64,

    /// Reconnect delay cap in milliseconds (default: 30000)
    pub max_backoff_ms: u64,

    /// Consecutive failed cycles before giving up (default: 10)
    pub max_reconnect_attempts: u32,

    /// A connection up this long resets the backoff, in seconds (default: 30)
    pub stable_after_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            max_reconnect_attempts: 10,
            stable_after_secs: 30,
        }
    }
}

/// Debounce settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Quiet period in milliseconds (default: 1000)
    pub quiet_period_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 1000,
        }
    }
}

/// Workflow thresholds and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Number of personas per question (default: 4)
    pub persona_count: usize,

    /// Minimum personas to proceed in degraded mode (default: 1)
    pub min_personas: usize,

    /// Minimum first-stage answers to continue (default: 1)
    pub min_answers: usize,

    /// Minimum second-stage reactions to continue to linking (default: 0)
    pub min_reactions: usize,

    /// How long to wait for a question to be typed, in seconds (default: 300)
    pub question_timeout_secs: u64,

    /// Poll interval while waiting for a question, in milliseconds (default: 500)
    pub poll_interval_ms: u64,

    /// Answers longer than this many characters are rephrased (default: 256)
    pub chat_char_limit: usize,

    /// Overall bound for one workflow run, in seconds (default: 900)
    pub workflow_timeout_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            persona_count: 4,
            min_personas: 1,
            min_answers: 1,
            min_reactions: 0,
            question_timeout_secs: 300, // 5 minutes
            poll_interval_ms: 500,
            chat_char_limit: 256,
            workflow_timeout_secs: 900,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl StreamConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn stable_after(&self) -> Duration {
        Duration::from_secs(self.stable_after_secs)
    }
}

impl DebounceConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

impl WorkflowConfig {
    pub fn question_timeout(&self) -> Duration {
        Duration::from_secs(self.question_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn workflow_timeout(&self) -> Duration {
        Duration::from_secs(self.workflow_timeout_secs)
    }
}

impl AgentConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.surface.server_url.is_empty() {
            return Err(ConfigValidationError::MissingField("surface.server_url".into()));
        }

        if self.surface.canvas_id.is_empty() {
            return Err(ConfigValidationError::MissingField("surface.canvas_id".into()));
        }

        if self.generation.gemini_api_key.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigValidationError::MissingField("generation.gemini_api_key".into()));
        }

        self.validate_tuning()
    }

    /// Validate thresholds and timings only (no credentials required)
    pub fn validate_tuning(&self) -> Result<(), ConfigValidationError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "retry.max_attempts".into(),
                message: "must be greater than 0".into(),
            });
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_fraction) {
            return Err(ConfigValidationError::InvalidValue {
                field: "retry.jitter_fraction".into(),
                message: "must be between 0.0 and 1.0".into(),
            });
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigValidationError::InvalidValue {
                field: "retry.initial_delay_ms".into(),
                message: "must not exceed retry.max_delay_ms".into(),
            });
        }

        let wf = &self.workflow;
        if wf.persona_count == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "workflow.persona_count".into(),
                message: "must be greater than 0".into(),
            });
        }

        if wf.min_personas == 0 || wf.min_personas > wf.persona_count {
            return Err(ConfigValidationError::InvalidValue {
                field: "workflow.min_personas".into(),
                message: format!("must be between 1 and {}", wf.persona_count),
            });
        }

        if wf.min_answers == 0 || wf.min_answers > wf.persona_count {
            return Err(ConfigValidationError::InvalidValue {
                field: "workflow.min_answers".into(),
                message: format!("must be between 1 and {}", wf.persona_count),
            });
        }

        if wf.poll_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "workflow.poll_interval_ms".into(),
                message: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, Error)]
pub enum ConfigValidationError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
