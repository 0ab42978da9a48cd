//! Configuration loading for personas-agent.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Environment variables (CANVUS_SERVER, GEMINI_API_KEY, ...)
//! 2. Config file (--config, PERSONAS_CONFIG, ~/.canvas-personas/config.toml)
//! 3. Default values

use crate::error::{AgentError, AgentResult};
use anyhow::{Context, Result};
use personas_core::AgentConfig;
use std::path::{Path, PathBuf};

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".canvas-personas")
        .join("config.toml")
}

/// Load configuration from file and process environment.
///
/// An explicit path must exist; the default path is optional.
pub fn load(explicit: Option<&Path>) -> Result<AgentConfig> {
    load_with(explicit, |name| std::env::var(name).ok())
}

/// Load configuration with a custom environment lookup.
pub fn load_with(explicit: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<AgentConfig> {
    let path = match explicit {
        Some(path) if !path.exists() => return Err(AgentError::ConfigNotFound(path.to_path_buf()).into()),
        Some(path) => path.to_path_buf(),
        None => default_config_path(),
    };

    let mut config = if path.exists() {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file {}", path.display()))?
    } else {
        AgentConfig::default()
    };

    apply_env(&mut config, env)?;
    Ok(config)
}

/// Overlay environment variables onto `config`. Empty values are ignored.
fn apply_env(config: &mut AgentConfig, env: impl Fn(&str) -> Option<String>) -> AgentResult<()> {
    let var = |name: &str| env(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(v) = var("CANVUS_SERVER") {
        config.surface.server_url = v;
    }
    if let Some(v) = var("CANVAS_ID") {
        config.surface.canvas_id = v;
    }
    if let Some(v) = var("CANVUS_API_KEY") {
        config.surface.api_key = Some(v);
    }
    if let Some(v) = var("GEMINI_API_KEY") {
        config.generation.gemini_api_key = Some(v);
    }
    if let Some(v) = var("GEMINI_MODEL_CHAT") {
        config.generation.chat_model = v;
    }
    if let Some(v) = var("GEMINI_MODEL_PERSONAS") {
        config.generation.persona_model = v;
    }
    if let Some(v) = var("OPENAI_API_KEY") {
        config.generation.openai_api_key = Some(v);
    }
    if let Some(v) = var("QUESTION_TIMEOUT") {
        config.workflow.question_timeout_secs = parse_duration_secs(&v)
            .ok_or_else(|| AgentError::invalid_env("QUESTION_TIMEOUT", &v, "expected seconds or 30s/5m/1h"))?;
    }
    if let Some(v) = var("CHAT_TOKEN_LIMIT") {
        config.workflow.chat_char_limit = v
            .parse()
            .map_err(|_| AgentError::invalid_env("CHAT_TOKEN_LIMIT", &v, "expected a positive integer"))?;
    }
    if let Some(v) = var("LLM_TEMP") {
        config.generation.temperature = v
            .parse()
            .map_err(|_| AgentError::invalid_env("LLM_TEMP", &v, "expected a number"))?;
    }
    Ok(())
}

/// Parse `300`, `300s`, `5m` or `1h` into seconds.
pub fn parse_duration_secs(value: &str) -> Option<u64> {
    let value = value.trim().to_ascii_lowercase();
    let (digits, multiplier) = match value.chars().last()? {
        's' => (&value[..value.len() - 1], 1),
        'm' => (&value[..value.len() - 1], 60),
        'h' => (&value[..value.len() - 1], 3600),
        _ => (value.as_str(), 1),
    };
    digits.trim().parse::<u64>().ok()?.checked_mul(multiplier)
}

/// Show only the ends of a secret.
pub fn mask_key(key: Option<&str>) -> String {
    match key {
        None | Some("") => "(not set)".to_string(),
        Some(k) if k.chars().count() <= 8 => "****".to_string(),
        Some(k) => {
            let chars: Vec<char> = k.chars().collect();
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}...{}", head, tail)
        }
    }
}
