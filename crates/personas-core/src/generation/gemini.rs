//! Gemini `generateContent` text backend with per-session chat history.

use super::{Generator, ModelRole, TextRequest};
use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::http::check_response;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn new(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [Content],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationParams,
}

#[derive(Serialize)]
struct GenerationParams {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect::<String>())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
struct Session {
    system: Option<String>,
    history: Vec<Content>,
}

/// Text generation against the Gemini REST API
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    chat_model: String,
    persona_model: String,
    temperature: f32,
    request_timeout: Duration,
    sessions: DashMap<String, Session>,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = config
            .gemini_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Validation("gemini_api_key is required".into()))?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            chat_model: config.chat_model.clone(),
            persona_model: config.persona_model.clone(),
            temperature: config.temperature,
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            sessions: DashMap::new(),
            client,
        })
    }

    /// Point the client at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn model(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::Chat => &self.chat_model,
            ModelRole::Personas => &self.persona_model,
        }
    }

    /// Number of live chat sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    async fn call(&self, model: &str, system: Option<&str>, contents: &[Content]) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        debug!(model, turns = contents.len(), "Gemini request");

        let body = GenerateRequest {
            contents,
            system_instruction: system.map(|s| Content::new("", s)),
            generation_config: GenerationParams {
                temperature: self.temperature,
            },
        };

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await?;
        let resp = check_response(resp, "gemini generateContent").await?;
        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| Error::Other(format!("Failed to parse Gemini response: {}", e)))?;

        let text = parsed.text();
        if text.trim().is_empty() {
            return Err(Error::EmptyGeneration);
        }
        Ok(text)
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate_text(&self, request: &TextRequest) -> Result<String> {
        let model = self.model(request.role).to_string();

        let Some(ref key) = request.session else {
            let contents = [Content::new("user", &request.prompt)];
            return self
                .call(&model, request.system.as_deref(), &contents)
                .await;
        };

        // Snapshot outside the shard lock; history only grows on success.
        let mut session = self
            .sessions
            .get(key)
            .map(|s| s.value().clone())
            .unwrap_or_else(|| Session {
                system: request.system.clone(),
                history: Vec::new(),
            });
        session.history.push(Content::new("user", &request.prompt));

        let reply = self
            .call(&model, session.system.as_deref(), &session.history)
            .await?;

        session.history.push(Content::new("model", &reply));
        self.sessions.insert(key.clone(), session);
        Ok(reply)
    }

    async fn generate_image(&self, _prompt: &str) -> Result<Vec<u8>> {
        Err(Error::Validation(
            "image generation is not supported by the Gemini text backend".into(),
        ))
    }

    fn end_session(&self, session: &str) {
        if self.sessions.remove(session).is_some() {
            debug!(session, "Ended chat session");
        }
    }
}
