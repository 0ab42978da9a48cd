//! Generative text and image backends.
//!
//! The workflow depends only on the [`Generator`] trait. Text calls may name a
//! session; backends keep per-session conversation history so a persona's
//! later answers see its earlier ones.

#[cfg(feature = "client")]
mod gemini;
#[cfg(feature = "client")]
mod openai;
pub mod prompts;

#[cfg(feature = "client")]
pub use gemini::GeminiClient;
#[cfg(feature = "client")]
pub use openai::OpenAiImageClient;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::sync::Arc;

/// Which configured model a text request should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelRole {
    /// Conversational persona answers
    #[default]
    Chat,
    /// One-shot persona generation
    Personas,
}

/// A single text generation call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextRequest {
    /// System instruction, applied when a session starts
    pub system: Option<String>,
    /// User turn
    pub prompt: String,
    /// Conversation key; `None` means a stateless call
    pub session: Option<String>,
    pub role: ModelRole,
}

impl TextRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn in_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn for_role(mut self, role: ModelRole) -> Self {
        self.role = role;
        self
    }
}

/// Generative text and image collaborator
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate_text(&self, request: &TextRequest) -> Result<String>;

    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>>;

    /// Drop any history kept for `session`.
    fn end_session(&self, _session: &str) {}
}

/// Generator decorator applying a retry policy to every call
pub struct RetryingGenerator {
    inner: Arc<dyn Generator>,
    policy: RetryPolicy,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn Generator>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Generator for RetryingGenerator {
    async fn generate_text(&self, request: &TextRequest) -> Result<String> {
        self.policy
            .execute("generate.text", || self.inner.generate_text(request))
            .await
    }

    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>> {
        self.policy
            .execute("generate.image", || self.inner.generate_image(prompt))
            .await
    }

    fn end_session(&self, session: &str) {
        self.inner.end_session(session);
    }
}

/// Routes text and image calls to separate backends
pub struct CompositeGenerator {
    text: Arc<dyn Generator>,
    image: Option<Arc<dyn Generator>>,
}

impl CompositeGenerator {
    pub fn new(text: Arc<dyn Generator>, image: Option<Arc<dyn Generator>>) -> Self {
        Self { text, image }
    }
}

#[async_trait]
impl Generator for CompositeGenerator {
    async fn generate_text(&self, request: &TextRequest) -> Result<String> {
        self.text.generate_text(request).await
    }

    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>> {
        match self.image {
            Some(ref image) => image.generate_image(prompt).await,
            None => Err(Error::Validation("no image backend configured".into())),
        }
    }

    fn end_session(&self, session: &str) {
        self.text.end_session(session);
    }
}
