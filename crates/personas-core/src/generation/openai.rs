//! OpenAI `images/generations` backend for persona headshots.

use super::{Generator, TextRequest};
use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::http::check_response;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/images/generations";

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    response_format: &'a str,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

/// Image generation against the OpenAI REST API
pub struct OpenAiImageClient {
    endpoint: String,
    api_key: String,
    model: String,
    size: String,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiImageClient {
    /// Returns `Ok(None)` when no OpenAI key is configured.
    pub fn from_config(config: &GenerationConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.openai_api_key.clone().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Some(Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key,
            model: config.image_model.clone(),
            size: config.image_size.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            client,
        }))
    }
}

fn decode_first(response: ImageResponse) -> Result<Vec<u8>> {
    let encoded = response
        .data
        .into_iter()
        .find_map(|d| d.b64_json)
        .ok_or(Error::EmptyGeneration)?;
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Other(format!("Invalid image payload: {}", e)))
}

#[async_trait]
impl Generator for OpenAiImageClient {
    async fn generate_text(&self, _request: &TextRequest) -> Result<String> {
        Err(Error::Validation(
            "text generation is not supported by the image backend".into(),
        ))
    }

    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>> {
        debug!(model = %self.model, size = %self.size, "Image request");
        let body = ImageRequest {
            model: &self.model,
            prompt,
            n: 1,
            size: &self.size,
            response_format: "b64_json",
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await?;
        let resp = check_response(resp, "openai images/generations").await?;
        let parsed: ImageResponse = resp
            .json()
            .await
            .map_err(|e| Error::Other(format!("Failed to parse image response: {}", e)))?;
        decode_first(parsed)
    }
}
