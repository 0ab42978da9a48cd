//! HTTP client for a Canvus-style canvas server.
//!
//! # Usage
//!
//! ```rust,no_run
//! use personas_core::config::SurfaceConfig;
//! use personas_core::surface::{CanvusClient, Surface};
//!
//! #[tokio::main]
//! async fn main() -> personas_core::Result<()> {
//!     let config = SurfaceConfig {
//!         server_url: "https://canvus.example.com".into(),
//!         canvas_id: "0f1e2d".into(),
//!         api_key: Some("token".into()),
//!         request_timeout_secs: 30,
//!     };
//!     let client = CanvusClient::new(&config)?;
//!     let widgets = client.list_entities().await?;
//!     println!("{} widgets", widgets.len());
//!     Ok(())
//! }
//! ```

use super::{EventSource, LineStream, Surface};
use crate::config::SurfaceConfig;
use crate::error::{Error, Result};
use crate::http::check_response;
use crate::types::{Attributes, Entity, EntityKind};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio_stream::wrappers::LinesStream;
use tokio_util::io::StreamReader;
use tracing::debug;

/// Header carrying the API key
const TOKEN_HEADER: &str = "Private-Token";

/// API client for one canvas
#[derive(Clone)]
pub struct CanvusClient {
    /// Base URL for canvas-scoped requests
    base_url: String,
    /// API key
    api_key: Option<String>,
    /// Timeout for non-streaming requests
    request_timeout: Duration,
    /// HTTP client
    client: reqwest::Client,
}

impl CanvusClient {
    /// Create a client from configuration
    pub fn new(config: &SurfaceConfig) -> Result<Self> {
        if config.server_url.is_empty() || config.canvas_id.is_empty() {
            return Err(Error::Validation(
                "server_url and canvas_id are required".into(),
            ));
        }

        // No client-wide timeout: the subscription body stays open indefinitely.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = format!(
            "{}/api/v1/canvases/{}",
            config.server_url.trim_end_matches('/'),
            config.canvas_id
        );

        let timeout_secs = match config.request_timeout_secs {
            0 => 30,
            n => n,
        };

        Ok(Self {
            base_url,
            api_key: config.api_key.clone(),
            request_timeout: Duration::from_secs(timeout_secs),
            client,
        })
    }

    /// Check that the canvas is reachable with the configured key
    pub async fn ping(&self) -> Result<Value> {
        self.get("").await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request helpers
    // ─────────────────────────────────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(reqwest::Method::GET, path, Option::<()>::None)
            .await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.request(reqwest::Method::POST, path, Some(body)).await
    }

    async fn patch<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.request(reqwest::Method::PATCH, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let req = self.builder(reqwest::Method::DELETE, path);
        let resp = req.send().await?;
        check_response(resp, path).await.map(|_| ())
    }

    fn builder(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "Canvas request");

        let mut req = self
            .client
            .request(method, &url)
            .timeout(self.request_timeout);
        if let Some(ref key) = self.api_key {
            req = req.header(TOKEN_HEADER, key);
        }
        req
    }

    async fn request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<B>,
    ) -> Result<T> {
        let mut req = self.builder(method, path);
        if let Some(ref b) = body {
            req = req.json(b);
        }

        let resp = req.send().await?;
        let resp = check_response(resp, path).await?;
        resp.json()
            .await
            .map_err(|e| Error::Other(format!("Failed to parse response from {}: {}", path, e)))
    }
}

#[async_trait]
impl Surface for CanvusClient {
    async fn create_entity(&self, kind: EntityKind, attrs: Attributes) -> Result<Entity> {
        let path = format!("/{}", kind.collection());
        self.post(&path, &attrs).await.map(Entity::from_value)
    }

    async fn update_entity(&self, kind: EntityKind, id: &str, attrs: Attributes) -> Result<Entity> {
        let path = format!("/{}/{}", kind.collection(), id);
        self.patch(&path, &attrs).await.map(Entity::from_value)
    }

    async fn delete_entity(&self, kind: EntityKind, id: &str) -> Result<()> {
        self.delete(&format!("/{}/{}", kind.collection(), id))
            .await
    }

    async fn get_entity(&self, id: &str) -> Result<Entity> {
        self.get(&format!("/widgets/{}", id))
            .await
            .map(Entity::from_value)
    }

    async fn list_entities(&self) -> Result<Vec<Entity>> {
        let values: Vec<Value> = self.get("/widgets").await?;
        Ok(values.into_iter().map(Entity::from_value).collect())
    }

    async fn upload_image(&self, bytes: Vec<u8>, attrs: Attributes) -> Result<Entity> {
        let path = "/images";
        let json = serde_json::to_string(&attrs)?;
        let file = reqwest::multipart::Part::bytes(bytes)
            .file_name("persona.png")
            .mime_str("image/png")?;
        let form = reqwest::multipart::Form::new()
            .text("json", json)
            .part("data", file);

        let resp = self
            .builder(reqwest::Method::POST, path)
            .multipart(form)
            .send()
            .await?;
        let resp = check_response(resp, path).await?;
        let value: Value = resp.json().await?;
        Ok(Entity::from_value(value))
    }
}

#[async_trait]
impl EventSource for CanvusClient {
    async fn connect(&self) -> Result<LineStream> {
        let path = "/widgets?subscribe=true";
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "Opening widget subscription");

        let mut req = self.client.get(&url);
        if let Some(ref key) = self.api_key {
            req = req.header(TOKEN_HEADER, key);
        }
        let resp = check_response(req.send().await?, path).await?;

        let body = resp.bytes_stream().map_err(std::io::Error::other);
        let lines = LinesStream::new(StreamReader::new(body).lines());
        Ok(Box::pin(lines.map(|line| line.map_err(Error::from))))
    }
}
