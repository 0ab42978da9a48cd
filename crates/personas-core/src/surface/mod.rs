//! Canvas surface access.
//!
//! The workflow talks to the canvas only through [`Surface`] and reads the
//! event feed only through [`EventSource`]. [`RetryingSurface`] wraps any
//! surface so every call goes through the [`RetryPolicy`].

#[cfg(feature = "client")]
mod canvus;

#[cfg(feature = "client")]
pub use canvus::CanvusClient;

use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::types::{Attributes, ConnectorAttrs, Entity, EntityKind, NoteAttrs};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Lines of the event feed, in arrival order
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Source of the newline-delimited event feed
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a new subscription.
    async fn connect(&self) -> Result<LineStream>;
}

/// Entity operations on the canvas
#[async_trait]
pub trait Surface: Send + Sync {
    async fn create_entity(&self, kind: EntityKind, attrs: Attributes) -> Result<Entity>;

    async fn update_entity(&self, kind: EntityKind, id: &str, attrs: Attributes) -> Result<Entity>;

    async fn delete_entity(&self, kind: EntityKind, id: &str) -> Result<()>;

    async fn get_entity(&self, id: &str) -> Result<Entity>;

    async fn list_entities(&self) -> Result<Vec<Entity>>;

    async fn upload_image(&self, bytes: Vec<u8>, attrs: Attributes) -> Result<Entity>;

    // ─────────────────────────────────────────────────────────────────────────
    // Convenience wrappers
    // ─────────────────────────────────────────────────────────────────────────

    async fn create_note(&self, note: NoteAttrs) -> Result<Entity> {
        self.create_entity(EntityKind::Note, note.into_attributes())
            .await
    }

    async fn update_note(&self, id: &str, note: NoteAttrs) -> Result<Entity> {
        self.update_entity(EntityKind::Note, id, note.into_attributes())
            .await
    }

    async fn delete_note(&self, id: &str) -> Result<()> {
        self.delete_entity(EntityKind::Note, id).await
    }

    async fn link(&self, src: &str, dst: &str) -> Result<Entity> {
        self.create_entity(
            EntityKind::Connector,
            ConnectorAttrs::between(src, dst).into_attributes(),
        )
        .await
    }
}

/// Surface decorator applying a retry policy to every call
pub struct RetryingSurface {
    inner: Arc<dyn Surface>,
    policy: RetryPolicy,
}

impl RetryingSurface {
    pub fn new(inner: Arc<dyn Surface>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Surface for RetryingSurface {
    async fn create_entity(&self, kind: EntityKind, attrs: Attributes) -> Result<Entity> {
        self.policy
            .execute("surface.create", || self.inner.create_entity(kind, attrs.clone()))
            .await
    }

    async fn update_entity(&self, kind: EntityKind, id: &str, attrs: Attributes) -> Result<Entity> {
        self.policy
            .execute("surface.update", || {
                self.inner.update_entity(kind, id, attrs.clone())
            })
            .await
    }

    async fn delete_entity(&self, kind: EntityKind, id: &str) -> Result<()> {
        self.policy
            .execute("surface.delete", || self.inner.delete_entity(kind, id))
            .await
    }

    async fn get_entity(&self, id: &str) -> Result<Entity> {
        self.policy
            .execute("surface.get", || self.inner.get_entity(id))
            .await
    }

    async fn list_entities(&self) -> Result<Vec<Entity>> {
        self.policy
            .execute("surface.list", || self.inner.list_entities())
            .await
    }

    async fn upload_image(&self, bytes: Vec<u8>, attrs: Attributes) -> Result<Entity> {
        self.policy
            .execute("surface.upload_image", || {
                self.inner.upload_image(bytes.clone(), attrs.clone())
            })
            .await
    }
}
