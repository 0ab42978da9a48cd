//! Transient guidance notes shown next to a note while a workflow runs.
//!
//! At most one helper is live per trigger id. Showing a second helper for
//! the same trigger rewrites the existing note in place.

use crate::error::Result;
use crate::layout::{self, Placement};
use crate::surface::Surface;
use crate::types::{Entity, NoteAttrs};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Helper notes are light grey
pub const HELPER_COLOR: &str = "#e0e0e0";

/// What a helper note is telling the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperKind {
    AwaitingQuestion,
    GeneratingPersonas,
    GeneratingAnswers,
}

impl HelperKind {
    pub fn title(&self) -> &'static str {
        match self {
            HelperKind::AwaitingQuestion | HelperKind::GeneratingAnswers => {
                "Helper: Please enter a question for this note"
            }
            HelperKind::GeneratingPersonas => "Helper: Generating personas, please wait...",
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            HelperKind::AwaitingQuestion => {
                "Please enter a question in the main note to begin the Q&A process."
            }
            HelperKind::GeneratingPersonas => {
                "Personas are being generated. Please wait before proceeding."
            }
            HelperKind::GeneratingAnswers => "Generating answers, please wait...",
        }
    }

    /// Vertical offset in note heights.
    fn lift(&self) -> f64 {
        match self {
            HelperKind::GeneratingPersonas => 1.1,
            _ => 0.33,
        }
    }
}

/// Create an untracked notice note beside `anchor`, connected to it.
///
/// Notices outlive the workflow; failures are logged.
pub async fn post_notice(surface: &dyn Surface, anchor: &Entity, title: &str, text: &str, color: &str) -> Option<String> {
    let placement = layout::helper(Placement::of(anchor), 0.33);
    let note = NoteAttrs::titled(title, text)
        .at(placement.location, placement.size)
        .color(color);
    let created = match surface.create_note(note).await {
        Ok(created) => created,
        Err(e) => {
            warn!(note_id = %anchor.id(), title, error = %e, "Failed to post notice");
            return None;
        }
    };
    if let Err(e) = surface.link(created.id(), anchor.id()).await {
        warn!(note_id = %anchor.id(), error = %e, "Failed to connect notice");
    }
    Some(created.id().to_string())
}

/// Map of trigger id to its live helper note id
#[derive(Debug, Default)]
pub struct HelperRegistry {
    helpers: DashMap<String, String>,
}

impl HelperRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, trigger_id: &str) -> Option<String> {
        self.helpers.get(trigger_id).map(|h| h.value().clone())
    }

    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }

    /// Show `kind` next to `anchor`, reusing the trigger's live helper if any.
    pub async fn show(&self, surface: &dyn Surface, anchor: &Entity, kind: HelperKind) -> Result<String> {
        let trigger_id = anchor.id();
        let note = NoteAttrs::titled(kind.title(), kind.text());

        if let Some(existing) = self.get(trigger_id) {
            surface.update_note(&existing, note).await?;
            debug!(trigger_id, helper_id = %existing, ?kind, "Helper note updated");
            return Ok(existing);
        }

        let placement = layout::helper(Placement::of(anchor), kind.lift());
        let created = surface
            .create_note(
                note.at(placement.location, placement.size)
                    .color(HELPER_COLOR),
            )
            .await?;
        let helper_id = created.id().to_string();

        if let Err(e) = surface.link(&helper_id, trigger_id).await {
            warn!(trigger_id, error = %e, "Failed to connect helper note");
        }
        self.helpers
            .insert(trigger_id.to_string(), helper_id.clone());
        debug!(trigger_id, helper_id = %helper_id, ?kind, "Helper note created");
        Ok(helper_id)
    }

    /// Delete the trigger's helper note, if any. Failures are logged.
    pub async fn remove(&self, surface: &dyn Surface, trigger_id: &str) {
        let Some((_, helper_id)) = self.helpers.remove(trigger_id) else {
            return;
        };
        match surface.delete_note(&helper_id).await {
            Ok(()) => debug!(trigger_id, helper_id = %helper_id, "Helper note removed"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(trigger_id, helper_id = %helper_id, error = %e, "Failed to remove helper note"),
        }
    }
}
