//! Event classification.
//!
//! Maps one raw feed record to at most one [`Trigger`]. Rules are checked in
//! priority order and the first match wins:
//!
//! 1. completion image (`bac_complete` with any image extension)
//! 2. unclaimed question note (`New_AI_Question`, white background)
//! 3. persona setup note (`Create_Personas`)
//! 4. any connector
//! 5. a registered question note whose colour matches its registration,
//!    routed to the debounce gate instead of being emitted directly
//!
//! Everything else is dropped without logging.

use crate::types::{Entity, EntityKind};
use serde_json::Value;
use std::collections::HashMap;
use std::ops::Deref;

/// Title of the image that marks the business canvas as complete
pub const COMPLETION_IMAGE_TITLE: &str = "bac_complete";

/// Title of a question trigger note
pub const QUESTION_NOTE_TITLE: &str = "New_AI_Question";

/// Title of a persona setup trigger note
pub const PERSONA_SETUP_TITLE: &str = "Create_Personas";

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp"];

/// A record as delivered by the event feed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEvent {
    entity: Entity,
}

impl RawEvent {
    pub fn from_value(value: Value) -> Self {
        Self {
            entity: Entity::from_value(value),
        }
    }

    /// Kind tag as sent on the wire.
    pub fn widget_type(&self) -> &str {
        self.entity
            .attrs
            .get("widget_type")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn into_entity(self) -> Entity {
        self.entity
    }
}

impl Deref for RawEvent {
    type Target = Entity;

    fn deref(&self) -> &Entity {
        &self.entity
    }
}

/// The originating entity carried by a trigger
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEntity {
    pub id: String,
    pub title: String,
    pub text: String,
    pub color: String,
    pub raw: Entity,
}

impl From<&RawEvent> for TriggerEntity {
    fn from(event: &RawEvent) -> Self {
        Self {
            id: event.id().to_string(),
            title: event.title().to_string(),
            text: event.text().to_string(),
            color: event.background_color().to_string(),
            raw: event.entity.clone(),
        }
    }
}

/// A classified event
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    ImageCompleted(TriggerEntity),
    QuestionNoteCreated(TriggerEntity),
    PersonaSetupRequested(TriggerEntity),
    QuestionTextDetected(TriggerEntity),
    ConnectorCreated(TriggerEntity),
}

impl Trigger {
    pub fn entity(&self) -> &TriggerEntity {
        match self {
            Trigger::ImageCompleted(e)
            | Trigger::QuestionNoteCreated(e)
            | Trigger::PersonaSetupRequested(e)
            | Trigger::QuestionTextDetected(e)
            | Trigger::ConnectorCreated(e) => e,
        }
    }

    pub fn id(&self) -> &str {
        &self.entity().id
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::ImageCompleted(_) => "image_completed",
            Trigger::QuestionNoteCreated(_) => "question_note_created",
            Trigger::PersonaSetupRequested(_) => "persona_setup_requested",
            Trigger::QuestionTextDetected(_) => "question_text_detected",
            Trigger::ConnectorCreated(_) => "connector_created",
        }
    }
}

/// Result of classifying one record
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Trigger(Trigger),
    /// Candidate for `QuestionTextDetected`, keyed by entity id
    Debounce { key: String, event: TriggerEntity },
    Ignored,
}

/// Lookup of active question-note registrations
pub trait Registrations {
    /// Expected background colour for a registered id.
    fn expected_color(&self, id: &str) -> Option<String>;
}

impl Registrations for HashMap<String, String> {
    fn expected_color(&self, id: &str) -> Option<String> {
        self.get(id).cloned()
    }
}

/// No registrations at all
pub struct NoRegistrations;

impl Registrations for NoRegistrations {
    fn expected_color(&self, _id: &str) -> Option<String> {
        None
    }
}

/// Lowercase, trim, and drop an opaque alpha suffix so `#RRGGBB` and
/// `#RRGGBBff` compare equal.
pub fn normalize_color(color: &str) -> String {
    let lower = color.trim().to_ascii_lowercase();
    match lower.strip_suffix("ff") {
        Some(rgb) if lower.len() == 9 && lower.starts_with('#') => rgb.to_string(),
        _ => lower,
    }
}

pub fn colors_match(a: &str, b: &str) -> bool {
    normalize_color(a) == normalize_color(b)
}

/// Unclaimed question notes are plain white.
pub fn is_unclaimed_color(color: &str) -> bool {
    colors_match(color, "#ffffff")
}

fn strip_image_extension(title: &str) -> &str {
    IMAGE_EXTENSIONS
        .iter()
        .find_map(|ext| title.strip_suffix(ext))
        .unwrap_or(title)
}

fn is_question_note_title(title: &str) -> bool {
    title.trim().eq_ignore_ascii_case(QUESTION_NOTE_TITLE)
}

/// Classify one record.
pub fn classify(event: &RawEvent, registrations: &dyn Registrations) -> Classification {
    let kind = event.kind();
    let title = event.title();

    if kind == EntityKind::Image {
        let lowered = title.trim().to_ascii_lowercase();
        if strip_image_extension(&lowered) == COMPLETION_IMAGE_TITLE {
            return Classification::Trigger(Trigger::ImageCompleted(event.into()));
        }
    }

    if kind == EntityKind::Note && is_question_note_title(title) {
        if is_unclaimed_color(event.background_color()) {
            return Classification::Trigger(Trigger::QuestionNoteCreated(event.into()));
        }
        return classify_registered_question(event, registrations);
    }

    if kind == EntityKind::Note && title.trim() == PERSONA_SETUP_TITLE {
        return Classification::Trigger(Trigger::PersonaSetupRequested(event.into()));
    }

    if kind == EntityKind::Connector {
        return Classification::Trigger(Trigger::ConnectorCreated(event.into()));
    }

    Classification::Ignored
}

fn classify_registered_question(event: &RawEvent, registrations: &dyn Registrations) -> Classification {
    let id = event.id();
    if id.is_empty() {
        return Classification::Ignored;
    }
    match registrations.expected_color(id) {
        Some(expected) if colors_match(&expected, event.background_color()) => Classification::Debounce {
            key: id.to_string(),
            event: event.into(),
        },
        _ => Classification::Ignored,
    }
}
