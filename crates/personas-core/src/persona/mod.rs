//! Persona notes and their on-demand generation.
//!
//! Personas live on the canvas as notes titled `Persona N: <name>` whose text
//! uses a fixed emoji-prefixed field layout. [`PersonaService`] reads them
//! back, and generates the missing ones from the Business Model Canvas notes.

use crate::config::WorkflowConfig;
use crate::error::{Error, Result};
use crate::generation::{Generator, ModelRole, TextRequest, prompts};
use crate::layout::{self, Placement};
use crate::surface::Surface;
use crate::types::{Entity, EntityKind, ImageAttrs, Location, NoteAttrs, Persona, Size};
use futures::FutureExt;
use regex::Regex;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const PERSONA_TITLE_PREFIX: &str = "Persona ";
const FAILED_MARKER: &str = "FAILED";
const PERSONAS_ANCHOR: &str = "Personas";
const FAILURE_COLOR: &str = "#f44336ff";

/// Business Model Canvas section titles, in prompt order
pub const BUSINESS_TITLES: [&str; 9] = [
    "KEY PARTNERS",
    "KEY ACTIVITIES",
    "VALUE PROPOSITIONS",
    "CUSTOMER RELATIONSHIPS",
    "CUSTOMER SEGMENTS",
    "KEY RESOURCES",
    "CHANNELS",
    "COST STRUCTURE",
    "REVENUE STREAMS",
];

// ─────────────────────────────────────────────────────────────────────────────
// Note format
// ─────────────────────────────────────────────────────────────────────────────

pub fn format_persona_note(p: &Persona) -> String {
    format!(
        "🧑 Name: {}\n\n💼 Role: {}\n\n📝 Description: {}\n\n🏫 Background: {}\n\n🎯 Goals: {}\n\n🎂 Age: {}\n\n⚧ Sex: {}\n\n🌍 Race: {}",
        p.name, p.role, p.description, p.background, p.goals, p.age, p.sex, p.race
    )
}

fn persona_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?s)🧑 Name: (.*?)\s*💼 Role: (.*?)\s*📝 Description: (.*?)\s*🏫 Background: (.*?)\s*🎯 Goals: (.*?)\s*🎂 Age: (.*?)\s*⚧ Sex: (.*?)\s*🌍 Race: (.*?)\s*$",
            )
            .ok()
        })
        .as_ref()
}

/// Parse a note written by [`format_persona_note`]. `None` if any field is absent.
pub fn parse_persona_note(text: &str) -> Option<Persona> {
    let caps = persona_pattern()?.captures(text)?;
    let field = |i: usize| caps.get(i).map_or(String::new(), |m| m.as_str().trim().to_string());
    Some(Persona {
        name: field(1),
        role: field(2),
        description: field(3),
        background: field(4),
        goals: field(5),
        age: field(6),
        sex: field(7),
        race: field(8),
    })
}

/// Parse a generated JSON array of personas, tolerating a code fence.
pub fn parse_personas(raw: &str) -> Result<Vec<Persona>> {
    let personas: Vec<Persona> = serde_json::from_str(prompts::strip_code_fences(raw))
        .map_err(|e| Error::Validation(format!("persona response is not a JSON array: {}", e)))?;
    Ok(personas
        .into_iter()
        .filter(|p| !p.name.trim().is_empty())
        .collect())
}

pub fn persona_title(index: usize, name: &str) -> String {
    format!("{}{}: {}", PERSONA_TITLE_PREFIX, index + 1, name)
}

/// Zero-based index from a `Persona N: ...` title.
pub fn persona_index(title: &str) -> Option<usize> {
    let rest = title.trim().strip_prefix(PERSONA_TITLE_PREFIX)?;
    let (number, _) = rest.split_once(':')?;
    number.trim().parse::<usize>().ok()?.checked_sub(1)
}

/// A usable persona note: note kind, `Persona ` title, not a failure marker.
pub fn is_persona_note(entity: &Entity) -> bool {
    entity.kind() == EntityKind::Note
        && entity.title().starts_with(PERSONA_TITLE_PREFIX)
        && !entity.title().contains(FAILED_MARKER)
}

pub fn count_personas(entities: &[Entity]) -> usize {
    entities.iter().filter(|e| is_persona_note(e)).count()
}

/// Personas parsed from the canvas, ordered by title index.
pub fn personas_on_canvas(entities: &[Entity]) -> Vec<Persona> {
    let mut indexed: BTreeMap<usize, Persona> = BTreeMap::new();
    let mut unindexed = Vec::new();
    for entity in entities.iter().filter(|e| is_persona_note(e)) {
        let Some(persona) = parse_persona_note(entity.text()) else {
            debug!(note_id = %entity.id(), "Persona note did not parse");
            continue;
        };
        match persona_index(entity.title()) {
            Some(i) if !indexed.contains_key(&i) => {
                indexed.insert(i, persona);
            }
            _ => unindexed.push(persona),
        }
    }
    indexed.into_values().chain(unindexed).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Business context
// ─────────────────────────────────────────────────────────────────────────────

/// Business Model Canvas content gathered from the canvas
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusinessContext {
    pub text: String,
    pub found: Vec<&'static str>,
    pub missing: Vec<&'static str>,
}

impl BusinessContext {
    pub fn is_empty(&self) -> bool {
        self.found.is_empty()
    }
}

pub fn business_context(entities: &[Entity]) -> BusinessContext {
    let mut sections = Vec::new();
    let mut context = BusinessContext::default();

    for title in BUSINESS_TITLES {
        let note = entities.iter().find(|e| {
            e.kind() == EntityKind::Note && e.title().trim().to_uppercase() == title
        });
        match note {
            Some(note) => {
                sections.push(format!("{}: {}", note.title().trim(), note.text()));
                context.found.push(title);
            }
            None => context.missing.push(title),
        }
    }

    context.text = sections.join("\n\n");
    context
}

fn missing_notes_text(missing: &[&str]) -> String {
    let list: String = missing
        .iter()
        .enumerate()
        .map(|(i, title)| format!("{}. {}\n", i + 1, title))
        .collect();
    format!(
        "The following required Business Model Canvas notes are missing:\n\n{}\nPlease add these notes to the canvas \
with the exact titles listed above, then try again.",
        list
    )
}

fn personas_anchor(entities: &[Entity]) -> Option<&Entity> {
    entities.iter().find(|e| {
        e.kind() == EntityKind::Anchor
            && e.anchor_name().trim().eq_ignore_ascii_case(PERSONAS_ANCHOR)
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────────────────────────

/// Reads and generates personas on the canvas
pub struct PersonaService {
    surface: Arc<dyn Surface>,
    generator: Arc<dyn Generator>,
    persona_count: usize,
    min_personas: usize,
}

impl PersonaService {
    pub fn new(surface: Arc<dyn Surface>, generator: Arc<dyn Generator>, config: &WorkflowConfig) -> Self {
        Self {
            surface,
            generator,
            persona_count: config.persona_count,
            min_personas: config.min_personas,
        }
    }

    /// Personas and business context as they are on the canvas now.
    pub async fn load(&self) -> Result<(Vec<Persona>, BusinessContext)> {
        let entities = self.surface.list_entities().await?;
        Ok((personas_on_canvas(&entities), business_context(&entities)))
    }

    /// Make sure `persona_count` persona notes exist, generating missing ones.
    ///
    /// `trigger` is the note that asked for personas; it positions the
    /// personas when the canvas has no `Personas` anchor.
    pub async fn ensure_personas(&self, trigger: &Entity) -> Result<Vec<Persona>> {
        let started = Instant::now();
        let entities = self.surface.list_entities().await?;

        let mut existing: BTreeMap<usize, Persona> = BTreeMap::new();
        let mut failed_markers: BTreeMap<usize, String> = BTreeMap::new();
        for entity in entities.iter().filter(|e| e.kind() == EntityKind::Note) {
            let Some(index) = persona_index(entity.title()).filter(|i| *i < self.persona_count) else {
                continue;
            };
            if entity.title().contains(FAILED_MARKER) {
                failed_markers.insert(index, entity.id().to_string());
            } else if let Some(persona) = parse_persona_note(entity.text()) {
                existing.insert(index, persona);
            }
        }

        if existing.len() >= self.persona_count {
            debug!(count = existing.len(), "All persona notes already present");
            return Ok(existing.into_values().collect());
        }

        let context = business_context(&entities);
        let anchor = personas_anchor(&entities);
        if context.is_empty() {
            self.show_missing_notes(&context.missing, anchor).await;
            return Err(Error::MissingPrerequisite(
                "no Business Model Canvas notes on the canvas".into(),
            ));
        }
        if !context.missing.is_empty() {
            warn!(missing = ?context.missing, "Business context is incomplete");
        }

        let needed: Vec<usize> = (0..self.persona_count)
            .filter(|i| !existing.contains_key(i))
            .collect();
        info!(
            existing = existing.len(),
            needed = needed.len(),
            "Generating personas"
        );

        let request = TextRequest::new(prompts::persona_generation(self.persona_count, &context.text))
            .for_role(ModelRole::Personas);
        let raw = self.generator.generate_text(&request).await?;
        let generated = parse_personas(&raw)?;
        if generated.len() < self.persona_count {
            warn!(
                generated = generated.len(),
                expected = self.persona_count,
                "Fewer personas generated than requested"
            );
        }

        for index in needed {
            if let Some(marker) = failed_markers.get(&index) {
                if let Err(e) = self.surface.delete_note(marker).await {
                    debug!(note_id = %marker, error = %e, "Could not remove stale failure marker");
                }
            }

            let (image_at, note_at) = match anchor {
                Some(a) => layout::persona_column(Placement::of(a), index),
                None => layout::persona_row(Placement::of(trigger), index),
            };

            let Some(persona) = generated.get(index) else {
                self.mark_failed(index, note_at, "No persona was generated for this slot.")
                    .await;
                continue;
            };

            let title = persona_title(index, &persona.name);
            let note = NoteAttrs::titled(&title, format_persona_note(persona))
                .at(note_at.location, note_at.size)
                .color(layout::persona_color(index));
            match self.surface.create_note(note).await {
                Ok(created) => {
                    info!(note_id = %created.id(), %title, "Persona note created");
                    existing.insert(index, persona.clone());
                    self.spawn_headshot(persona.clone(), title, image_at);
                }
                Err(e) => {
                    error!(%title, error = %e, "Failed to create persona note");
                    self.mark_failed(index, note_at, &e.to_string()).await;
                }
            }
        }

        let available = existing.len();
        info!(
            available,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Persona generation finished"
        );
        if available < self.min_personas {
            return Err(Error::InsufficientResults {
                stage: "personas",
                succeeded: available,
                required: self.min_personas,
            });
        }
        Ok(existing.into_values().collect())
    }

    async fn mark_failed(&self, index: usize, at: Placement, reason: &str) {
        let note = NoteAttrs::titled(persona_title(index, FAILED_MARKER), reason)
            .at(at.location, at.size)
            .color(FAILURE_COLOR);
        if let Err(e) = self.surface.create_note(note).await {
            warn!(index, error = %e, "Failed to create persona failure marker");
        }
    }

    async fn show_missing_notes(&self, missing: &[&str], anchor: Option<&Entity>) {
        let placement = match anchor.and_then(|a| Some((a.location()?, a.size()?))) {
            Some((loc, size)) => Placement {
                location: Location {
                    x: loc.x - 450.0,
                    y: loc.y,
                },
                size: Size {
                    width: (size.width * 0.5).max(300.0),
                    height: (size.height * 0.3).max(200.0),
                },
            },
            None => Placement {
                location: Location::default(),
                size: Size {
                    width: 400.0,
                    height: 300.0,
                },
            },
        };
        let note = NoteAttrs::titled("Missing Required Notes", missing_notes_text(missing))
            .at(placement.location, placement.size)
            .color(FAILURE_COLOR);
        if let Err(e) = self.surface.create_note(note).await {
            warn!(error = %e, "Failed to create missing-notes helper");
        }
    }

    /// Generate and upload a headshot in the background. Failures are only logged.
    fn spawn_headshot(&self, persona: Persona, title: String, at: Placement) {
        let surface = Arc::clone(&self.surface);
        let generator = Arc::clone(&self.generator);

        tokio::spawn(async move {
            let work = async {
                let bytes = generator.generate_image(&prompts::headshot(&persona)).await?;
                let attrs = ImageAttrs {
                    title: format!("{} Headshot", title),
                    location: at.location,
                    size: at.size,
                };
                surface.upload_image(bytes, attrs.into_attributes()).await
            };
            match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(image)) => debug!(image_id = %image.id(), %title, "Headshot uploaded"),
                Ok(Err(e)) => warn!(%title, error = %e, "Headshot not created"),
                Err(payload) => error!(%title, panic = %panic_message(&*payload), "Headshot task panicked"),
            }
        });
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
