//! In-memory collaborators for unit tests.

use crate::classify::{RawEvent, TriggerEntity};
use crate::error::{Error, Result};
use crate::generation::{Generator, ModelRole, TextRequest};
use crate::layout;
use crate::persona::{BUSINESS_TITLES, format_persona_note, persona_title};
use crate::surface::{EventSource, LineStream, Surface};
use crate::types::{Attributes, Entity, EntityKind, Location, NoteAttrs, Persona, Size};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::time::Instant;

// ─────────────────────────────────────────────────────────────────────────────
// Surface
// ─────────────────────────────────────────────────────────────────────────────

/// Canvas kept in memory, in creation order
#[derive(Default)]
pub struct FakeSurface {
    entities: Mutex<Vec<Entity>>,
    next_id: AtomicU64,
    create_failures: Mutex<VecDeque<Error>>,
    titled_failures: Mutex<Vec<(String, Error)>>,
}

impl FakeSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` creates with errors from `make`.
    pub fn fail_next_creates(&self, n: usize, make: impl Fn() -> Error) {
        let mut failures = self.create_failures.lock().unwrap();
        failures.extend((0..n).map(|_| make()));
    }

    /// Fail the first create whose title starts with `prefix`.
    pub fn fail_create_titled(&self, prefix: &str, make: impl Fn() -> Error) {
        self.titled_failures
            .lock()
            .unwrap()
            .push((prefix.to_string(), make()));
    }

    pub fn entities(&self) -> Vec<Entity> {
        self.entities.lock().unwrap().clone()
    }

    pub fn count_kind(&self, kind: EntityKind) -> usize {
        self.entities
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }

    pub fn titled_with_suffix(&self, suffix: &str) -> Vec<Entity> {
        self.entities
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.title().ends_with(suffix))
            .cloned()
            .collect()
    }

    /// Simulate a user edit; returns the updated entity.
    pub fn set_text(&self, id: &str, text: &str) -> Entity {
        let mut entities = self.entities.lock().unwrap();
        let entity = entities.iter_mut().find(|e| e.id() == id).unwrap();
        entity
            .attrs
            .insert("text".into(), Value::String(text.to_string()));
        entity.clone()
    }

    fn take_failure(&self, attrs: &Attributes) -> Option<Error> {
        if let Some(err) = self.create_failures.lock().unwrap().pop_front() {
            return Some(err);
        }
        let title = attrs.get("title").and_then(Value::as_str).unwrap_or("");
        let mut titled = self.titled_failures.lock().unwrap();
        let pos = titled.iter().position(|(prefix, _)| title.starts_with(prefix.as_str()))?;
        Some(titled.remove(pos).1)
    }

    fn insert(&self, kind: EntityKind, mut attrs: Attributes) -> Entity {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}-{}", kind.collection(), n);
        attrs.insert("id".into(), Value::String(id));
        attrs.insert("widget_type".into(), Value::String(kind.as_str().to_string()));
        let entity = Entity::new(attrs);
        self.entities.lock().unwrap().push(entity.clone());
        entity
    }
}

#[async_trait]
impl Surface for FakeSurface {
    async fn create_entity(&self, kind: EntityKind, attrs: Attributes) -> Result<Entity> {
        if let Some(err) = self.take_failure(&attrs) {
            return Err(err);
        }
        Ok(self.insert(kind, attrs))
    }

    async fn update_entity(&self, _kind: EntityKind, id: &str, attrs: Attributes) -> Result<Entity> {
        let mut entities = self.entities.lock().unwrap();
        let entity = entities
            .iter_mut()
            .find(|e| e.id() == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        entity.attrs.extend(attrs);
        Ok(entity.clone())
    }

    async fn delete_entity(&self, _kind: EntityKind, id: &str) -> Result<()> {
        let mut entities = self.entities.lock().unwrap();
        let before = entities.len();
        entities.retain(|e| e.id() != id);
        if entities.len() == before {
            return Err(Error::NotFound(id.to_string()));
        }
        // Connectors go with either endpoint.
        entities.retain(|e| {
            e.kind() != EntityKind::Connector
                || (e.endpoint("src") != Some(id) && e.endpoint("dst") != Some(id))
        });
        Ok(())
    }

    async fn get_entity(&self, id: &str) -> Result<Entity> {
        self.entities
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id() == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn list_entities(&self) -> Result<Vec<Entity>> {
        Ok(self.entities())
    }

    async fn upload_image(&self, _bytes: Vec<u8>, attrs: Attributes) -> Result<Entity> {
        Ok(self.insert(EntityKind::Image, attrs))
    }
}

/// Add all nine Business Model Canvas notes.
pub async fn business_canvas(surface: &FakeSurface) {
    for title in BUSINESS_TITLES {
        surface
            .create_note(NoteAttrs::titled(title, format!("{} of a bike-sharing startup", title.to_lowercase())))
            .await
            .unwrap();
    }
}

/// A white `New_AI_Question` note with geometry.
pub async fn question_note(surface: &FakeSurface, text: &str) -> Entity {
    surface
        .create_note(
            NoteAttrs::titled("New_AI_Question", text)
                .at(Location { x: 1000.0, y: 1000.0 }, Size {
                    width: 300.0,
                    height: 200.0,
                })
                .color("#ffffff"),
        )
        .await
        .unwrap()
}

/// Persona notes for every scripted persona, laid out in a row.
pub async fn persona_canvas(surface: &FakeSurface) {
    for (index, name) in SCRIPTED_PERSONAS.iter().enumerate() {
        let persona = Persona {
            name: name.to_string(),
            role: "Commuter".into(),
            description: format!("{} rides to work", name),
            background: "Urban".into(),
            goals: "Save time".into(),
            age: "34".into(),
            sex: "Unspecified".into(),
            race: "Unspecified".into(),
        };
        let beside = layout::Placement {
            location: Location::default(),
            size: Size {
                width: 400.0,
                height: 300.0,
            },
        };
        let (_, at) = layout::persona_row(beside, index);
        surface
            .create_note(
                NoteAttrs::titled(persona_title(index, name), format_persona_note(&persona))
                    .at(at.location, at.size)
                    .color(layout::persona_color(index)),
            )
            .await
            .unwrap();
    }
}

/// Trigger payload for the current state of `entity`.
pub fn trigger(entity: &Entity) -> TriggerEntity {
    (&RawEvent::from_value(serde_json::Value::Object(entity.attrs.clone()))).into()
}

// ─────────────────────────────────────────────────────────────────────────────
// Generator
// ─────────────────────────────────────────────────────────────────────────────

pub const SCRIPTED_PERSONAS: [&str; 4] = ["Ana", "Ben", "Cleo", "Dev"];

/// How `generate_image` behaves
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum ImageMode {
    #[default]
    Succeed,
    Fail,
    Panic,
}

/// Deterministic generator with per-persona failure injection
#[derive(Default)]
pub struct ScriptedGenerator {
    text_calls: AtomicUsize,
    image_calls: AtomicUsize,
    panic_always: AtomicBool,
    image_mode: Mutex<ImageMode>,
    on_text: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    failures: Mutex<VecDeque<Error>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    verbose: Mutex<HashSet<String>>,
    requests: Mutex<Vec<TextRequest>>,
    ended: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` text calls.
    pub fn fail_next(&self, n: usize, make: impl Fn() -> Error) {
        self.failures
            .lock()
            .unwrap()
            .extend((0..n).map(|_| make()));
    }

    /// Every call in this persona's sessions fails permanently.
    pub fn fail_persona(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    /// Every text call panics.
    pub fn panic_always(&self) {
        self.panic_always.store(true, Ordering::SeqCst);
    }

    pub fn images(&self, mode: ImageMode) {
        *self.image_mode.lock().unwrap() = mode;
    }

    /// Run `hook` at the start of every text call.
    pub fn on_text_call(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_text.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn panic_persona(&self, name: &str) {
        self.panicking.lock().unwrap().insert(name.to_string());
    }

    /// First answers from this persona exceed any sensible length limit.
    pub fn verbose_persona(&self, name: &str) {
        self.verbose.lock().unwrap().insert(name.to_string());
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TextRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn ended_sessions(&self) -> Vec<String> {
        self.ended.lock().unwrap().clone()
    }

    fn personas_json() -> String {
        let personas: Vec<Value> = SCRIPTED_PERSONAS
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "role": "Operations Manager",
                    "description": format!("{} runs a city fleet", name),
                    "background": "Logistics",
                    "goals": ["Lower cost", "Reliable service"],
                    "age": 38,
                    "sex": "Unspecified",
                    "race": "Unspecified",
                })
            })
            .collect();
        format!("```json\n{}\n```", Value::Array(personas))
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate_text(&self, request: &TextRequest) -> Result<String> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(hook) = self.on_text.lock().unwrap().as_ref() {
            hook();
        }
        if self.panic_always.load(Ordering::SeqCst) {
            panic!("scripted generator panic");
        }

        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if request.role == ModelRole::Personas {
            return Ok(Self::personas_json());
        }

        let Some(ref session) = request.session else {
            return Ok("ok".to_string());
        };
        let name = session.rsplit('/').next().unwrap_or(session).to_string();

        if self.failing.lock().unwrap().contains(&name) {
            return Err(Error::Validation(format!("scripted failure for {}", name)));
        }
        if self.panicking.lock().unwrap().contains(&name) {
            panic!("scripted panic for {}", name);
        }
        if request.prompt.starts_with("Please rephrase") {
            return Ok(format!("{} in short.", name));
        }
        if request.prompt.starts_with("Thank you") {
            return Ok(format!("{} still agrees.", name));
        }
        if self.verbose.lock().unwrap().contains(&name) {
            return Ok(format!("{} says {}", name, "very ".repeat(200)));
        }
        Ok(format!("{} would pay for that.", name))
    }

    async fn generate_image(&self, _prompt: &str) -> Result<Vec<u8>> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.image_mode.lock().unwrap();
        match mode {
            ImageMode::Succeed => Ok(b"\x89PNG".to_vec()),
            ImageMode::Fail => Err(Error::Validation("scripted image failure".into())),
            ImageMode::Panic => panic!("scripted image panic"),
        }
    }

    fn end_session(&self, session: &str) {
        self.ended.lock().unwrap().push(session.to_string());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event source
// ─────────────────────────────────────────────────────────────────────────────

/// Replays one scripted line list per connection, then stays open silently
pub struct ScriptedSource {
    sessions: Mutex<VecDeque<Vec<Result<String>>>>,
    fail_connect: bool,
    connects: Mutex<Vec<Instant>>,
}

impl ScriptedSource {
    pub fn new(sessions: Vec<Vec<Result<String>>>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            fail_connect: false,
            connects: Mutex::new(Vec::new()),
        }
    }

    /// Every connection attempt fails.
    pub fn failing() -> Self {
        Self {
            fail_connect: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn connect(&self) -> Result<LineStream> {
        self.connects.lock().unwrap().push(Instant::now());
        if self.fail_connect {
            return Err(Error::Network("scripted connect failure".into()));
        }
        match self.sessions.lock().unwrap().pop_front() {
            Some(lines) => Ok(Box::pin(futures::stream::iter(lines))),
            None => Ok(Box::pin(futures::stream::pending())),
        }
    }
}
