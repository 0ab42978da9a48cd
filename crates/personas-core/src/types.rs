//! Shared types for personas-core.
//!
//! Entities are kept as the raw attribute map the surface returns, with typed
//! accessors for the handful of keys the workflow reads. Outbound payloads are
//! built from the typed `*Attrs` structs below.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Attribute map sent to or received from the surface
pub type Attributes = Map<String, Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Entity Types
// ─────────────────────────────────────────────────────────────────────────────

/// Kind tag of a surface entity (`widget_type` on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Note,
    Image,
    Connector,
    Anchor,
    Other,
}

impl EntityKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Note => "Note",
            EntityKind::Image => "Image",
            EntityKind::Connector => "Connector",
            EntityKind::Anchor => "Anchor",
            EntityKind::Other => "Other",
        }
    }

    /// Parse a wire tag; unknown tags map to `Other`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "note" => EntityKind::Note,
            "image" => EntityKind::Image,
            "connector" => EntityKind::Connector,
            "anchor" => EntityKind::Anchor,
            _ => EntityKind::Other,
        }
    }

    /// REST collection segment for this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Note => "notes",
            EntityKind::Image => "images",
            EntityKind::Connector => "connectors",
            EntityKind::Anchor => "anchors",
            EntityKind::Other => "widgets",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// An addressable object on the canvas
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity {
    pub attrs: Attributes,
}

impl Entity {
    pub fn new(attrs: Attributes) -> Self {
        Self { attrs }
    }

    /// Build from any JSON value; non-objects become an empty entity.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(attrs) => Self { attrs },
            _ => Self::default(),
        }
    }

    fn str_field(&self, key: &str) -> &str {
        self.attrs.get(key).and_then(Value::as_str).unwrap_or("")
    }

    pub fn id(&self) -> &str {
        self.str_field("id")
    }

    pub fn kind(&self) -> EntityKind {
        EntityKind::parse(self.str_field("widget_type"))
    }

    pub fn title(&self) -> &str {
        self.str_field("title")
    }

    pub fn text(&self) -> &str {
        self.str_field("text")
    }

    pub fn background_color(&self) -> &str {
        self.str_field("background_color")
    }

    pub fn anchor_name(&self) -> &str {
        self.str_field("anchor_name")
    }

    pub fn location(&self) -> Option<Location> {
        let loc = self.attrs.get("location")?;
        Some(Location {
            x: loc.get("x")?.as_f64()?,
            y: loc.get("y")?.as_f64()?,
        })
    }

    pub fn size(&self) -> Option<Size> {
        let size = self.attrs.get("size")?;
        Some(Size {
            width: size.get("width")?.as_f64()?,
            height: size.get("height")?.as_f64()?,
        })
    }

    /// Scale from the top level or nested in `size`, defaulting to 1.0.
    pub fn scale(&self) -> f64 {
        self.attrs
            .get("scale")
            .and_then(Value::as_f64)
            .or_else(|| {
                self.attrs
                    .get("size")
                    .and_then(|s| s.get("scale"))
                    .and_then(Value::as_f64)
            })
            .unwrap_or(1.0)
    }

    /// Connector endpoint id (`src` or `dst`).
    pub fn endpoint(&self, side: &str) -> Option<&str> {
        self.attrs.get(side)?.get("id")?.as_str()
    }

    /// Trimmed text ends with a question mark.
    pub fn has_question(&self) -> bool {
        self.text().trim().ends_with('?')
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Attributes for creating or updating a note
#[derive(Debug, Clone, Default, Serialize)]
pub struct NoteAttrs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

impl NoteAttrs {
    pub fn titled(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn at(mut self, location: Location, size: Size) -> Self {
        self.location = Some(location);
        self.size = Some(size);
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.background_color = Some(color.into());
        self
    }

    pub fn scaled(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn into_attributes(self) -> Attributes {
        to_attributes(&self)
    }
}

/// Attributes for a directed connector between two entities
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorAttrs {
    pub src: ConnectorEnd,
    pub dst: ConnectorEnd,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectorEnd {
    pub id: String,
    pub auto_location: bool,
    pub tip: String,
}

impl ConnectorAttrs {
    pub fn between(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            src: ConnectorEnd {
                id: src.into(),
                auto_location: true,
                tip: "none".to_string(),
            },
            dst: ConnectorEnd {
                id: dst.into(),
                auto_location: true,
                tip: "solid-equilateral-triangle".to_string(),
            },
        }
    }

    pub fn into_attributes(self) -> Attributes {
        to_attributes(&self)
    }
}

/// Attributes for a grouping anchor
#[derive(Debug, Clone, Serialize)]
pub struct AnchorAttrs {
    pub anchor_name: String,
    pub location: Location,
    pub size: Size,
    pub notes: Vec<String>,
}

impl AnchorAttrs {
    pub fn into_attributes(self) -> Attributes {
        to_attributes(&self)
    }
}

/// Attributes for an uploaded image
#[derive(Debug, Clone, Serialize)]
pub struct ImageAttrs {
    pub title: String,
    pub location: Location,
    pub size: Size,
}

impl ImageAttrs {
    pub fn into_attributes(self) -> Attributes {
        to_attributes(&self)
    }
}

fn to_attributes<T: Serialize>(value: &T) -> Attributes {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Attributes::new(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Personas
// ─────────────────────────────────────────────────────────────────────────────

/// A simulated focus-group participant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub background: String,
    /// Accepts a string or an array of strings (joined with newlines).
    #[serde(default, deserialize_with = "string_or_list")]
    pub goals: String,
    /// Accepts a string or a number.
    #[serde(default, deserialize_with = "string_or_number")]
    pub age: String,
    #[serde(default)]
    pub sex: String,
    #[serde(default)]
    pub race: String,
}

fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Goals {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<Goals>::deserialize(deserializer)? {
        Some(Goals::One(s)) => s,
        Some(Goals::Many(items)) => items.join("\n"),
        None => String::new(),
    })
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Age {
        Text(String),
        Number(f64),
    }

    Ok(match Option::<Age>::deserialize(deserializer)? {
        Some(Age::Text(s)) => s,
        Some(Age::Number(n)) => format!("{}", n.trunc() as i64),
        None => String::new(),
    })
}
