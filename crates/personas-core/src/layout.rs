//! Placement of generated notes relative to the note that triggered them.

use crate::types::{Entity, Location, Size};

/// Background colours assigned to personas by index
pub const PERSONA_COLORS: [&str; 4] = ["#2196f3ff", "#4caf50ff", "#ff9800ff", "#9c27b0ff"];

/// Answer notes sit on the sides of the question note (top, right, bottom, left)
pub const ANSWER_OFFSETS: [(f64, f64); 4] = [(0.0, -1.0), (1.0, 0.0), (0.0, 1.0), (-1.0, 0.0)];

/// Reaction notes sit on the diagonals
pub const REACTION_OFFSETS: [(f64, f64); 4] = [(1.0, -1.0), (1.0, 1.0), (-1.0, 1.0), (-1.0, -1.0)];

/// Size used when the triggering note has no geometry
const FALLBACK_SIZE: Size = Size {
    width: 400.0,
    height: 300.0,
};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Placement {
    pub location: Location,
    pub size: Size,
}

impl Placement {
    /// Geometry of `entity`, with a default box when it has none.
    pub fn of(entity: &Entity) -> Self {
        Self {
            location: entity.location().unwrap_or_default(),
            size: entity.size().unwrap_or(FALLBACK_SIZE),
        }
    }
}

pub fn persona_color(index: usize) -> &'static str {
    PERSONA_COLORS[index % PERSONA_COLORS.len()]
}

pub fn is_persona_color(color: &str) -> bool {
    PERSONA_COLORS
        .iter()
        .any(|c| crate::classify::colors_match(c, color))
}

/// Helper notes go to the left of the note, shifted up by `lift` note heights.
pub fn helper(anchor: Placement, lift: f64) -> Placement {
    Placement {
        location: Location {
            x: anchor.location.x - 1.2 * anchor.size.width,
            y: anchor.location.y - lift * anchor.size.height,
        },
        size: Size {
            width: anchor.size.width,
            height: anchor.size.height * 0.7,
        },
    }
}

/// Grid cell around `center` for slot `index`.
///
/// Slots past the fourth wrap onto a wider ring.
pub fn grid(center: Placement, scale: f64, offsets: &[(f64, f64); 4], index: usize) -> Placement {
    let (dx, dy) = offsets[index % offsets.len()];
    let ring = (index / offsets.len() + 1) as f64;
    let spacing = center.size.width * scale / 5.0;
    Placement {
        location: Location {
            x: center.location.x + ring * dx * (center.size.width * scale + spacing),
            y: center.location.y + ring * dy * (center.size.height * scale + spacing),
        },
        size: center.size,
    }
}

/// Persona column inside the `Personas` anchor: headshot on top, note below.
pub fn persona_column(anchor: Placement, index: usize) -> (Placement, Placement) {
    const BORDER: f64 = 0.02;
    const COLUMN: f64 = 0.23;
    const GAP: f64 = 0.01;
    const IMAGE_HEIGHT: f64 = 0.10;
    const NOTE_HEIGHT: f64 = 0.40;
    const NOTE_TOP: f64 = 0.34;

    let Placement { location, size } = anchor;
    let x = location.x + size.width * BORDER + index as f64 * (size.width * COLUMN + size.width * GAP);
    let width = size.width * COLUMN;

    let image = Placement {
        location: Location {
            x,
            y: location.y + size.height * BORDER,
        },
        size: Size {
            width,
            height: size.height * IMAGE_HEIGHT,
        },
    };
    let note = Placement {
        location: Location {
            x,
            y: location.y + size.height * NOTE_TOP,
        },
        size: Size {
            width,
            height: size.height * NOTE_HEIGHT,
        },
    };
    (image, note)
}

/// Personas placed to the right of the triggering note when no anchor exists.
pub fn persona_row(beside: Placement, index: usize) -> (Placement, Placement) {
    let width = beside.size.width;
    let height = beside.size.height;
    let x = beside.location.x + (index as f64 + 1.5) * width * 1.1;
    let image = Placement {
        location: Location {
            x,
            y: beside.location.y - height * 0.3,
        },
        size: Size {
            width,
            height: height * 0.25,
        },
    };
    let note = Placement {
        location: Location {
            x,
            y: beside.location.y,
        },
        size: Size { width, height },
    };
    (image, note)
}

/// Mirror `source` across `pivot`.
pub fn mirrored(source: Location, pivot: Location) -> Location {
    Location {
        x: pivot.x + (pivot.x - source.x),
        y: pivot.y + (pivot.y - source.y),
    }
}

/// Smallest box covering every entity in `entities` whose id is in `ids`.
///
/// Entities without geometry are skipped; `None` when nothing remains.
pub fn bounding_box(entities: &[Entity], ids: &[String]) -> Option<Placement> {
    let mut bounds: Option<(f64, f64, f64, f64)> = None;
    for entity in entities.iter().filter(|e| ids.iter().any(|id| id == e.id())) {
        let (Some(loc), Some(size)) = (entity.location(), entity.size()) else {
            continue;
        };
        let (x0, y0, x1, y1) = bounds.unwrap_or((f64::MAX, f64::MAX, f64::MIN, f64::MIN));
        bounds = Some((
            x0.min(loc.x),
            y0.min(loc.y),
            x1.max(loc.x + size.width),
            y1.max(loc.y + size.height),
        ));
    }

    bounds.map(|(x0, y0, x1, y1)| Placement {
        location: Location { x: x0, y: y0 },
        size: Size {
            width: x1 - x0,
            height: y1 - y0,
        },
    })
}
