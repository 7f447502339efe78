//! Zones: named rectangles of the key grid with an output role
//!
//! A [`ZoneLayout`] is built from JSON off to the side, validated, and only
//! then handed to the router as one `Arc`. A layout that fails to build never
//! replaces the current one.

mod layout;
mod router;

pub use layout::{ZoneIndexMap, ZoneLayout};
pub use router::{
    find_note_changes, Attribution, NoteChange, RoutedFrame, ZoneEvents, ZoneMessage, ZoneRouter,
    ZoneTouch,
};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Semitones between stacked rows of a multi-row note zone
pub const DEFAULT_ROW_INTERVAL: i32 = 5;

/// Largest row interval accepted, in either direction
pub const MAX_ROW_INTERVAL: i32 = 24;

/// Output role of a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    /// Keys play notes; touches are forwarded individually
    NoteRow,
    /// Horizontal position of the strongest touch
    XController,
    /// Vertical position of the strongest touch
    YController,
    /// Both axes of the strongest touch
    XyController,
    /// Pressure of the strongest touch
    ZController,
    /// Flips on each new touch
    Toggle,
}

impl ZoneType {
    /// True for zones that produce controller messages instead of touches
    pub fn is_controller(&self) -> bool {
        !matches!(self, ZoneType::NoteRow)
    }
}

/// Rectangle in key-grid cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct ZoneRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ZoneRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, kx: i32, ky: i32) -> bool {
        kx >= self.x && kx < self.x + self.width && ky >= self.y && ky < self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Position normalized to the rectangle, each axis clamped to 0..1
    pub fn normalize(&self, x: f32, y: f32) -> (f32, f32) {
        let nx = (x - self.x as f32) / self.width.max(1) as f32;
        let ny = (y - self.y as f32) / self.height.max(1) as f32;
        (nx.clamp(0.0, 1.0), ny.clamp(0.0, 1.0))
    }
}

impl From<[i32; 4]> for ZoneRect {
    fn from([x, y, width, height]: [i32; 4]) -> Self {
        Self::new(x, y, width, height)
    }
}

impl From<ZoneRect> for [i32; 4] {
    fn from(r: ZoneRect) -> Self {
        [r.x, r.y, r.width, r.height]
    }
}

/// One zone as written in a layout file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSpec {
    #[serde(rename = "type")]
    pub zone_type: ZoneType,
    #[serde(default)]
    pub name: String,
    pub rect: ZoneRect,
    /// Start note of a note zone
    #[serde(default)]
    pub note: i32,
    /// Output offset (channel / voice offset) passed to consumers
    #[serde(default)]
    pub offset: i32,
    #[serde(default)]
    pub ctrl1: u8,
    #[serde(default)]
    pub ctrl2: u8,
    #[serde(default)]
    pub ctrl3: u8,
    /// Output channel, 1-based (0 means "consumer default")
    #[serde(default)]
    pub channel: u8,
    #[serde(default = "default_row_interval")]
    pub row_interval: i32,
}

fn default_row_interval() -> i32 {
    DEFAULT_ROW_INTERVAL
}

/// A validated zone inside a layout
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    /// Index in the layout; the identifier consumers see
    pub id: usize,
    pub name: Arc<str>,
    pub zone_type: ZoneType,
    pub rect: ZoneRect,
    pub start_note: i32,
    pub offset: i32,
    pub controllers: [u8; 3],
    pub channel: u8,
    pub row_interval: i32,
}

impl Zone {
    pub(crate) fn from_spec(id: usize, spec: ZoneSpec) -> Self {
        let name = if spec.name.is_empty() {
            format!("zone{}", id)
        } else {
            spec.name
        };
        Self {
            id,
            name: Arc::from(name),
            zone_type: spec.zone_type,
            rect: spec.rect,
            start_note: spec.note,
            offset: spec.offset,
            controllers: [spec.ctrl1, spec.ctrl2, spec.ctrl3],
            channel: spec.channel,
            row_interval: spec.row_interval,
        }
    }

    pub fn to_spec(&self) -> ZoneSpec {
        ZoneSpec {
            zone_type: self.zone_type,
            name: self.name.to_string(),
            rect: self.rect,
            note: self.start_note,
            offset: self.offset,
            ctrl1: self.controllers[0],
            ctrl2: self.controllers[1],
            ctrl3: self.controllers[2],
            channel: self.channel,
            row_interval: self.row_interval,
        }
    }

    /// Note of the key `(kx, ky)` inside this zone
    pub fn key_note(&self, kx: i32, ky: i32) -> i32 {
        let column = kx.saturating_sub(self.rect.x);
        let row = ky.saturating_sub(self.rect.y).saturating_mul(self.row_interval);
        self.start_note.saturating_add(column).saturating_add(row)
    }

    /// Continuous note for a position; key centers land on whole notes
    pub fn continuous_note(&self, x: f32, y: f32) -> f32 {
        let last_row = self.rect.y.saturating_add(self.rect.height.max(1) - 1);
        let ky = (y.floor() as i32).clamp(self.rect.y, last_row);
        self.start_note as f32
            + (x - 0.5 - self.rect.x as f32)
            + (ky - self.rect.y).saturating_mul(self.row_interval) as f32
    }
}

/// Zone configuration errors; the previous layout stays active
#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("Zone JSON could not be parsed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Zone '{name}' has an empty rectangle")]
    EmptyRect { name: String },

    #[error("Zone '{name}' lies outside the {width}x{height} key grid")]
    OutOfBounds {
        name: String,
        width: usize,
        height: usize,
    },

    #[error("Zone '{name}' has start note {note} or row interval {row_interval} out of range")]
    InvalidNotes {
        name: String,
        note: i32,
        row_interval: i32,
    },

    #[error("Zones '{first}' and '{second}' overlap")]
    Overlap { first: String, second: String },

    #[error("Too many zones: {0}")]
    TooMany(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_from_array_json() {
        let spec: ZoneSpec = serde_json::from_str(
            r#"{"type": "xy_controller", "name": "pad", "rect": [1, 2, 3, 4], "ctrl1": 10}"#,
        )
        .unwrap();
        assert_eq!(spec.zone_type, ZoneType::XyController);
        assert_eq!(spec.rect, ZoneRect::new(1, 2, 3, 4));
        assert_eq!(spec.row_interval, DEFAULT_ROW_INTERVAL);
        assert!(spec.zone_type.is_controller());
    }

    #[test]
    fn test_key_and_continuous_notes() {
        let zone = Zone::from_spec(
            0,
            ZoneSpec {
                zone_type: ZoneType::NoteRow,
                name: String::new(),
                rect: ZoneRect::new(2, 0, 10, 2),
                note: 40,
                offset: 0,
                ctrl1: 0,
                ctrl2: 0,
                ctrl3: 0,
                channel: 1,
                row_interval: 5,
            },
        );
        assert_eq!(&*zone.name, "zone0");
        assert_eq!(zone.key_note(2, 0), 40);
        assert_eq!(zone.key_note(5, 1), 48);
        assert!((zone.continuous_note(2.5, 0.5) - 40.0).abs() < 1e-6);
        assert!((zone.continuous_note(3.0, 1.2) - 45.5).abs() < 1e-6);
    }

    #[test]
    fn test_extreme_notes_saturate() {
        let mut zone = Zone::from_spec(
            0,
            serde_json::from_str(r#"{"type": "note_row", "rect": [0, 0, 30, 5]}"#).unwrap(),
        );
        zone.start_note = i32::MAX;
        zone.row_interval = i32::MAX;
        assert_eq!(zone.key_note(3, 1), i32::MAX);
        assert!(zone.continuous_note(3.5, 1.5).is_finite());
    }

    #[test]
    fn test_normalize_clamps() {
        let rect = ZoneRect::new(10, 0, 10, 5);
        assert_eq!(rect.normalize(15.0, 2.5), (0.5, 0.5));
        assert_eq!(rect.normalize(0.0, 9.0), (0.0, 1.0));
        assert!(rect.contains(19, 4));
        assert!(!rect.contains(20, 4));
    }
}
