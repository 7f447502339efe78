//! Touches and the touch pipeline
//!
//! The tracker that turns a conditioned frame into contacts lives outside
//! this crate and is plugged in through [`TouchTracker`]. Everything after it
//! (pressure curve, key hysteresis, hold-last on error) lives here.

mod history;
mod pipeline;
mod test_touches;

pub use history::TouchHistory;
pub use pipeline::{scale_pressure, KeyHysteresis, TouchPipeline};
pub use test_touches::TestTouches;

use thiserror::Error;

use crate::types::{SensorFrame, MAX_TOUCHES};

/// One tracked contact
///
/// `x` and `y` are in key-grid units (key column 3 spans `3.0..4.0`).
/// `kx` / `ky` are the committed key after hysteresis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Touch {
    pub x: f32,
    pub y: f32,
    /// Pressure, 0..1 after scaling
    pub z: f32,
    /// Pressure change since the previous frame
    pub dz: f32,
    /// Frames since the touch started
    pub age: u32,
    pub kx: i32,
    pub ky: i32,
}

impl Touch {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            dz: 0.0,
            age: 1,
            kx: x.floor() as i32,
            ky: y.floor() as i32,
        }
    }

    /// Committed key
    pub fn key(&self) -> (i32, i32) {
        (self.kx, self.ky)
    }
}

/// Fixed-capacity set of touches, indexed by stable slot
///
/// A slot is either active (`Some`) or inactive (`None`); there is no
/// sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TouchArray {
    slots: [Option<Touch>; MAX_TOUCHES],
}

impl TouchArray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(slot, touch)` pairs; out-of-range slots are ignored
    pub fn from_slots(touches: impl IntoIterator<Item = (usize, Touch)>) -> Self {
        let mut array = Self::new();
        for (slot, touch) in touches {
            array.set(slot, Some(touch));
        }
        array
    }

    pub fn get(&self, slot: usize) -> Option<&Touch> {
        self.slots.get(slot).and_then(|t| t.as_ref())
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Touch> {
        self.slots.get_mut(slot).and_then(|t| t.as_mut())
    }

    pub fn set(&mut self, slot: usize, touch: Option<Touch>) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = touch;
        }
    }

    pub fn is_active(&self, slot: usize) -> bool {
        self.get(slot).is_some()
    }

    /// Active touches with their slot index
    pub fn active(&self) -> impl Iterator<Item = (usize, &Touch)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, t)| t.as_ref().map(|t| (slot, t)))
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|t| t.is_some()).count()
    }

    pub fn capacity(&self) -> usize {
        MAX_TOUCHES
    }

    pub fn clear(&mut self) {
        self.slots = [None; MAX_TOUCHES];
    }
}

/// Per-frame tracker failure; never fatal
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Frame {width}x{height} does not match the tracker geometry")]
    FrameShape { width: usize, height: usize },

    #[error("Tracking failed: {0}")]
    Failed(String),
}

/// Converts a conditioned frame into touches
///
/// Implementations fill the slots with `x`, `y`, `z`, `dz` and `age`;
/// committed keys and the pressure curve are applied afterwards.
pub trait TouchTracker: Send {
    fn track(&mut self, frame: &SensorFrame) -> Result<TouchArray, TrackerError>;

    /// Drop all tracking state (e.g. after recalibration)
    fn clear(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_explicitly_active() {
        let mut array = TouchArray::new();
        assert_eq!(array.active_count(), 0);
        array.set(3, Some(Touch::new(1.5, 2.5, 0.4)));
        array.set(99, Some(Touch::new(0.0, 0.0, 1.0)));

        assert!(array.is_active(3));
        assert!(!array.is_active(0));
        assert_eq!(array.active_count(), 1);
        let (slot, touch) = array.active().next().unwrap();
        assert_eq!(slot, 3);
        assert_eq!(touch.key(), (1, 2));

        // zero pressure is still an active slot
        array.set(4, Some(Touch::new(0.0, 0.0, 0.0)));
        assert_eq!(array.active_count(), 2);

        array.clear();
        assert_eq!(array.active_count(), 0);
    }
}
