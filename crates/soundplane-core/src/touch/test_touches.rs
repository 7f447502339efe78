//! Synthetic touches for exercising outputs without a player

use std::f32::consts::TAU;

use super::{Touch, TouchArray};
use crate::types::MAX_TOUCHES;

/// Phase advance per frame
const PHASE_STEP: f32 = 0.01;

/// Deterministic moving touches
///
/// Touches circle the surface at evenly spaced phases while their pressure
/// swells and fades. The same frame index always gives the same touches.
#[derive(Debug, Clone)]
pub struct TestTouches {
    key_width: f32,
    key_height: f32,
    count: usize,
    frame: u64,
    previous_z: [f32; MAX_TOUCHES],
}

impl TestTouches {
    pub fn new(key_width: usize, key_height: usize, count: usize) -> Self {
        Self {
            key_width: key_width.max(1) as f32,
            key_height: key_height.max(1) as f32,
            count: count.min(MAX_TOUCHES),
            frame: 0,
            previous_z: [0.0; MAX_TOUCHES],
        }
    }

    /// Touches for the next frame
    pub fn next_frame(&mut self) -> TouchArray {
        let mut touches = TouchArray::new();
        let t = self.frame as f32 * PHASE_STEP;
        let cx = self.key_width * 0.5;
        let cy = self.key_height * 0.5;

        for slot in 0..self.count {
            let phase = t + slot as f32 * TAU / self.count as f32;
            let x = cx + cx * 0.8 * phase.cos();
            let y = cy + cy * 0.8 * (phase * 2.0).sin();
            let z = 0.5 + 0.4 * (phase * 3.0).sin();
            let dz = z - self.previous_z[slot];
            self.previous_z[slot] = z;

            touches.set(
                slot,
                Some(Touch {
                    dz,
                    age: self.frame as u32 + 1,
                    ..Touch::new(x, y, z)
                }),
            );
        }

        self.frame += 1;
        touches
    }

    /// Restart from frame zero
    pub fn reset(&mut self) {
        self.frame = 0;
        self.previous_z = [0.0; MAX_TOUCHES];
    }
}
