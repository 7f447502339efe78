//! Tracker → pressure curve → key hysteresis

use super::{TestTouches, TouchArray, TouchTracker};
use crate::config::TouchConfig;
use crate::types::{SensorFrame, MAX_TOUCHES};

/// Upper bound of scaled pressure before the curve is applied
const MAX_SCALED_Z: f32 = 4.0;

/// dz arrives in raw pressure units per frame; bring it near z's range
const DZ_GAIN: f32 = 0.125;

/// Rescale pressure and pressure delta
///
/// `z` is multiplied by `z_scale`, then blended between linear and cubic by
/// `z_curve` (0.0 linear, 1.0 cubic). The result is monotonic in `z` and
/// clamped to `0..=1`. `dz` goes through the same curve, keeping its sign,
/// clamped to `-1..=1`.
pub fn scale_pressure(z: f32, dz: f32, z_scale: f32, z_curve: f32) -> (f32, f32) {
    let c = z_curve.clamp(0.0, 1.0);
    let curve = |v: f32| (1.0 - c) * v + c * v * v * v;

    let z = (z * z_scale).clamp(0.0, MAX_SCALED_Z);
    let z = curve(z).clamp(0.0, 1.0);

    let dz = (dz * DZ_GAIN * z_scale).clamp(-1.0, 1.0);
    let dz = curve(dz).clamp(-1.0, 1.0);

    (z, dz)
}

/// Committed key per touch slot
///
/// A touch keeps its key until its position moves past the key's edge by
/// more than `threshold` key widths. The committed key is forgotten when the
/// slot goes inactive, so a new touch in the same slot starts fresh.
#[derive(Debug, Clone)]
pub struct KeyHysteresis {
    keys: [Option<(i32, i32)>; MAX_TOUCHES],
    threshold: f32,
    key_width: i32,
    key_height: i32,
}

impl KeyHysteresis {
    pub fn new(threshold: f32, key_width: usize, key_height: usize) -> Self {
        Self {
            keys: [None; MAX_TOUCHES],
            threshold: threshold.max(0.0),
            key_width: key_width.max(1) as i32,
            key_height: key_height.max(1) as i32,
        }
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.max(0.0);
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Commit (or keep) the key for a touch at `(x, y)` in `slot`
    pub fn resolve(&mut self, slot: usize, x: f32, y: f32) -> (i32, i32) {
        let Some(entry) = self.keys.get_mut(slot) else {
            return (x.floor() as i32, y.floor() as i32);
        };
        let key = match *entry {
            None => (
                (x.floor() as i32).clamp(0, self.key_width - 1),
                (y.floor() as i32).clamp(0, self.key_height - 1),
            ),
            Some((kx, ky)) => (
                resolve_axis(x, kx, self.threshold, self.key_width),
                resolve_axis(y, ky, self.threshold, self.key_height),
            ),
        };
        *entry = Some(key);
        key
    }

    /// Committed key of a slot, if its touch is active
    pub fn committed(&self, slot: usize) -> Option<(i32, i32)> {
        self.keys.get(slot).copied().flatten()
    }

    /// Forget the slot's key
    pub fn release(&mut self, slot: usize) {
        if let Some(entry) = self.keys.get_mut(slot) {
            *entry = None;
        }
    }

    pub fn clear(&mut self) {
        self.keys = [None; MAX_TOUCHES];
    }
}

fn resolve_axis(pos: f32, current: i32, threshold: f32, keys: i32) -> i32 {
    let low = current as f32 - threshold;
    let high = (current + 1) as f32 + threshold;
    let key = if pos < low || pos >= high {
        pos.floor() as i32
    } else {
        current
    };
    key.clamp(0, keys - 1)
}

/// Touch stage of the processing loop
pub struct TouchPipeline {
    tracker: Box<dyn TouchTracker>,
    test_touches: TestTouches,
    use_test_touches: bool,
    z_scale: f32,
    z_curve: f32,
    keys: KeyHysteresis,
    /// Array emitted for the previous frame; re-emitted on tracker error
    last: TouchArray,
    tracker_errors: u64,
}

impl TouchPipeline {
    pub fn new(
        tracker: Box<dyn TouchTracker>,
        config: &TouchConfig,
        key_width: usize,
        key_height: usize,
    ) -> Self {
        Self {
            tracker,
            test_touches: TestTouches::new(key_width, key_height, 2),
            use_test_touches: config.test_touches,
            z_scale: config.z_scale,
            z_curve: config.z_curve,
            keys: KeyHysteresis::new(config.hysteresis, key_width, key_height),
            last: TouchArray::new(),
            tracker_errors: 0,
        }
    }

    /// Track one conditioned frame
    pub fn process(&mut self, frame: &SensorFrame) -> TouchArray {
        let tracked = if self.use_test_touches {
            Ok(self.test_touches.next_frame())
        } else {
            self.tracker.track(frame)
        };

        let mut touches = match tracked {
            Ok(touches) => touches,
            Err(e) => {
                self.tracker_errors += 1;
                log::debug!("[TOUCH] Tracker error, holding previous touches: {}", e);
                return self.last;
            }
        };

        for slot in 0..MAX_TOUCHES {
            match touches.get_mut(slot) {
                Some(touch) => {
                    let (z, dz) = scale_pressure(touch.z, touch.dz, self.z_scale, self.z_curve);
                    touch.z = z;
                    touch.dz = dz;
                    let (kx, ky) = self.keys.resolve(slot, touch.x, touch.y);
                    touch.kx = kx;
                    touch.ky = ky;
                }
                None => self.keys.release(slot),
            }
        }

        self.last = touches;
        touches
    }

    /// Touches emitted for the most recent frame
    pub fn last(&self) -> &TouchArray {
        &self.last
    }

    /// Tracker failures since creation
    pub fn tracker_errors(&self) -> u64 {
        self.tracker_errors
    }

    pub fn set_z_scale(&mut self, z_scale: f32) {
        self.z_scale = z_scale;
    }

    pub fn set_z_curve(&mut self, z_curve: f32) {
        self.z_curve = z_curve;
    }

    pub fn set_hysteresis(&mut self, threshold: f32) {
        self.keys.set_threshold(threshold);
    }

    /// Replace the tracker output with synthetic touches
    pub fn set_test_touches(&mut self, enabled: bool) {
        if enabled != self.use_test_touches {
            log::info!("[TOUCH] Test touches {}", if enabled { "on" } else { "off" });
            self.use_test_touches = enabled;
            self.test_touches.reset();
            self.keys.clear();
        }
    }

    pub fn test_touches_enabled(&self) -> bool {
        self.use_test_touches
    }

    /// Reset tracker, committed keys and the held array
    pub fn clear(&mut self) {
        self.tracker.clear();
        self.keys.clear();
        self.last.clear();
        self.test_touches.reset();
    }
}
