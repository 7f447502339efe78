//! Per-frame signal conditioning
//!
//! raw ──× inverse baseline − 1──▶ calibrated ──one-pole low-pass──▶ smoothed
//!
//! The conditioner is owned by the processing thread. Its output grids are
//! published to observers through [`SignalSnapshots`].

use std::sync::Arc;

use ndarray::Zip;

use crate::calibration::CalibrationBaseline;
use crate::config::SignalConfig;
use crate::snapshot::Snapshot;
use crate::types::SensorFrame;

/// Result of conditioning one raw frame
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionedFrame {
    pub calibrated: SensorFrame,
    pub smoothed: SensorFrame,
}

/// Correct a raw frame with the inverse baseline
///
/// A resting sensor reads about 0.0 after correction. Without a baseline, or
/// when the baseline no longer matches the frame's shape, the raw frame is
/// passed through unchanged.
pub fn apply_calibration(raw: &SensorFrame, baseline: Option<&CalibrationBaseline>) -> SensorFrame {
    match baseline {
        Some(baseline) if baseline.matches(raw) => {
            let mut out = raw.as_array().clone();
            Zip::from(&mut out)
                .and(baseline.inverse())
                .for_each(|v, &inv| *v = *v * inv - 1.0);
            SensorFrame::from_array(out)
        }
        Some(_) => {
            log::warn!(
                "[SIGNAL] Baseline shape mismatch for {}x{} frame, passing raw through",
                raw.width(),
                raw.height()
            );
            raw.clone()
        }
        None => raw.clone(),
    }
}

/// Stateful conditioner: calibration correction followed by smoothing
pub struct SignalConditioner {
    filter: bool,
    lopass: f32,
    /// Previous smoothed output; `None` until the first frame
    state: Option<SensorFrame>,
}

impl SignalConditioner {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            filter: config.filter,
            lopass: clamp_coefficient(config.lopass),
            state: None,
        }
    }

    /// Condition one raw frame
    pub fn condition(
        &mut self,
        raw: &SensorFrame,
        baseline: Option<&CalibrationBaseline>,
    ) -> ConditionedFrame {
        let calibrated = apply_calibration(raw, baseline);

        let smoothed = match self.state.as_ref() {
            Some(prev) if self.filter && prev.same_shape(&calibrated) => {
                let k = self.lopass;
                let mut out = prev.as_array().clone();
                Zip::from(&mut out)
                    .and(calibrated.as_array())
                    .for_each(|s, &c| *s += k * (c - *s));
                SensorFrame::from_array(out)
            }
            _ => calibrated.clone(),
        };

        self.state = Some(smoothed.clone());
        ConditionedFrame {
            calibrated,
            smoothed,
        }
    }

    /// Switch the low-pass filter on or off; off makes smoothed == calibrated
    pub fn set_filter(&mut self, enabled: bool) {
        self.filter = enabled;
    }

    pub fn filter(&self) -> bool {
        self.filter
    }

    /// Set the one-pole coefficient (clamped to (0, 1])
    pub fn set_lopass(&mut self, k: f32) {
        self.lopass = clamp_coefficient(k);
    }

    pub fn lopass(&self) -> f32 {
        self.lopass
    }

    /// Forget filter history; the next frame passes through unsmoothed
    pub fn reset(&mut self) {
        self.state = None;
    }
}

fn clamp_coefficient(k: f32) -> f32 {
    if k.is_finite() {
        k.clamp(f32::EPSILON, 1.0)
    } else {
        1.0
    }
}

/// Observer-visible signal grids
///
/// Each grid has its own cell, so a UI reading the raw grid never waits on a
/// writer publishing the smoothed one.
pub struct SignalSnapshots {
    pub raw: Snapshot<SensorFrame>,
    pub calibrated: Snapshot<SensorFrame>,
    pub smoothed: Snapshot<SensorFrame>,
}

impl SignalSnapshots {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            raw: Snapshot::new(SensorFrame::zeros(width, height)),
            calibrated: Snapshot::new(SensorFrame::zeros(width, height)),
            smoothed: Snapshot::new(SensorFrame::zeros(width, height)),
        }
    }

    /// Publish the grids of one processed frame
    pub fn publish(&self, raw: Arc<SensorFrame>, conditioned: &ConditionedFrame) {
        self.raw.publish_arc(raw);
        self.calibrated.publish(conditioned.calibrated.clone());
        self.smoothed.publish(conditioned.smoothed.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline(width: usize, height: usize, mean: f32) -> CalibrationBaseline {
        CalibrationBaseline::from_mean(&SensorFrame::filled(width, height, mean))
    }

    #[test]
    fn test_uncalibrated_is_identity() {
        let raw = SensorFrame::from_fn(4, 2, |x, y| (x + y) as f32);
        assert_eq!(apply_calibration(&raw, None), raw);
    }

    #[test]
    fn test_resting_sensor_reads_zero() {
        let b = baseline(4, 2, 0.5);
        let calibrated = apply_calibration(&SensorFrame::filled(4, 2, 0.5), Some(&b));
        assert!(calibrated.as_array().iter().all(|v| v.abs() < 1e-6));

        let pressed = apply_calibration(&SensorFrame::filled(4, 2, 0.75), Some(&b));
        assert!((pressed.get(0, 0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_baseline_passes_through() {
        let b = baseline(2, 2, 0.5);
        let raw = SensorFrame::filled(4, 2, 0.3);
        assert_eq!(apply_calibration(&raw, Some(&b)), raw);
    }

    #[test]
    fn test_low_pass_converges() {
        let mut conditioner = SignalConditioner::new(&SignalConfig {
            filter: true,
            lopass: 0.5,
            ..Default::default()
        });
        let first = conditioner.condition(&SensorFrame::zeros(2, 1), None);
        assert_eq!(first.smoothed.get(0, 0), 0.0);

        let step = SensorFrame::filled(2, 1, 1.0);
        let second = conditioner.condition(&step, None);
        assert!((second.smoothed.get(0, 0) - 0.5).abs() < 1e-6);
        assert_eq!(second.calibrated.get(0, 0), 1.0);

        let third = conditioner.condition(&step, None);
        assert!((third.smoothed.get(1, 0) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_filter_off_passes_calibrated() {
        let mut conditioner = SignalConditioner::new(&SignalConfig::default());
        conditioner.set_filter(false);
        conditioner.condition(&SensorFrame::zeros(2, 1), None);
        let out = conditioner.condition(&SensorFrame::filled(2, 1, 3.0), None);
        assert_eq!(out.smoothed, out.calibrated);
    }

    #[test]
    fn test_reset_and_shape_change_restart_filter() {
        let mut conditioner = SignalConditioner::new(&SignalConfig::default());
        conditioner.condition(&SensorFrame::zeros(2, 1), None);
        let resized = conditioner.condition(&SensorFrame::filled(3, 1, 2.0), None);
        assert_eq!(resized.smoothed.get(2, 0), 2.0);

        conditioner.reset();
        let out = conditioner.condition(&SensorFrame::filled(3, 1, 8.0), None);
        assert_eq!(out.smoothed.get(0, 0), 8.0);
    }

    #[test]
    fn test_lopass_is_clamped() {
        let mut conditioner = SignalConditioner::new(&SignalConfig::default());
        conditioner.set_lopass(5.0);
        assert_eq!(conditioner.lopass(), 1.0);
        conditioner.set_lopass(f32::NAN);
        assert_eq!(conditioner.lopass(), 1.0);
        conditioner.set_lopass(0.0);
        assert!(conditioner.lopass() > 0.0);
    }

    #[test]
    fn test_snapshots_publish_each_grid() {
        let snapshots = SignalSnapshots::new(2, 1);
        let mut conditioner = SignalConditioner::new(&SignalConfig::default());
        let raw = SensorFrame::filled(2, 1, 0.25);
        let conditioned = conditioner.condition(&raw, None);
        snapshots.publish(Arc::new(raw.clone()), &conditioned);
        assert_eq!(*snapshots.raw.load(), raw);
        assert_eq!(snapshots.smoothed.version(), 1);
        assert_eq!(snapshots.calibrated.get(), conditioned.calibrated);
    }
}
