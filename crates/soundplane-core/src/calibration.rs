//! Baseline calibration
//!
//! A calibration run averages `total_steps` untouched frames per sensor, then
//! inverts the mean into a correction map. The signal conditioner multiplies
//! raw frames by that map so a resting sensor reads 0.0 after correction.
//!
//! ```text
//! Idle ──begin()──▶ Calibrating { step: 0 } ──accumulate()×N──▶ commit baseline ──▶ Idle
//!                         └──────────────── end() (abort, nothing committed) ──▶ Idle
//! ```

use ndarray::Array2;

use crate::stats::SensorFrameStats;
use crate::types::SensorFrame;

/// Means below this are treated as this value before inversion
pub const MIN_BASELINE_MEAN: f32 = 1e-4;

/// Inverse per-sensor baseline produced by a completed calibration run
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationBaseline {
    inverse: Array2<f32>,
}

impl CalibrationBaseline {
    /// Invert a per-sensor mean
    pub fn from_mean(mean: &SensorFrame) -> Self {
        Self {
            inverse: mean
                .as_array()
                .mapv(|m| 1.0 / m.max(MIN_BASELINE_MEAN)),
        }
    }

    /// Inverse baseline values, `height × width`
    pub fn inverse(&self) -> &Array2<f32> {
        &self.inverse
    }

    pub fn width(&self) -> usize {
        self.inverse.ncols()
    }

    pub fn height(&self) -> usize {
        self.inverse.nrows()
    }

    /// True if the map can correct `frame`
    pub fn matches(&self, frame: &SensorFrame) -> bool {
        self.inverse.dim() == frame.as_array().dim()
    }

    /// Inverse baseline as a frame (for observers)
    pub fn to_frame(&self) -> SensorFrame {
        SensorFrame::from_array(self.inverse.clone())
    }
}

/// Calibration state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    Idle,
    Calibrating { step: usize },
}

/// Outcome of feeding one frame
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationStep {
    /// Not calibrating; frame ignored
    Idle,
    /// Frame accumulated
    InProgress { step: usize },
    /// Final frame accumulated; the new baseline
    Complete(CalibrationBaseline),
}

/// Accumulates the calibration baseline
///
/// Owned by the processing thread. Mutual exclusion with carrier selection
/// is enforced by the model's mode gate before `begin` is ever called.
pub struct CalibrationEngine {
    width: usize,
    height: usize,
    total_steps: usize,
    state: CalibrationState,
    stats: SensorFrameStats,
}

impl CalibrationEngine {
    pub fn new(width: usize, height: usize, total_steps: usize) -> Self {
        Self {
            width,
            height,
            total_steps: total_steps.max(1),
            state: CalibrationState::Idle,
            stats: SensorFrameStats::new(width, height),
        }
    }

    /// Start a run; returns false if one is already running
    pub fn begin(&mut self) -> bool {
        if self.is_calibrating() {
            log::warn!("[CALIBRATE] begin ignored, already calibrating");
            return false;
        }
        self.stats.clear();
        self.state = CalibrationState::Calibrating { step: 0 };
        log::info!(
            "[CALIBRATE] Started ({} frames, {}x{})",
            self.total_steps,
            self.width,
            self.height
        );
        true
    }

    /// Abort the current run without committing anything
    pub fn end(&mut self) {
        if let CalibrationState::Calibrating { step } = self.state {
            log::info!(
                "[CALIBRATE] Aborted at step {}/{}",
                step,
                self.total_steps
            );
        }
        self.stats.clear();
        self.state = CalibrationState::Idle;
    }

    /// Feed one raw frame
    pub fn accumulate(&mut self, frame: &SensorFrame) -> CalibrationStep {
        let CalibrationState::Calibrating { step } = self.state else {
            return CalibrationStep::Idle;
        };

        if !self.stats.accumulate(frame) {
            log::warn!(
                "[CALIBRATE] Ignoring {}x{} frame, calibrating {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
            return CalibrationStep::InProgress { step };
        }

        let step = step + 1;
        if step < self.total_steps {
            self.state = CalibrationState::Calibrating { step };
            return CalibrationStep::InProgress { step };
        }

        let baseline = CalibrationBaseline::from_mean(&self.stats.mean());
        self.stats.clear();
        self.state = CalibrationState::Idle;
        log::info!("[CALIBRATE] Complete after {} frames", step);
        CalibrationStep::Complete(baseline)
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_calibrating(&self) -> bool {
        matches!(self.state, CalibrationState::Calibrating { .. })
    }

    /// `step / total_steps` while calibrating, 0.0 otherwise
    pub fn progress(&self) -> f32 {
        match self.state {
            CalibrationState::Calibrating { step } => step as f32 / self.total_steps as f32,
            CalibrationState::Idle => 0.0,
        }
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Change the run length; takes effect on the next `begin`
    pub fn set_total_steps(&mut self, steps: usize) {
        self.total_steps = steps.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_run_commits_inverse_baseline() {
        let mut engine = CalibrationEngine::new(4, 2, 10);
        assert!(engine.begin());

        let mut result = None;
        for i in 0..10 {
            // alternate 0.4 / 0.6 so the mean is 0.5
            let value = if i % 2 == 0 { 0.4 } else { 0.6 };
            match engine.accumulate(&SensorFrame::filled(4, 2, value)) {
                CalibrationStep::InProgress { step } => {
                    assert_eq!(step, i + 1);
                    assert!((engine.progress() - step as f32 / 10.0).abs() < 1e-6);
                }
                CalibrationStep::Complete(baseline) => result = Some(baseline),
                CalibrationStep::Idle => panic!("engine went idle mid-run"),
            }
        }

        let baseline = result.expect("run should complete on the last step");
        assert_eq!((baseline.width(), baseline.height()), (4, 2));
        assert!(baseline.inverse().iter().all(|&v| (v - 2.0).abs() < 1e-4));
        assert!(!engine.is_calibrating());
        assert_eq!(engine.progress(), 0.0);
    }

    #[test]
    fn test_abort_discards_accumulation() {
        let mut engine = CalibrationEngine::new(2, 2, 5);
        engine.begin();
        engine.accumulate(&SensorFrame::filled(2, 2, 100.0));
        engine.accumulate(&SensorFrame::filled(2, 2, 100.0));
        engine.end();
        assert_eq!(engine.state(), CalibrationState::Idle);

        // A fresh run is not polluted by the aborted one
        engine.begin();
        let mut baseline = None;
        for _ in 0..5 {
            if let CalibrationStep::Complete(b) = engine.accumulate(&SensorFrame::filled(2, 2, 0.25)) {
                baseline = Some(b);
            }
        }
        let baseline = baseline.unwrap();
        assert!((baseline.inverse()[[0, 0]] - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_begin_while_calibrating_is_rejected() {
        let mut engine = CalibrationEngine::new(2, 2, 5);
        assert!(engine.begin());
        engine.accumulate(&SensorFrame::filled(2, 2, 1.0));
        assert!(!engine.begin());
        assert_eq!(engine.state(), CalibrationState::Calibrating { step: 1 });
    }

    #[test]
    fn test_idle_engine_ignores_frames() {
        let mut engine = CalibrationEngine::new(2, 2, 5);
        assert_eq!(
            engine.accumulate(&SensorFrame::filled(2, 2, 1.0)),
            CalibrationStep::Idle
        );
    }

    #[test]
    fn test_wrong_shape_does_not_advance() {
        let mut engine = CalibrationEngine::new(4, 2, 3);
        engine.begin();
        assert_eq!(
            engine.accumulate(&SensorFrame::zeros(2, 2)),
            CalibrationStep::InProgress { step: 0 }
        );
    }

    #[test]
    fn test_dead_sensor_is_clamped() {
        let baseline = CalibrationBaseline::from_mean(&SensorFrame::zeros(1, 1));
        assert!(baseline.inverse()[[0, 0]].is_finite());
        assert_eq!(baseline.inverse()[[0, 0]], 1.0 / MIN_BASELINE_MEAN);
    }
}
