//! Calibration / carrier selection exclusion

use std::fmt;
use std::sync::Mutex;

use crate::error::{SoundplaneError, SoundplaneResult};

/// What the processing loop does with incoming frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum PipelineMode {
    /// Track and dispatch
    #[default]
    Normal = 0,
    /// Frames feed the baseline; no output
    Calibrating = 1,
    /// Frames feed noise measurement; no output
    SelectingCarriers = 2,
}

impl PipelineMode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            PipelineMode::Normal => "normal operation",
            PipelineMode::Calibrating => "calibration",
            PipelineMode::SelectingCarriers => "carrier selection",
        }
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Shared mode plus a run generation
///
/// Entering a mode is decided here, synchronously, on the caller's thread;
/// the processing thread only acts on runs the gate accepted. Every enter and
/// leave bumps the generation, so a completion reported for an older run
/// (one that was aborted and restarted) is refused.
#[derive(Debug, Default)]
pub struct ModeGate {
    state: Mutex<(PipelineMode, u64)>,
}

impl ModeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> PipelineMode {
        self.lock().0
    }

    pub fn generation(&self) -> u64 {
        self.lock().1
    }

    /// Enter `mode` from normal operation; returns the run's generation
    pub fn try_enter(&self, mode: PipelineMode) -> SoundplaneResult<u64> {
        let mut state = self.lock();
        if state.0 != PipelineMode::Normal {
            return Err(SoundplaneError::ModeConflict {
                requested: mode.label(),
                active: state.0.label(),
            });
        }
        state.1 += 1;
        state.0 = mode;
        Ok(state.1)
    }

    /// Abort `mode` if it is active; returns false if it wasn't
    pub fn leave(&self, mode: PipelineMode) -> bool {
        let mut state = self.lock();
        if state.0 != mode || mode == PipelineMode::Normal {
            return false;
        }
        state.0 = PipelineMode::Normal;
        state.1 += 1;
        true
    }

    /// True while run `generation` of `mode` is the active one
    pub fn is_current(&self, mode: PipelineMode, generation: u64) -> bool {
        *self.lock() == (mode, generation)
    }

    /// Complete run `generation` of `mode`; false if that run is stale
    pub fn finish(&self, mode: PipelineMode, generation: u64) -> bool {
        let mut state = self.lock();
        if *state != (mode, generation) {
            return false;
        }
        state.0 = PipelineMode::Normal;
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, (PipelineMode, u64)> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
