//! Model-level error types

use thiserror::Error;

use crate::driver::DriverError;
use crate::presets::PresetError;
use crate::zone::ZoneError;

/// Errors returned synchronously by [`SoundplaneModel`](crate::SoundplaneModel)
/// operations. None of them is fatal; the pipeline keeps running.
#[derive(Error, Debug)]
pub enum SoundplaneError {
    /// Calibration and carrier selection exclude each other
    #[error("Cannot start {requested} while {active} is running")]
    ModeConflict {
        requested: &'static str,
        active: &'static str,
    },

    #[error(transparent)]
    Zone(#[from] ZoneError),

    #[error(transparent)]
    Preset(#[from] PresetError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Carrier set has {got} entries, surface has {expected} carrier groups")]
    InvalidCarriers { expected: usize, got: usize },

    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    #[error("Invalid value for property '{name}'")]
    InvalidProperty { name: String },

    #[error("Invalid state JSON: {0}")]
    State(#[from] serde_json::Error),

    /// The processing thread is gone; commands can no longer be delivered
    #[error("Processing thread is not running")]
    Disconnected,
}

/// Result type for model operations
pub type SoundplaneResult<T> = Result<T, SoundplaneError>;
