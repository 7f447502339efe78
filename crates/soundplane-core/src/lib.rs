//! Soundplane surface pipeline
//!
//! This crate provides:
//! - A drop-oldest frame queue between the driver callback and processing
//! - Signal conditioning (baseline correction, low-pass smoothing)
//! - Baseline calibration and carrier selection state machines
//! - Touch post-processing (pressure curve, key hysteresis, test touches)
//! - Zone layouts, routing and note change detection
//! - Output dispatch to MIDI / OSC consumers
//! - The [`SoundplaneModel`] context tying it together on a processing thread
//!
//! # Architecture
//!
//! ```text
//! driver callback → FrameQueue → processing thread → OutputDispatcher → consumers
//!                                       │
//!                                       └→ snapshots ← UI / OSC queries
//! ```
//!
//! The touch tracker and the hardware transport are supplied by the caller
//! through [`touch::TouchTracker`] and [`driver::SoundplaneDriver`].

pub mod calibration;
pub mod carriers;
pub mod config;
pub mod driver;
pub mod error;
pub mod model;
pub mod osc;
pub mod output;
pub mod presets;
pub mod queue;
pub mod signal;
pub mod snapshot;
pub mod stats;
pub mod touch;
pub mod types;
pub mod zone;

pub use carriers::CarrierSet;
pub use config::SoundplaneConfig;
pub use driver::{DeviceState, DriverListener, SoundplaneDriver};
pub use error::{SoundplaneError, SoundplaneResult};
pub use model::{PipelineMode, PropertyValue, ServiceBrowser, SoundplaneModel};
pub use output::{OutputConsumer, OutputDispatcher};
pub use touch::{Touch, TouchArray, TouchTracker, TrackerError};
pub use types::{SensorFrame, MAX_TOUCHES};
pub use zone::{RoutedFrame, ZoneLayout, ZoneMessage, ZoneTouch};
