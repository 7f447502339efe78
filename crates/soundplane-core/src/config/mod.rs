//! Configuration for the Soundplane pipeline
//!
//! - Generic YAML config loading/saving
//! - Default config location
//! - The pipeline settings tree (`SoundplaneConfig`)
//!
//! # Usage
//!
//! ```ignore
//! use soundplane_core::config::{default_config_path, load_config, SoundplaneConfig};
//!
//! let path = default_config_path("soundplane.yaml");
//! let config: SoundplaneConfig = load_config(&path);
//! ```

mod io;
mod paths;
mod settings;

pub use io::{load_config, read_config, save_config};
pub use paths::{default_config_dir, default_config_path, default_presets_dir};
pub use settings::{
    CalibrationConfig, CarrierConfig, OutputConfig, SignalConfig, SoundplaneConfig,
    SurfaceConfig, TouchConfig,
};
