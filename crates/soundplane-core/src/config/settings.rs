//! Pipeline settings
//!
//! Every section uses `#[serde(default)]`, so a config file only needs to
//! name the values it changes.

use serde::{Deserialize, Serialize};

use crate::types::{
    DEFAULT_KEY_HEIGHT, DEFAULT_KEY_WIDTH, DEFAULT_SENSOR_HEIGHT, DEFAULT_SENSOR_WIDTH,
    NUM_CARRIERS,
};

/// Root configuration for the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundplaneConfig {
    /// Sensor and key grid geometry
    pub surface: SurfaceConfig,
    /// Baseline calibration
    pub calibration: CalibrationConfig,
    /// Carrier selection and manual carrier override
    pub carriers: CarrierConfig,
    /// Tracking, pressure curve and key hysteresis
    pub touch: TouchConfig,
    /// Smoothing filter
    pub signal: SignalConfig,
    /// Output dispatch and housekeeping cadence
    pub output: OutputConfig,
}

/// Surface geometry
///
/// The sensor grid is what the driver delivers; the key grid is the
/// coordinate space of tracked touches and zone rectangles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Sensor columns per frame
    pub sensor_width: usize,
    /// Sensor rows per frame
    pub sensor_height: usize,
    /// Key columns on the playing surface
    pub key_width: usize,
    /// Key rows on the playing surface
    pub key_height: usize,
    /// Number of carrier (column) groups; must divide `sensor_width`
    pub carrier_groups: usize,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            sensor_width: DEFAULT_SENSOR_WIDTH,
            sensor_height: DEFAULT_SENSOR_HEIGHT,
            key_width: DEFAULT_KEY_WIDTH,
            key_height: DEFAULT_KEY_HEIGHT,
            carrier_groups: NUM_CARRIERS,
        }
    }
}

impl SurfaceConfig {
    /// Sensor columns driven by one carrier
    pub fn columns_per_group(&self) -> usize {
        (self.sensor_width / self.carrier_groups.max(1)).max(1)
    }
}

/// Baseline calibration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Frames averaged into the baseline
    pub steps: usize,
    /// Start a calibration run once the device reports startup
    pub calibrate_on_startup: bool,
    /// Start a calibration run after new carriers have been written
    pub recalibrate_after_carriers: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            steps: 1000,
            calibrate_on_startup: true,
            recalibrate_after_carriers: true,
        }
    }
}

/// Carrier selection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarrierConfig {
    /// Frames discarded after exciting a candidate set, before measuring
    pub settle_frames: usize,
    /// Frames measured per candidate set
    pub measure_frames: usize,
    /// Number of standard candidate sets tried per run
    pub candidate_sets: usize,
    /// Operator-supplied carrier set applied instead of the defaults
    pub override_carriers: Option<Vec<u8>>,
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            settle_frames: 8,
            measure_frames: 64,
            candidate_sets: 16,
            override_carriers: None,
        }
    }
}

/// Touch pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TouchConfig {
    /// Linear pressure gain applied before the curve
    pub z_scale: f32,
    /// Blend between linear (0.0) and cubic (1.0) pressure response
    pub z_curve: f32,
    /// Distance in keys a touch must travel past a key edge to change key
    pub hysteresis: f32,
    /// Replace the tracker with synthetic touches
    pub test_touches: bool,
    /// Number of touch frames kept for observers
    pub history_length: usize,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            z_scale: 1.0,
            z_curve: 0.25,
            hysteresis: 0.3,
            test_touches: false,
            history_length: 500,
        }
    }
}

/// Smoothing filter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Enable the low-pass filter
    pub filter: bool,
    /// One-pole coefficient in (0, 1]; 1.0 passes the input through
    pub lopass: f32,
    /// Number of calibrated frames kept for history statistics
    pub history_length: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            filter: true,
            lopass: 0.5,
            history_length: 64,
        }
    }
}

/// Output and housekeeping cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Global output enable
    pub enabled: bool,
    /// Maximum output frames per second
    pub data_rate: f32,
    /// Interval between infrequent housekeeping passes
    pub infrequent_interval_ms: u64,
    /// Dequeue timeout; bounds shutdown latency of the processing thread
    pub queue_timeout_ms: u64,
    /// Send the whole signal grid with every output frame
    pub send_matrix: bool,
    /// Send the raw grid instead of the smoothed calibrated one
    pub raw: bool,
    /// Announce to a Kyma host and wait for its response
    pub kyma_mode: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            data_rate: 100.0,
            infrequent_interval_ms: 1000,
            queue_timeout_ms: 50,
            send_matrix: false,
            raw: false,
            kyma_mode: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry_groups_two_columns() {
        let surface = SurfaceConfig::default();
        assert_eq!(surface.sensor_width, 64);
        assert_eq!(surface.carrier_groups, 32);
        assert_eq!(surface.columns_per_group(), 2);
    }

    #[test]
    fn test_columns_per_group_never_zero() {
        let surface = SurfaceConfig {
            sensor_width: 4,
            carrier_groups: 0,
            ..Default::default()
        };
        assert_eq!(surface.columns_per_group(), 4);
    }
}
