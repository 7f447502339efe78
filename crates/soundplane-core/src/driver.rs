//! Hardware transport boundary
//!
//! The USB driver lives outside this crate. It calls a [`DriverListener`]
//! from its own thread and accepts carrier writes through
//! [`SoundplaneDriver`].

use std::fmt;

use thiserror::Error;

use crate::carriers::CarrierSet;
use crate::types::SensorFrame;

/// Connection state reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum DeviceState {
    #[default]
    NoDevice = 0,
    /// Attached, not yet streaming
    Connected = 1,
    /// Isochronous transfers in sync; frames are flowing
    HasIsochSync = 2,
    Terminating = 3,
    Suspended = 4,
    Resumed = 5,
}

impl DeviceState {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => DeviceState::NoDevice,
            1 => DeviceState::Connected,
            2 => DeviceState::HasIsochSync,
            3 => DeviceState::Terminating,
            4 => DeviceState::Suspended,
            5 => DeviceState::Resumed,
            _ => return None,
        })
    }

    pub fn is_streaming(self) -> bool {
        self == DeviceState::HasIsochSync
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::NoDevice => "no device",
            DeviceState::Connected => "connected",
            DeviceState::HasIsochSync => "synchronized",
            DeviceState::Terminating => "terminating",
            DeviceState::Suspended => "suspended",
            DeviceState::Resumed => "resumed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DriverError {
    #[error("No Soundplane connected")]
    NotConnected,

    #[error("Carrier write failed: {0}")]
    CarrierWrite(String),

    #[error("Transport error {code}: {message}")]
    Transport { code: i32, message: String },
}

/// Callbacks from the driver thread
///
/// Implementations must return quickly; `on_frame` in particular runs at the
/// hardware frame rate.
pub trait DriverListener: Send + Sync {
    /// Device is streaming and ready for carriers / calibration
    fn on_startup(&self);

    fn on_frame(&self, frame: SensorFrame);

    fn on_error(&self, code: i32, message: &str);

    fn on_close(&self);
}

/// Commands and queries accepted by the driver
pub trait SoundplaneDriver: Send + Sync {
    fn device_state(&self) -> DeviceState;

    fn set_carriers(&self, carriers: &CarrierSet) -> Result<(), DriverError>;

    /// Enable / disable individual carriers, one bit per group
    fn enable_carriers(&self, mask: u64) -> Result<(), DriverError>;

    fn serial_number(&self) -> Option<u32>;

    /// Hardware / firmware description for status display
    fn description(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes_round_trip() {
        for code in 0..6 {
            let state = DeviceState::from_code(code).unwrap();
            assert_eq!(state.code(), code);
        }
        assert_eq!(DeviceState::from_code(9), None);
        assert!(DeviceState::HasIsochSync.is_streaming());
        assert_eq!(DeviceState::Suspended.to_string(), "suspended");
    }
}
