//! State shared between the processing thread, the driver callback and
//! observers
//!
//! The processing thread writes; everyone else reads. Grids and arrays are
//! [`Snapshot`] cells, flags and counters are atomics.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::mode::ModeGate;
use super::properties::PropertySet;
use crate::calibration::CalibrationBaseline;
use crate::carriers::CarrierSet;
use crate::config::SoundplaneConfig;
use crate::driver::DeviceState;
use crate::signal::SignalSnapshots;
use crate::snapshot::{ProgressCell, Snapshot};
use crate::stats::SensorHistory;
use crate::touch::{TouchArray, TouchHistory};
use crate::zone::ZoneLayout;

pub struct ModelShared {
    pub(crate) signals: SignalSnapshots,
    pub(crate) baseline: Snapshot<Option<CalibrationBaseline>>,
    pub(crate) has_calibration: AtomicBool,
    pub(crate) touches: Snapshot<TouchArray>,
    pub(crate) history: Mutex<TouchHistory>,
    /// Recent calibrated frames for history statistics
    pub(crate) sensor_history: Mutex<SensorHistory>,
    pub(crate) zones: Snapshot<ZoneLayout>,
    pub(crate) carriers: Snapshot<CarrierSet>,
    pub(crate) mode: ModeGate,
    pub(crate) calibrate_progress: ProgressCell,
    pub(crate) selection_progress: ProgressCell,
    /// Global output enable, latched by the dispatcher once per cycle
    pub(crate) output_enabled: Arc<AtomicBool>,
    pub(crate) device_state: AtomicI32,
    pub(crate) device_status: Snapshot<String>,
    pub(crate) client_status: Snapshot<String>,
    pub(crate) hardware: Snapshot<String>,
    pub(crate) serial_number: Snapshot<Option<u32>>,
    /// Set by the driver callback, consumed at the top of a cycle
    pub(crate) startup_pending: AtomicBool,
    /// A Kyma host answered our announcement
    pub(crate) kyma_connected: AtomicBool,
    pub(crate) properties: Mutex<PropertySet>,
    pub(crate) frames_processed: AtomicU64,
    pub(crate) max_recent_queue_size: AtomicUsize,
}

impl ModelShared {
    pub(crate) fn new(config: &SoundplaneConfig, carriers: CarrierSet) -> Self {
        let surface = &config.surface;
        Self {
            signals: SignalSnapshots::new(surface.sensor_width, surface.sensor_height),
            baseline: Snapshot::new(None),
            has_calibration: AtomicBool::new(false),
            touches: Snapshot::new(TouchArray::new()),
            history: Mutex::new(TouchHistory::new(config.touch.history_length)),
            sensor_history: Mutex::new(SensorHistory::new(config.signal.history_length)),
            zones: Snapshot::new(ZoneLayout::empty(surface.key_width, surface.key_height)),
            carriers: Snapshot::new(carriers),
            mode: ModeGate::new(),
            calibrate_progress: ProgressCell::new(),
            selection_progress: ProgressCell::new(),
            output_enabled: Arc::new(AtomicBool::new(config.output.enabled)),
            device_state: AtomicI32::new(DeviceState::NoDevice.code()),
            device_status: Snapshot::new(String::from("No device")),
            client_status: Snapshot::new(String::new()),
            hardware: Snapshot::new(String::new()),
            serial_number: Snapshot::new(None),
            startup_pending: AtomicBool::new(false),
            kyma_connected: AtomicBool::new(false),
            properties: Mutex::new(PropertySet::from_config(config)),
            frames_processed: AtomicU64::new(0),
            max_recent_queue_size: AtomicUsize::new(0),
        }
    }

    pub(crate) fn device_state(&self) -> DeviceState {
        DeviceState::from_code(self.device_state.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub(crate) fn set_device_state(&self, state: DeviceState) {
        let previous = self.device_state.swap(state.code(), Ordering::Relaxed);
        if previous != state.code() {
            log::info!("[DRIVER] Device state: {}", state);
        }
    }

    pub(crate) fn set_device_status(&self, status: impl Into<String>) {
        self.device_status.publish(status.into());
    }

    pub(crate) fn history(&self) -> MutexGuard<'_, TouchHistory> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn sensor_history(&self) -> MutexGuard<'_, SensorHistory> {
        self.sensor_history.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn properties(&self) -> MutexGuard<'_, PropertySet> {
        self.properties.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish one processed touch frame
    pub(crate) fn publish_touches(&self, touches: TouchArray) {
        self.touches.publish(touches);
        self.history().push(touches);
    }
}
