//! Driver callback side of the model
//!
//! Runs on the driver's thread. It only enqueues frames and sets flags; all
//! hardware writes happen later on the processing thread.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::shared::ModelShared;
use crate::driver::{DeviceState, DriverListener};
use crate::queue::FrameQueue;
use crate::types::SensorFrame;

pub(crate) struct DriverBridge {
    pub(crate) shared: Arc<ModelShared>,
    pub(crate) queue: Arc<FrameQueue>,
}

impl DriverListener for DriverBridge {
    fn on_startup(&self) {
        self.shared.set_device_state(DeviceState::HasIsochSync);
        self.shared.set_device_status("Starting up");
        self.shared.startup_pending.store(true, Ordering::Release);
    }

    fn on_frame(&self, frame: SensorFrame) {
        self.queue.push(frame);
    }

    fn on_error(&self, code: i32, message: &str) {
        log::warn!("[DRIVER] Error {}: {}", code, message);
        self.shared
            .set_device_status(format!("Error {}: {}", code, message));
    }

    fn on_close(&self) {
        self.shared.set_device_state(DeviceState::NoDevice);
        self.shared.set_device_status("No device");
        self.queue.clear();
    }
}
