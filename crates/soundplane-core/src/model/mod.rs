//! The Soundplane model context
//!
//! [`SoundplaneModel`] owns the frame queue, the processing thread and every
//! pipeline component. Other threads talk to it three ways:
//!
//! - the driver thread through the [`DriverListener`] returned by
//!   [`SoundplaneModel::listener`] (frames, lifecycle)
//! - control threads through the model's methods or [`OscListener`]; these
//!   validate synchronously and queue a command for the processing thread
//! - observers through the query methods, which read published snapshots
//!
//! ```text
//! driver ──on_frame──▶ FrameQueue ──▶ ┌──────────────────────┐ ──▶ OutputDispatcher ──▶ MIDI / OSC
//! control ──command──▶ channel ─────▶ │ processing thread    │
//!                                     └──────────┬───────────┘
//!                                                ▼
//!                                      snapshots (grids, touches, progress)
//! ```

mod bridge;
mod command;
mod mode;
mod processor;
mod properties;
mod shared;
mod thread;

pub use mode::{ModeGate, PipelineMode};
pub use processor::Processor;
pub use properties::{Property, PropertySet, PropertyValue};
pub use thread::ProcessingThread;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use serde_json::{json, Value};

use self::bridge::DriverBridge;
use self::command::ModelCommand;
use self::shared::ModelShared;
use crate::calibration::CalibrationBaseline;
use crate::carriers::CarrierSet;
use crate::config::SoundplaneConfig;
use crate::driver::{DeviceState, DriverListener, SoundplaneDriver};
use crate::error::{SoundplaneError, SoundplaneResult};
use crate::osc::{
    parse_control, ControlRequest, OscArg, OscListener, OscMessage, OscPacket, OscSink, Query,
};
use crate::output::OutputConsumer;
use crate::presets::{
    builtin_touch_presets, builtin_zone_presets, LayeredPresets, PresetCatalog,
};
use crate::queue::FrameQueue;
use crate::touch::{TouchArray, TouchTracker};
use crate::types::{SensorFrame, FRAME_QUEUE_CAPACITY};
use crate::zone::ZoneLayout;

/// Zone preset loaded when the model is created
const DEFAULT_ZONE_PRESET: &str = "chromatic";

/// Discovered network services (OSC clients announcing themselves)
pub trait ServiceBrowser: Send + Sync {
    fn services(&self) -> Vec<String>;
}

/// Owns the pipeline and exposes its control and query surface
pub struct SoundplaneModel {
    config: SoundplaneConfig,
    shared: Arc<ModelShared>,
    queue: Arc<FrameQueue>,
    commands: Sender<ModelCommand>,
    /// Present while the processing thread is stopped
    processor: Mutex<Option<Processor>>,
    thread: Mutex<Option<ProcessingThread>>,
    zone_presets: Box<dyn PresetCatalog>,
    touch_presets: Box<dyn PresetCatalog>,
    services: Option<Box<dyn ServiceBrowser>>,
}

impl SoundplaneModel {
    /// Build a stopped model around a tracker and the output consumers
    pub fn new(
        config: SoundplaneConfig,
        tracker: Box<dyn TouchTracker>,
        outputs: Vec<Box<dyn OutputConsumer>>,
    ) -> Self {
        let surface = &config.surface;
        let zone_presets = builtin_zone_presets(surface.key_width, surface.key_height);
        let shared = Arc::new(ModelShared::new(&config, processor::initial_carriers(&config)));

        match zone_presets
            .load(DEFAULT_ZONE_PRESET)
            .map_err(SoundplaneError::from)
            .and_then(|json| {
                ZoneLayout::from_json_str(&json, surface.key_width, surface.key_height)
                    .map_err(SoundplaneError::from)
            }) {
            Ok(layout) => shared.zones.publish(layout),
            Err(e) => log::warn!("[ZONES] Default layout unavailable: {}", e),
        }
        shared
            .properties()
            .set(Property::ZonePreset, DEFAULT_ZONE_PRESET.into());

        let queue = Arc::new(FrameQueue::new(FRAME_QUEUE_CAPACITY));
        let (tx, rx) = channel::unbounded();
        let processor = Processor::new(&config, shared.clone(), queue.clone(), rx, tracker, outputs);

        log::info!(
            "[PROCESS] Model created: {}x{} sensors, {}x{} keys, {} carrier groups",
            surface.sensor_width,
            surface.sensor_height,
            surface.key_width,
            surface.key_height,
            surface.carrier_groups
        );

        Self {
            shared,
            queue,
            commands: tx,
            processor: Mutex::new(Some(processor)),
            thread: Mutex::new(None),
            zone_presets: Box::new(zone_presets),
            touch_presets: Box::new(builtin_touch_presets()),
            services: None,
            config,
        }
    }

    /// Add a zone preset collection; its names shadow the built-in ones
    pub fn with_zone_presets(mut self, catalog: Box<dyn PresetCatalog>) -> Self {
        let builtin = std::mem::replace(&mut self.zone_presets, Box::new(LayeredPresets::default()));
        self.zone_presets = Box::new(LayeredPresets::new(vec![catalog, builtin]));
        self
    }

    /// Add a touch preset collection; its names shadow the built-in ones
    pub fn with_touch_presets(mut self, catalog: Box<dyn PresetCatalog>) -> Self {
        let builtin =
            std::mem::replace(&mut self.touch_presets, Box::new(LayeredPresets::default()));
        self.touch_presets = Box::new(LayeredPresets::new(vec![catalog, builtin]));
        self
    }

    pub fn with_service_browser(mut self, browser: Box<dyn ServiceBrowser>) -> Self {
        self.services = Some(browser);
        self
    }

    // ─── Lifecycle ───

    /// Callback sink to hand to the driver
    pub fn listener(&self) -> Arc<dyn DriverListener> {
        Arc::new(DriverBridge {
            shared: self.shared.clone(),
            queue: self.queue.clone(),
        })
    }

    /// Give the processing thread a driver to write carriers to
    pub fn attach_driver(&self, driver: Arc<dyn SoundplaneDriver>) -> SoundplaneResult<()> {
        self.shared.hardware.publish(driver.description());
        self.shared.serial_number.publish(driver.serial_number());
        self.send(ModelCommand::AttachDriver(driver))
    }

    /// Spawn the processing thread; false if it is already running
    pub fn start(&self) -> bool {
        let mut thread = self.lock_thread();
        if let Some(previous) = thread.take() {
            if previous.is_running() {
                *thread = Some(previous);
                return false;
            }
            if let Some(processor) = previous.stop() {
                *self.lock_processor() = Some(processor);
            }
        }
        let Some(processor) = self.lock_processor().take() else {
            log::error!("[PROCESS] Processor unavailable, cannot start");
            return false;
        };
        *thread = Some(ProcessingThread::spawn(processor));
        true
    }

    /// Stop and join the processing thread; pipeline state is kept
    pub fn stop(&self) {
        let Some(thread) = self.lock_thread().take() else {
            return;
        };
        if let Some(processor) = thread.stop() {
            *self.lock_processor() = Some(processor);
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_thread()
            .as_ref()
            .is_some_and(ProcessingThread::is_running)
    }

    /// Run one processing cycle on the calling thread
    ///
    /// Only possible while the processing thread is stopped; returns true if
    /// a frame was processed.
    pub fn step(&self, timeout: Duration) -> bool {
        match self.lock_processor().as_mut() {
            Some(processor) => processor.cycle(timeout),
            None => false,
        }
    }

    /// Run the infrequent tasks now on the calling thread (stopped model only)
    pub fn run_infrequent_tasks(&self) {
        if let Some(processor) = self.lock_processor().as_mut() {
            processor.force_infrequent_tasks();
        }
    }

    // ─── Calibration and carriers ───

    /// Start a baseline calibration run
    ///
    /// Rejected while calibrating or selecting carriers.
    pub fn begin_calibrate(&self) -> SoundplaneResult<()> {
        let generation = self.shared.mode.try_enter(PipelineMode::Calibrating)?;
        self.shared.calibrate_progress.set(0.0);
        self.send(ModelCommand::BeginCalibrate { generation })
            .inspect_err(|_| {
                self.shared.mode.leave(PipelineMode::Calibrating);
            })
    }

    /// Abort calibration; the previous baseline stays in effect
    pub fn end_calibrate(&self) -> SoundplaneResult<()> {
        if self.shared.mode.leave(PipelineMode::Calibrating) {
            self.send(ModelCommand::EndCalibrate)?;
        }
        Ok(())
    }

    /// Start a carrier selection run
    ///
    /// Rejected while calibrating or selecting carriers.
    pub fn begin_select_carriers(&self) -> SoundplaneResult<()> {
        let generation = self.shared.mode.try_enter(PipelineMode::SelectingCarriers)?;
        self.shared.selection_progress.set(0.0);
        self.send(ModelCommand::BeginSelectCarriers { generation })
            .inspect_err(|_| {
                self.shared.mode.leave(PipelineMode::SelectingCarriers);
            })
    }

    /// Finish measuring the current candidate set early
    pub fn next_select_carriers_step(&self) -> SoundplaneResult<()> {
        if self.is_selecting_carriers() {
            self.send(ModelCommand::NextSelectCarriersStep)?;
        }
        Ok(())
    }

    /// Abort selection and restore the carriers in use before it started
    pub fn end_select_carriers(&self) -> SoundplaneResult<()> {
        if self.shared.mode.leave(PipelineMode::SelectingCarriers) {
            self.send(ModelCommand::EndSelectCarriers)?;
        }
        Ok(())
    }

    /// Operator override; written to the device at the next safe point
    pub fn set_carriers(&self, carriers: CarrierSet) -> SoundplaneResult<()> {
        let expected = self.config.surface.carrier_groups;
        if carriers.groups() != expected {
            return Err(SoundplaneError::InvalidCarriers {
                expected,
                got: carriers.groups(),
            });
        }
        self.check_not_selecting("carrier override")?;
        self.send(ModelCommand::SetCarriers(carriers))
    }

    pub fn set_default_carriers(&self) -> SoundplaneResult<()> {
        self.check_not_selecting("default carriers")?;
        self.send(ModelCommand::SetDefaultCarriers)
    }

    /// Carrier enable mask, one bit per group
    pub fn enable_carriers(&self, mask: u64) -> SoundplaneResult<()> {
        self.send(ModelCommand::EnableCarriers(mask))
    }

    fn check_not_selecting(&self, requested: &'static str) -> SoundplaneResult<()> {
        let mode = self.shared.mode.mode();
        if mode == PipelineMode::SelectingCarriers {
            return Err(SoundplaneError::ModeConflict {
                requested,
                active: mode.label(),
            });
        }
        Ok(())
    }

    // ─── Output, zones, presets ───

    /// Global output switch, latched at the start of each output cycle
    pub fn enable_output(&self, enabled: bool) {
        self.shared.output_enabled.store(enabled, Ordering::Release);
    }

    pub fn is_output_enabled(&self) -> bool {
        self.shared.output_enabled.load(Ordering::Acquire)
    }

    /// Matrix output carries the raw grid instead of the smoothed one
    pub fn set_raw(&self, raw: bool) -> SoundplaneResult<()> {
        self.set_property(Property::Raw.name(), raw.into())
    }

    pub fn is_raw(&self) -> bool {
        self.property(Property::Raw.name())
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Drop touches, filter state and anything sounding on the outputs
    pub fn clear(&self) -> SoundplaneResult<()> {
        self.send(ModelCommand::Clear)
    }

    /// Parse and validate a zone layout, then hand it to the processing
    /// thread. A malformed layout is rejected and the current one stays.
    pub fn load_zones_from_str(&self, json: &str) -> SoundplaneResult<()> {
        let surface = &self.config.surface;
        let layout = ZoneLayout::from_json_str(json, surface.key_width, surface.key_height)?;
        self.load_layout(layout)
    }

    pub fn load_zones_from_json(&self, value: &Value) -> SoundplaneResult<()> {
        let surface = &self.config.surface;
        let layout = ZoneLayout::from_json_value(value, surface.key_width, surface.key_height)?;
        self.load_layout(layout)
    }

    fn load_layout(&self, layout: ZoneLayout) -> SoundplaneResult<()> {
        log::debug!("[ZONES] Loading layout with {} zones", layout.len());
        self.send(ModelCommand::LoadZones(Arc::new(layout)))
    }

    pub fn load_zone_preset_by_name(&self, name: &str) -> SoundplaneResult<()> {
        let json = self.zone_presets.load(name)?;
        self.load_zones_from_str(&json)?;
        self.shared.properties().set(Property::ZonePreset, name.into());
        log::info!("[ZONES] Loaded preset '{}'", name);
        Ok(())
    }

    /// Apply a touch preset (a flat property tree)
    pub fn load_touch_preset_by_name(&self, name: &str) -> SoundplaneResult<()> {
        let json = self.touch_presets.load(name)?;
        let tree: Value = serde_json::from_str(&json)?;
        self.set_state_from_json(&tree, 0)?;
        self.shared.properties().set(Property::TouchPreset, name.into());
        log::info!("[TOUCH] Loaded preset '{}'", name);
        Ok(())
    }

    pub fn zone_preset_names(&self) -> Vec<String> {
        self.zone_presets.names()
    }

    pub fn touch_preset_names(&self) -> Vec<String> {
        self.touch_presets.names()
    }

    // ─── Properties and state ───

    /// Set a named property
    ///
    /// The value is checked here; the change takes effect on the processing
    /// thread at the top of its next cycle.
    pub fn set_property(&self, name: &str, value: PropertyValue) -> SoundplaneResult<()> {
        let property =
            Property::from_name(name).ok_or_else(|| SoundplaneError::UnknownProperty(name.to_string()))?;
        if !property.accepts(&value) {
            return Err(SoundplaneError::InvalidProperty {
                name: name.to_string(),
            });
        }
        match (property, value.as_str()) {
            (Property::ZonePreset, Some(preset)) => self.load_zone_preset_by_name(preset),
            (Property::TouchPreset, Some(preset)) => self.load_touch_preset_by_name(preset),
            _ => {
                self.shared.properties().set(property, value.clone());
                self.send(ModelCommand::SetProperty(property, value))
            }
        }
    }

    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        self.shared.properties().get(name).cloned()
    }

    pub fn properties(&self) -> PropertySet {
        self.shared.properties().clone()
    }

    /// Apply a state tree
    ///
    /// Keys naming properties are set; `zones`, `carriers` and
    /// `output_enabled` restore those parts; other objects are descended into
    /// while `depth` allows. Entries that fail are logged and skipped.
    pub fn set_state_from_json(&self, tree: &Value, depth: usize) -> SoundplaneResult<()> {
        let Value::Object(entries) = tree else {
            return Err(SoundplaneError::InvalidProperty {
                name: String::from("<root>"),
            });
        };

        for (key, value) in entries {
            let result = match (key.as_str(), value) {
                ("zones", _) => self.load_zones_from_json(value),
                ("carriers", _) => serde_json::from_value::<CarrierSet>(value.clone())
                    .map_err(SoundplaneError::from)
                    .and_then(|carriers| self.set_carriers(carriers)),
                ("output_enabled", Value::Bool(on)) => {
                    self.enable_output(*on);
                    Ok(())
                }
                (_, Value::Object(_)) if depth > 0 => self.set_state_from_json(value, depth - 1),
                (_, Value::Object(_)) => {
                    log::debug!("[STATE] Not descending into '{}'", key);
                    Ok(())
                }
                (name, _) => match PropertyValue::from_json(value) {
                    Some(v) if Property::from_name(name).is_some() => self.set_property(name, v),
                    _ => {
                        log::debug!("[STATE] Skipping '{}'", name);
                        Ok(())
                    }
                },
            };
            if let Err(e) = result {
                log::warn!("[STATE] '{}': {}", key, e);
            }
        }
        Ok(())
    }

    pub fn set_state_from_str(&self, json: &str, depth: usize) -> SoundplaneResult<()> {
        let tree: Value = serde_json::from_str(json)?;
        self.set_state_from_json(&tree, depth)
    }

    /// Current state as a tree accepted by [`set_state_from_json`](Self::set_state_from_json)
    pub fn get_state_json(&self) -> Value {
        json!({
            "properties": self.shared.properties().to_json(),
            "carriers": self.carriers().as_slice(),
            "zones": self.zones().to_json_value(),
            "output_enabled": self.is_output_enabled(),
        })
    }

    // ─── Queries ───

    pub fn config(&self) -> &SoundplaneConfig {
        &self.config
    }

    /// Sensor grid (width, height)
    pub fn dimensions(&self) -> (usize, usize) {
        (self.config.surface.sensor_width, self.config.surface.sensor_height)
    }

    /// Key grid (width, height)
    pub fn key_dimensions(&self) -> (usize, usize) {
        (self.config.surface.key_width, self.config.surface.key_height)
    }

    pub fn raw_frame(&self) -> Arc<SensorFrame> {
        self.shared.signals.raw.load()
    }

    pub fn calibrated_frame(&self) -> Arc<SensorFrame> {
        self.shared.signals.calibrated.load()
    }

    pub fn smoothed_frame(&self) -> Arc<SensorFrame> {
        self.shared.signals.smoothed.load()
    }

    pub fn calibration_baseline(&self) -> Option<CalibrationBaseline> {
        self.shared.baseline.get()
    }

    pub fn touches(&self) -> TouchArray {
        self.shared.touches.get()
    }

    /// Recent touch frames, oldest first
    pub fn touch_history(&self) -> Vec<TouchArray> {
        self.shared.history().to_vec()
    }

    /// Recent calibrated values of sensor `(x, y)`, oldest first
    pub fn sample_history(&self, x: usize, y: usize) -> Vec<f32> {
        self.shared.sensor_history().sample_history(x, y)
    }

    /// `(mean, std_dev)` over the recent calibrated frames
    pub fn history_stats(&self) -> Option<(f32, f32)> {
        self.shared.sensor_history().stats()
    }

    /// Smallest and largest calibrated sample in the newest `n` frames
    pub fn min_max_history(&self, n: usize) -> Option<(f32, f32)> {
        self.shared.sensor_history().min_max(n)
    }

    pub fn calibrate_progress(&self) -> f32 {
        self.shared.calibrate_progress.get()
    }

    pub fn select_carriers_progress(&self) -> f32 {
        self.shared.selection_progress.get()
    }

    pub fn mode(&self) -> PipelineMode {
        self.shared.mode.mode()
    }

    pub fn is_calibrating(&self) -> bool {
        self.mode() == PipelineMode::Calibrating
    }

    pub fn is_selecting_carriers(&self) -> bool {
        self.mode() == PipelineMode::SelectingCarriers
    }

    pub fn has_calibration(&self) -> bool {
        self.shared.has_calibration.load(Ordering::Acquire)
    }

    pub fn device_state(&self) -> DeviceState {
        self.shared.device_state()
    }

    pub fn device_state_code(&self) -> i32 {
        self.device_state().code()
    }

    pub fn device_status(&self) -> String {
        self.shared.device_status.get()
    }

    /// Status of the output consumers, refreshed by the infrequent tasks
    pub fn client_status(&self) -> String {
        self.shared.client_status.get()
    }

    pub fn hardware_status(&self) -> String {
        self.shared.hardware.get()
    }

    pub fn serial_number(&self) -> Option<u32> {
        self.shared.serial_number.get()
    }

    pub fn is_kyma_connected(&self) -> bool {
        self.shared.kyma_connected.load(Ordering::Acquire)
    }

    pub fn services(&self) -> Vec<String> {
        self.services
            .as_ref()
            .map(|browser| browser.services())
            .unwrap_or_default()
    }

    /// Carriers in effect (not the candidates excited during selection)
    pub fn carriers(&self) -> CarrierSet {
        self.shared.carriers.get()
    }

    pub fn zones(&self) -> Arc<ZoneLayout> {
        self.shared.zones.load()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queue high-water mark over the current and previous diagnostics window
    pub fn max_recent_queue_size(&self) -> usize {
        self.queue
            .max_recent_size()
            .max(self.shared.max_recent_queue_size.load(Ordering::Relaxed))
    }

    pub fn dropped_frames(&self) -> u64 {
        self.queue.dropped_frames()
    }

    pub fn frames_processed(&self) -> u64 {
        self.shared.frames_processed.load(Ordering::Relaxed)
    }

    // ─── Internals ───

    fn send(&self, command: ModelCommand) -> SoundplaneResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SoundplaneError::Disconnected)
    }

    fn lock_processor(&self) -> MutexGuard<'_, Option<Processor>> {
        self.processor.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_thread(&self) -> MutexGuard<'_, Option<ProcessingThread>> {
        self.thread.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle_control(&self, request: ControlRequest, reply: &mut dyn OscSink) -> SoundplaneResult<()> {
        match request {
            ControlRequest::BeginCalibrate => self.begin_calibrate(),
            ControlRequest::EndCalibrate => self.end_calibrate(),
            ControlRequest::BeginSelectCarriers => self.begin_select_carriers(),
            ControlRequest::NextSelectCarriersStep => self.next_select_carriers_step(),
            ControlRequest::EndSelectCarriers => self.end_select_carriers(),
            ControlRequest::SetDefaultCarriers => self.set_default_carriers(),
            ControlRequest::ZonePreset(name) => self.load_zone_preset_by_name(&name),
            ControlRequest::TouchPreset(name) => self.load_touch_preset_by_name(&name),
            ControlRequest::SetProperty { name, value } => self.set_property(&name, value),
            ControlRequest::EnableOutput(on) => {
                self.enable_output(on);
                Ok(())
            }
            ControlRequest::Clear => self.clear(),
            ControlRequest::KymaResponse => {
                self.handle_kyma_response();
                Ok(())
            }
            ControlRequest::Query(query) => {
                let message = self.answer(query);
                if let Err(e) = reply.send(OscPacket::Message(message)) {
                    log::debug!("[OSC] Reply failed: {}", e);
                }
                Ok(())
            }
        }
    }

    fn handle_kyma_response(&self) {
        let kyma_mode = self
            .property(Property::KymaMode.name())
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !kyma_mode {
            log::debug!("[OSC] Ignoring Kyma response outside Kyma mode");
            return;
        }
        if !self.shared.kyma_connected.swap(true, Ordering::AcqRel) {
            log::info!("[OSC] Kyma connected");
        }
    }

    fn answer(&self, query: Query) -> OscMessage {
        match query {
            Query::Status => OscMessage::new(
                "/t3d/status",
                vec![
                    self.device_state_code().into(),
                    self.device_status().into(),
                    self.client_status().into(),
                ],
            ),
            Query::Progress => OscMessage::new(
                "/t3d/progress",
                vec![
                    self.calibrate_progress().into(),
                    self.select_carriers_progress().into(),
                ],
            ),
            Query::Serial => OscMessage::new(
                "/t3d/serial",
                vec![self.serial_number().map_or(0, |n| n as i32).into()],
            ),
            Query::ZonePresets => OscMessage::new(
                "/t3d/zone_presets",
                self.zone_preset_names().into_iter().map(OscArg::from).collect(),
            ),
            Query::Services => OscMessage::new(
                "/t3d/services",
                self.services().into_iter().map(OscArg::from).collect(),
            ),
            Query::HistoryStats => {
                let (mean, std_dev) = self.history_stats().unwrap_or_default();
                OscMessage::new("/t3d/history", vec![mean.into(), std_dev.into()])
            }
        }
    }
}

impl OscListener for SoundplaneModel {
    fn process_message(&self, message: &OscMessage, reply: &mut dyn OscSink) {
        let result = parse_control(message)
            .map_err(|e| e.to_string())
            .and_then(|request| self.handle_control(request, reply).map_err(|e| e.to_string()));

        if let Err(text) = result {
            log::warn!("[OSC] {}: {}", message.address, text);
            let error = OscMessage::new(
                "/t3d/error",
                vec![message.address.as_str().into(), text.into()],
            );
            if let Err(e) = reply.send(OscPacket::Message(error)) {
                log::debug!("[OSC] Reply failed: {}", e);
            }
        }
    }
}

impl Drop for SoundplaneModel {
    fn drop(&mut self) {
        self.stop();
    }
}
