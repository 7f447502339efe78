//! One processing cycle
//!
//! ```text
//! commands ─▶ deferred writes ─▶ pop frame ─▶ condition + publish
//!                                               ├─ calibrating:  accumulate baseline
//!                                               ├─ selecting:    accumulate noise
//!                                               └─ normal:       track ─▶ route ─▶ dispatch (rate gated)
//!            ─▶ infrequent tasks (time gated)
//! ```
//!
//! Hardware writes (carriers, carrier masks) are only ever issued from the
//! deferred-write step at the top of a cycle, never from inside a selection
//! step or from the driver callback.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;

use super::command::ModelCommand;
use super::mode::PipelineMode;
use super::properties::{Property, PropertyValue};
use super::shared::ModelShared;
use crate::calibration::{CalibrationBaseline, CalibrationEngine, CalibrationStep};
use crate::carriers::{CarrierSelectionEngine, CarrierSet, SelectionEvent};
use crate::config::SoundplaneConfig;
use crate::driver::{DeviceState, SoundplaneDriver};
use crate::output::{OutputConsumer, OutputDispatcher};
use crate::queue::FrameQueue;
use crate::signal::SignalConditioner;
use crate::touch::{TouchPipeline, TouchTracker};
use crate::types::SensorFrame;
use crate::zone::ZoneRouter;

/// Minimum time between dispatched output frames
fn output_interval(data_rate: f32) -> Duration {
    if data_rate.is_finite() && data_rate > 0.0 {
        Duration::from_secs_f32(1.0 / data_rate)
    } else {
        Duration::ZERO
    }
}

/// Carrier set a fresh pipeline starts with: the configured override if it
/// fits the surface, the default table otherwise
pub(crate) fn initial_carriers(config: &SoundplaneConfig) -> CarrierSet {
    let groups = config.surface.carrier_groups;
    match &config.carriers.override_carriers {
        Some(carriers) if carriers.len() == groups => CarrierSet::new(carriers.clone()),
        Some(carriers) => {
            log::warn!(
                "[CARRIERS] Ignoring override with {} carriers, surface has {} groups",
                carriers.len(),
                groups
            );
            CarrierSet::default_for(groups)
        }
        None => CarrierSet::default_for(groups),
    }
}

/// Everything the processing thread owns
pub struct Processor {
    shared: Arc<ModelShared>,
    queue: Arc<FrameQueue>,
    commands: Receiver<ModelCommand>,
    driver: Option<Arc<dyn SoundplaneDriver>>,

    carrier_groups: usize,
    recalibrate_after_carriers: bool,
    calibrate_on_startup: bool,

    conditioner: SignalConditioner,
    calibration: CalibrationEngine,
    selection: CarrierSelectionEngine,
    touches: TouchPipeline,
    router: ZoneRouter,
    dispatcher: OutputDispatcher,

    baseline: Option<CalibrationBaseline>,
    calibration_generation: u64,
    selection_generation: u64,

    /// Carriers last written (or to be written once a device starts)
    carriers: CarrierSet,
    /// Carriers to restore if selection is aborted
    carriers_before_selection: Option<CarrierSet>,
    /// Deferred hardware writes
    pending_carriers: Option<CarrierSet>,
    pending_mask: Option<u64>,
    /// Start calibration once pending carriers are written
    calibrate_pending: bool,

    output_interval: Duration,
    last_output: Option<Instant>,
    send_matrix: bool,
    raw_matrix: bool,
    infrequent_interval: Duration,
    last_infrequent: Instant,
    queue_timeout: Duration,
    reported_dropped: u64,
}

impl Processor {
    pub(crate) fn new(
        config: &SoundplaneConfig,
        shared: Arc<ModelShared>,
        queue: Arc<FrameQueue>,
        commands: Receiver<ModelCommand>,
        tracker: Box<dyn TouchTracker>,
        outputs: Vec<Box<dyn OutputConsumer>>,
    ) -> Self {
        let surface = &config.surface;
        let mut dispatcher = OutputDispatcher::new(outputs, shared.output_enabled.clone());
        dispatcher.set_data_rate(config.output.data_rate);
        dispatcher.set_kyma_mode(config.output.kyma_mode);
        let carriers = shared.carriers.get();

        Self {
            queue,
            commands,
            driver: None,
            carrier_groups: surface.carrier_groups,
            recalibrate_after_carriers: config.calibration.recalibrate_after_carriers,
            calibrate_on_startup: config.calibration.calibrate_on_startup,
            conditioner: SignalConditioner::new(&config.signal),
            calibration: CalibrationEngine::new(
                surface.sensor_width,
                surface.sensor_height,
                config.calibration.steps,
            ),
            selection: CarrierSelectionEngine::new(
                surface.sensor_width,
                surface.sensor_height,
                surface.columns_per_group(),
                &config.carriers,
                CarrierSet::standard_sets(config.carriers.candidate_sets, surface.carrier_groups),
            ),
            touches: TouchPipeline::new(tracker, &config.touch, surface.key_width, surface.key_height),
            router: ZoneRouter::new(shared.zones.load()),
            dispatcher,
            baseline: None,
            calibration_generation: 0,
            selection_generation: 0,
            carriers,
            carriers_before_selection: None,
            pending_carriers: None,
            pending_mask: None,
            calibrate_pending: false,
            output_interval: output_interval(config.output.data_rate),
            last_output: None,
            send_matrix: config.output.send_matrix,
            raw_matrix: config.output.raw,
            infrequent_interval: Duration::from_millis(config.output.infrequent_interval_ms),
            last_infrequent: Instant::now(),
            queue_timeout: Duration::from_millis(config.output.queue_timeout_ms.max(1)),
            reported_dropped: 0,
            shared,
        }
    }

    /// Dequeue timeout; bounds how long shutdown can take
    pub fn queue_timeout(&self) -> Duration {
        self.queue_timeout
    }

    /// Run one cycle, waiting up to `timeout` for a frame
    ///
    /// Returns true if a frame was processed.
    pub fn cycle(&mut self, timeout: Duration) -> bool {
        self.handle_commands();
        self.handle_startup();
        self.apply_deferred_writes();

        let processed = match self.queue.pop_blocking(timeout) {
            Some(frame) => {
                self.process_frame(frame);
                true
            }
            None => false,
        };

        if self.last_infrequent.elapsed() >= self.infrequent_interval {
            self.last_infrequent = Instant::now();
            self.do_infrequent_tasks();
        }
        processed
    }

    fn handle_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            log::debug!("[PROCESS] {:?}", command);
            self.handle_command(command);
        }
    }

    fn handle_command(&mut self, command: ModelCommand) {
        match command {
            ModelCommand::BeginCalibrate { generation } => {
                if self.shared.mode.is_current(PipelineMode::Calibrating, generation) {
                    self.start_calibration(generation);
                }
            }
            ModelCommand::EndCalibrate => {
                self.calibration.end();
                self.shared.calibrate_progress.set(0.0);
            }
            ModelCommand::BeginSelectCarriers { generation } => {
                if self.shared.mode.is_current(PipelineMode::SelectingCarriers, generation) {
                    self.start_selection(generation);
                }
            }
            ModelCommand::NextSelectCarriersStep => {
                let event = self.selection.next_step();
                self.handle_selection_event(event);
            }
            ModelCommand::EndSelectCarriers => {
                if self.selection.is_selecting() {
                    self.selection.end();
                    if let Some(previous) = self.carriers_before_selection.take() {
                        self.pending_carriers = Some(previous);
                    }
                }
                self.shared.selection_progress.set(0.0);
            }
            ModelCommand::SetCarriers(carriers) => {
                self.pending_carriers = Some(carriers);
                self.calibrate_pending |= self.recalibrate_after_carriers;
            }
            ModelCommand::SetDefaultCarriers => {
                self.pending_carriers = Some(CarrierSet::default_for(self.carrier_groups));
                self.calibrate_pending |= self.recalibrate_after_carriers;
            }
            ModelCommand::EnableCarriers(mask) => self.pending_mask = Some(mask),
            ModelCommand::LoadZones(layout) => {
                self.router.set_layout(layout.clone());
                self.shared.zones.publish_arc(layout);
            }
            ModelCommand::SetProperty(property, value) => self.apply_property(property, &value),
            ModelCommand::Clear => self.clear(),
            ModelCommand::AttachDriver(driver) => {
                self.shared.set_device_state(driver.device_state());
                self.driver = Some(driver);
            }
        }
    }

    fn apply_property(&mut self, property: Property, value: &PropertyValue) {
        let number = value.as_f32().unwrap_or_default();
        let flag = value.as_bool().unwrap_or_default();
        match property {
            Property::ZScale => self.touches.set_z_scale(number),
            Property::ZCurve => self.touches.set_z_curve(number),
            Property::Hysteresis => self.touches.set_hysteresis(number),
            Property::Lopass => self.conditioner.set_lopass(number),
            Property::Filter => self.conditioner.set_filter(flag),
            Property::DataRate => {
                self.output_interval = output_interval(number);
                self.dispatcher.set_data_rate(number);
            }
            Property::MidiActive => {
                self.dispatcher.set_consumer_active("midi", flag);
            }
            Property::OscActive => {
                self.dispatcher.set_consumer_active("osc", flag);
            }
            Property::TestTouches => self.touches.set_test_touches(flag),
            Property::Raw => self.raw_matrix = flag,
            Property::SendMatrix => self.send_matrix = flag,
            Property::KymaMode => {
                self.dispatcher.set_kyma_mode(flag);
                if !flag {
                    self.shared.kyma_connected.store(false, Ordering::Release);
                }
            }
            // Presets are resolved on the caller's thread
            Property::ZonePreset | Property::TouchPreset => {}
        }
    }

    fn clear(&mut self) {
        log::info!("[PROCESS] Clearing touches and outputs");
        self.touches.clear();
        self.router.clear();
        self.dispatcher.clear();
        self.conditioner.reset();
        self.shared.touches.publish(Default::default());
        self.shared.history().clear();
    }

    /// Device came up: rewrite carriers, then calibrate if configured
    fn handle_startup(&mut self) {
        if !self.shared.startup_pending.swap(false, Ordering::AcqRel) {
            return;
        }
        log::info!("[PROCESS] Device startup");
        if let Some(driver) = &self.driver {
            self.shared.set_device_state(driver.device_state());
            self.shared.hardware.publish(driver.description());
            self.shared.serial_number.publish(driver.serial_number());
        }
        if self.pending_carriers.is_none() {
            self.pending_carriers = Some(self.carriers.clone());
        }
        self.calibrate_pending |= self.calibrate_on_startup;
    }

    /// The safe point: hardware writes queued by earlier cycles or commands
    fn apply_deferred_writes(&mut self) {
        if let Some(carriers) = self.pending_carriers.take() {
            match &self.driver {
                Some(driver) => match driver.set_carriers(&carriers) {
                    Ok(()) => log::debug!("[CARRIERS] Wrote {:?}", carriers.as_slice()),
                    Err(e) => log::warn!("[CARRIERS] {}", e),
                },
                None => log::debug!("[CARRIERS] No driver, carriers kept for startup"),
            }
            if !self.selection.is_selecting() {
                self.shared.carriers.publish(carriers.clone());
            }
            self.carriers = carriers;
        }

        if let Some(mask) = self.pending_mask.take() {
            if let Some(driver) = &self.driver {
                if let Err(e) = driver.enable_carriers(mask) {
                    log::warn!("[CARRIERS] Enable mask {:#x}: {}", mask, e);
                }
            }
        }

        if self.calibrate_pending && !self.selection.is_selecting() {
            self.calibrate_pending = false;
            match self.shared.mode.try_enter(PipelineMode::Calibrating) {
                Ok(generation) => self.start_calibration(generation),
                Err(e) => log::info!("[CALIBRATE] Automatic calibration skipped: {}", e),
            }
        }
    }

    fn start_calibration(&mut self, generation: u64) {
        self.calibration_generation = generation;
        self.calibration.begin();
        self.shared.calibrate_progress.set(0.0);
    }

    fn start_selection(&mut self, generation: u64) {
        self.selection_generation = generation;
        let previous = self.pending_carriers.clone().unwrap_or_else(|| self.carriers.clone());
        match self.selection.begin() {
            Some(first) => {
                self.carriers_before_selection = Some(previous);
                self.pending_carriers = Some(first);
                self.shared.selection_progress.set(0.0);
            }
            None => {
                log::warn!("[CARRIERS] No candidate sets configured");
                self.shared.mode.finish(PipelineMode::SelectingCarriers, generation);
            }
        }
    }

    fn handle_selection_event(&mut self, event: SelectionEvent) {
        match event {
            SelectionEvent::None => {}
            SelectionEvent::Excite(candidate) => self.pending_carriers = Some(candidate),
            SelectionEvent::Complete(selected) => {
                let previous = self.carriers_before_selection.take();
                self.shared.selection_progress.set(1.0);
                if self
                    .shared
                    .mode
                    .finish(PipelineMode::SelectingCarriers, self.selection_generation)
                {
                    self.pending_carriers = Some(selected);
                    self.calibrate_pending |= self.recalibrate_after_carriers;
                } else {
                    log::debug!("[CARRIERS] Discarding result of a stale selection run");
                    self.pending_carriers = previous;
                }
            }
        }
        if self.selection.is_selecting() {
            self.shared.selection_progress.set(self.selection.progress());
        }
    }

    fn process_frame(&mut self, frame: SensorFrame) {
        let raw = Arc::new(frame);
        let conditioned = self.conditioner.condition(&raw, self.baseline.as_ref());
        self.shared.signals.publish(raw.clone(), &conditioned);
        self.shared
            .sensor_history()
            .push(self.shared.signals.calibrated.load());
        self.shared.frames_processed.fetch_add(1, Ordering::Relaxed);

        if self.calibration.is_calibrating() {
            if let CalibrationStep::Complete(baseline) = self.calibration.accumulate(&raw) {
                self.commit_baseline(baseline);
            } else {
                self.shared.calibrate_progress.set(self.calibration.progress());
            }
            return;
        }

        if self.selection.is_selecting() {
            let event = self.selection.accumulate(&raw);
            self.handle_selection_event(event);
            return;
        }

        let touches = self.touches.process(&conditioned.smoothed);
        self.shared.publish_touches(touches);
        let routed = self.router.route(&touches);

        let now = Instant::now();
        let due = self
            .last_output
            .map_or(true, |last| now.duration_since(last) >= self.output_interval);
        // Note changes are never held back by the rate limit
        if due || routed.has_note_changes() {
            let matrix = match (self.send_matrix, self.raw_matrix) {
                (false, _) => None,
                (true, true) => Some(&*raw),
                (true, false) => Some(&conditioned.smoothed),
            };
            self.dispatcher.dispatch_with_matrix(now, &routed, matrix);
            self.last_output = Some(now);
        }
    }

    fn commit_baseline(&mut self, baseline: CalibrationBaseline) {
        self.shared.calibrate_progress.set(1.0);
        if !self
            .shared
            .mode
            .finish(PipelineMode::Calibrating, self.calibration_generation)
        {
            log::debug!("[CALIBRATE] Discarding result of a stale run");
            return;
        }
        self.shared.baseline.publish(Some(baseline.clone()));
        self.baseline = Some(baseline);
        self.shared.has_calibration.store(true, Ordering::Release);
        self.conditioner.reset();
        self.touches.clear();
    }

    fn do_infrequent_tasks(&mut self) {
        if let Some(driver) = &self.driver {
            let state = driver.device_state();
            self.shared.set_device_state(state);
            if state == DeviceState::NoDevice {
                self.shared.set_device_status("No device");
            } else if !self.shared.device_status.load().starts_with("Error") {
                self.shared.set_device_status(format!("Soundplane {}", state));
            }
        }

        let depth = self.queue.take_max_recent_size();
        self.shared.max_recent_queue_size.store(depth, Ordering::Relaxed);
        let dropped = self.queue.dropped_frames();
        if dropped > self.reported_dropped {
            log::warn!(
                "[PROCESS] {} frames dropped (queue high-water {}/{})",
                dropped - self.reported_dropped,
                depth,
                self.queue.capacity()
            );
            self.reported_dropped = dropped;
        }

        let errors = self.touches.tracker_errors();
        if errors > 0 {
            log::trace!("[PROCESS] Tracker errors so far: {}", errors);
        }

        self.dispatcher.do_infrequent_tasks();
        let status = self
            .dispatcher
            .statuses()
            .into_iter()
            .map(|(name, status)| format!("{}: {}", name, status))
            .collect::<Vec<_>>()
            .join(", ");
        let status = if self.shared.kyma_connected.load(Ordering::Acquire) {
            format!("{}, Kyma connected", status)
        } else {
            status
        };
        self.shared.client_status.publish(status);
    }

    /// Run the infrequent tasks now (tests and manual stepping)
    pub fn force_infrequent_tasks(&mut self) {
        self.last_infrequent = Instant::now();
        self.do_infrequent_tasks();
    }
}
