//! Output cycle fan-out to MIDI / OSC consumers
//!
//! One cycle per dispatched frame:
//!
//! ```text
//! begin_frame(ts) ─▶ send_touch × active touches ─▶ send_controller × zone messages
//!                 ─▶ send_matrix (matrix output only) ─▶ end_frame()
//! ```
//!
//! Every consumer sees the begin before any send of the cycle and the end
//! after all of them, so a consumer can bracket a bundle or a MIDI burst.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::types::SensorFrame;
use crate::zone::{RoutedFrame, ZoneMessage, ZoneTouch};

/// An output protocol fed by the dispatcher
pub trait OutputConsumer: Send {
    /// Name used for per-consumer toggles (e.g. "midi", "osc")
    fn name(&self) -> &str;

    fn begin_frame(&mut self, timestamp: Instant);

    /// `index` is the touch slot, stable for the lifetime of the touch
    fn send_touch(&mut self, index: usize, offset: i32, touch: &ZoneTouch);

    fn send_controller(&mut self, zone_id: usize, offset: i32, message: &ZoneMessage);

    /// Whole signal grid; only sent while matrix output is on
    fn send_matrix(&mut self, _matrix: &SensorFrame) {}

    fn end_frame(&mut self);

    fn is_active(&self) -> bool;

    fn set_active(&mut self, active: bool);

    /// Human-readable connection state
    fn status(&self) -> String;

    /// Housekeeping (reconnects, keep-alives); called from the infrequent tasks
    fn do_infrequent_tasks(&mut self) {}

    fn set_data_rate(&mut self, _rate: f32) {}

    fn set_kyma_mode(&mut self, _on: bool) {}

    /// Release everything currently sounding
    fn clear(&mut self) {}
}

/// Frames output cycles and forwards them to every active consumer
pub struct OutputDispatcher {
    consumers: Vec<Box<dyn OutputConsumer>>,
    /// Global enable; read once per cycle
    enabled: Arc<AtomicBool>,
    frames_sent: u64,
}

impl OutputDispatcher {
    pub fn new(consumers: Vec<Box<dyn OutputConsumer>>, enabled: Arc<AtomicBool>) -> Self {
        Self {
            consumers,
            enabled,
            frames_sent: 0,
        }
    }

    pub fn add_consumer(&mut self, consumer: Box<dyn OutputConsumer>) {
        log::info!("[OUTPUT] Added consumer '{}'", consumer.name());
        self.consumers.push(consumer);
    }

    /// Shared global enable flag
    pub fn enable_flag(&self) -> Arc<AtomicBool> {
        self.enabled.clone()
    }

    /// Run one output cycle; returns false if output was disabled at begin
    ///
    /// The enable flag is latched at the start of the cycle; a change made
    /// while the cycle runs applies to the next one.
    pub fn dispatch(&mut self, timestamp: Instant, routed: &RoutedFrame) -> bool {
        self.dispatch_with_matrix(timestamp, routed, None)
    }

    /// [`dispatch`](Self::dispatch), with the signal grid appended to the cycle
    pub fn dispatch_with_matrix(
        &mut self,
        timestamp: Instant,
        routed: &RoutedFrame,
        matrix: Option<&SensorFrame>,
    ) -> bool {
        if !self.enabled.load(Ordering::Acquire) {
            return false;
        }

        let mut active: Vec<&mut Box<dyn OutputConsumer>> =
            self.consumers.iter_mut().filter(|c| c.is_active()).collect();

        for consumer in active.iter_mut() {
            consumer.begin_frame(timestamp);
        }
        for touch in routed.touches() {
            for consumer in active.iter_mut() {
                consumer.send_touch(touch.slot, touch.offset, touch);
            }
        }
        for events in &routed.zones {
            if let Some(message) = &events.controller {
                for consumer in active.iter_mut() {
                    consumer.send_controller(events.zone, events.offset, message);
                }
            }
        }
        if let Some(matrix) = matrix {
            for consumer in active.iter_mut() {
                consumer.send_matrix(matrix);
            }
        }
        for consumer in active.iter_mut() {
            consumer.end_frame();
        }

        self.frames_sent += 1;
        true
    }

    /// Toggle a consumer by name; returns false if no consumer has that name
    pub fn set_consumer_active(&mut self, name: &str, active: bool) -> bool {
        let mut found = false;
        for consumer in self.consumers.iter_mut().filter(|c| c.name() == name) {
            if consumer.is_active() && !active {
                consumer.clear();
            }
            consumer.set_active(active);
            found = true;
        }
        if found {
            log::info!("[OUTPUT] '{}' {}", name, if active { "enabled" } else { "disabled" });
        }
        found
    }

    pub fn is_consumer_active(&self, name: &str) -> Option<bool> {
        self.consumers
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.is_active())
    }

    /// `(name, status)` of every consumer
    pub fn statuses(&self) -> Vec<(String, String)> {
        self.consumers
            .iter()
            .map(|c| (c.name().to_string(), c.status()))
            .collect()
    }

    pub fn set_data_rate(&mut self, rate: f32) {
        for consumer in &mut self.consumers {
            consumer.set_data_rate(rate);
        }
    }

    pub fn set_kyma_mode(&mut self, on: bool) {
        for consumer in &mut self.consumers {
            consumer.set_kyma_mode(on);
        }
    }

    pub fn do_infrequent_tasks(&mut self) {
        for consumer in &mut self.consumers {
            consumer.do_infrequent_tasks();
        }
    }

    /// Release all sounding notes on every consumer
    pub fn clear(&mut self) {
        for consumer in &mut self.consumers {
            consumer.clear();
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::touch::{Touch, TouchArray};
    use crate::zone::{ZoneLayout, ZoneRouter};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Event {
        Begin,
        Touch { index: usize, zone: usize, offset: i32 },
        Controller { zone: usize, name: String },
        Matrix { width: usize, height: usize },
        End,
    }

    /// Records every call into a shared log
    pub(crate) struct RecordingConsumer {
        pub name: String,
        pub active: bool,
        pub events: Arc<Mutex<Vec<Event>>>,
        /// Cleared from inside a cycle to check the latch
        pub disable_on_touch: Option<Arc<AtomicBool>>,
    }

    impl RecordingConsumer {
        pub(crate) fn new(name: &str) -> (Self, Arc<Mutex<Vec<Event>>>) {
            let events = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    name: name.to_string(),
                    active: true,
                    events: events.clone(),
                    disable_on_touch: None,
                },
                events,
            )
        }
    }

    impl OutputConsumer for RecordingConsumer {
        fn name(&self) -> &str {
            &self.name
        }
        fn begin_frame(&mut self, _timestamp: Instant) {
            self.events.lock().unwrap().push(Event::Begin);
        }
        fn send_touch(&mut self, index: usize, offset: i32, touch: &ZoneTouch) {
            if let Some(flag) = &self.disable_on_touch {
                flag.store(false, Ordering::Release);
            }
            self.events.lock().unwrap().push(Event::Touch {
                index,
                zone: touch.zone,
                offset,
            });
        }
        fn send_controller(&mut self, zone_id: usize, _offset: i32, message: &ZoneMessage) {
            self.events.lock().unwrap().push(Event::Controller {
                zone: zone_id,
                name: message.name.to_string(),
            });
        }
        fn send_matrix(&mut self, matrix: &SensorFrame) {
            self.events.lock().unwrap().push(Event::Matrix {
                width: matrix.width(),
                height: matrix.height(),
            });
        }
        fn end_frame(&mut self) {
            self.events.lock().unwrap().push(Event::End);
        }
        fn is_active(&self) -> bool {
            self.active
        }
        fn set_active(&mut self, active: bool) {
            self.active = active;
        }
        fn status(&self) -> String {
            format!("{} ok", self.name)
        }
    }

    fn routed(layout: &str, touches: &[(usize, f32, f32)]) -> RoutedFrame {
        let layout = ZoneLayout::from_json_str(layout, 30, 5).unwrap();
        let mut router = ZoneRouter::new(Arc::new(layout));
        router.route(&TouchArray::from_slots(
            touches.iter().map(|&(s, x, y)| (s, Touch::new(x, y, 0.5))),
        ))
    }

    const HALVES: &str = r#"{"zone": [
        {"type": "note_row", "name": "left", "rect": [0, 0, 15, 5], "offset": 0},
        {"type": "note_row", "name": "right", "rect": [15, 0, 15, 5], "offset": 1}
    ]}"#;

    #[test]
    fn test_two_zones_produce_two_touch_events() {
        let (consumer, events) = RecordingConsumer::new("osc");
        let mut dispatcher =
            OutputDispatcher::new(vec![Box::new(consumer)], Arc::new(AtomicBool::new(true)));

        assert!(dispatcher.dispatch(Instant::now(), &routed(HALVES, &[(0, 3.5, 1.5), (4, 22.5, 2.5)])));

        let events = events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                Event::Begin,
                Event::Touch { index: 0, zone: 0, offset: 0 },
                Event::Touch { index: 4, zone: 1, offset: 1 },
                Event::End,
            ]
        );
    }

    #[test]
    fn test_controllers_follow_touches() {
        let layout = r#"{"zone": [
            {"type": "note_row", "rect": [0, 0, 15, 5]},
            {"type": "z_controller", "name": "swell", "rect": [15, 0, 15, 5]}
        ]}"#;
        let (consumer, events) = RecordingConsumer::new("midi");
        let mut dispatcher =
            OutputDispatcher::new(vec![Box::new(consumer)], Arc::new(AtomicBool::new(true)));
        dispatcher.dispatch(Instant::now(), &routed(layout, &[(0, 20.5, 1.5), (1, 1.5, 1.5)]));

        let events = events.lock().unwrap().clone();
        assert_eq!(events.first(), Some(&Event::Begin));
        assert_eq!(events.last(), Some(&Event::End));
        let touch_pos = events.iter().position(|e| matches!(e, Event::Touch { .. })).unwrap();
        let ctrl_pos = events
            .iter()
            .position(|e| matches!(e, Event::Controller { .. }))
            .unwrap();
        assert!(touch_pos < ctrl_pos);
        assert_eq!(
            events[ctrl_pos],
            Event::Controller {
                zone: 1,
                name: "swell".into()
            }
        );
    }

    #[test]
    fn test_matrix_is_sent_before_end() {
        let (consumer, events) = RecordingConsumer::new("osc");
        let mut dispatcher =
            OutputDispatcher::new(vec![Box::new(consumer)], Arc::new(AtomicBool::new(true)));
        let frame = routed(HALVES, &[(0, 3.5, 1.5)]);

        dispatcher.dispatch_with_matrix(Instant::now(), &frame, Some(&SensorFrame::zeros(64, 8)));
        assert_eq!(
            events.lock().unwrap().clone(),
            vec![
                Event::Begin,
                Event::Touch { index: 0, zone: 0, offset: 0 },
                Event::Matrix { width: 64, height: 8 },
                Event::End,
            ]
        );

        events.lock().unwrap().clear();
        dispatcher.dispatch(Instant::now(), &frame);
        assert!(!events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, Event::Matrix { .. })));
    }

    #[test]
    fn test_enable_flag_is_latched_per_cycle() {
        let enabled = Arc::new(AtomicBool::new(true));
        let (mut consumer, events) = RecordingConsumer::new("osc");
        consumer.disable_on_touch = Some(enabled.clone());
        let mut dispatcher = OutputDispatcher::new(vec![Box::new(consumer)], enabled.clone());
        let frame = routed(HALVES, &[(0, 3.5, 1.5)]);

        // disabled mid-cycle: the cycle still completes
        assert!(dispatcher.dispatch(Instant::now(), &frame));
        assert_eq!(events.lock().unwrap().last(), Some(&Event::End));

        // and the next cycle is suppressed entirely
        let before = events.lock().unwrap().len();
        assert!(!dispatcher.dispatch(Instant::now(), &frame));
        assert_eq!(events.lock().unwrap().len(), before);
        assert_eq!(dispatcher.frames_sent(), 1);
    }

    #[test]
    fn test_inactive_consumer_is_skipped() {
        let (midi, midi_events) = RecordingConsumer::new("midi");
        let (osc, osc_events) = RecordingConsumer::new("osc");
        let mut dispatcher = OutputDispatcher::new(
            vec![Box::new(midi), Box::new(osc)],
            Arc::new(AtomicBool::new(true)),
        );
        assert!(dispatcher.set_consumer_active("midi", false));
        assert!(!dispatcher.set_consumer_active("dmx", false));
        assert_eq!(dispatcher.is_consumer_active("midi"), Some(false));

        dispatcher.dispatch(Instant::now(), &routed(HALVES, &[(0, 3.5, 1.5)]));
        assert!(midi_events.lock().unwrap().is_empty());
        assert_eq!(osc_events.lock().unwrap().len(), 3);
        assert_eq!(dispatcher.statuses()[1], ("osc".to_string(), "osc ok".to_string()));
    }
}
