//! MIDI output consumer
//!
//! Turns output cycles into MIDI:
//!
//! - a touch appearing in a note zone → note on (velocity from pressure)
//! - while held → pressure (channel pressure in MPE, poly pressure otherwise),
//!   y position on the configured CC, pitch bend for glide (MPE only)
//! - a touch gone at `end_frame` → note off
//! - controller zones → control changes, sent only when the value changes
//!
//! Messages of one cycle are queued between `begin_frame` and `end_frame`
//! and written to the sink together.

use std::collections::HashMap;
use std::time::Instant;

use soundplane_core::output::OutputConsumer;
use soundplane_core::zone::{ZoneMessage, ZoneTouch, ZoneType};
use soundplane_core::MAX_TOUCHES;

use crate::config::MidiOutputConfig;
use crate::connection::{MidiConnectionError, MidiSink};
use crate::message::{pitch_bend_value, rpn, unit_to_7bit, MidiEvent, PITCH_BEND_CENTER};
use crate::voice::VoiceAllocator;

/// RPN 0: pitch bend sensitivity
const RPN_PITCH_BEND_RANGE: u16 = 0;
/// RPN 6: MPE configuration message
const RPN_MPE_CONFIGURATION: u16 = 6;

/// A sounding note
#[derive(Debug, Clone, Copy, PartialEq)]
struct Voice {
    channel: u8,
    note: u8,
    pressure: u8,
    y: u8,
    bend: u16,
}

/// Remembers last-sent controller values to avoid redundant sends
#[derive(Debug, Default)]
struct ControllerChangeTracker {
    last_values: HashMap<(u8, u8), u8>,
}

impl ControllerChangeTracker {
    /// `Some(value)` if it changed (should send), `None` if unchanged
    fn update(&mut self, channel: u8, cc: u8, value: u8) -> Option<u8> {
        if self.last_values.get(&(channel, cc)) == Some(&value) {
            None
        } else {
            self.last_values.insert((channel, cc), value);
            Some(value)
        }
    }

    fn clear(&mut self) {
        self.last_values.clear();
    }
}

/// MIDI / MPE output consumer, registered under the name "midi"
pub struct MidiOutput {
    config: MidiOutputConfig,
    sink: Box<dyn MidiSink>,
    active: bool,
    voices: [Option<Voice>; MAX_TOUCHES],
    seen: [bool; MAX_TOUCHES],
    allocator: VoiceAllocator,
    controllers: ControllerChangeTracker,
    pending: Vec<MidiEvent>,
    /// Announce MPE zone and bend range before the next frame
    needs_configure: bool,
    messages_sent: u64,
    send_errors: u64,
    last_error: Option<MidiConnectionError>,
}

impl MidiOutput {
    pub fn new(config: MidiOutputConfig, sink: Box<dyn MidiSink>) -> Self {
        let config = config.sanitized();
        let allocator = VoiceAllocator::new(config.base_channel() + 1, config.voices);
        log::info!(
            "[MIDI OUT] {} output, base channel {}, {} voices",
            if config.mpe { "MPE" } else { "Single channel" },
            config.channel,
            config.voices
        );
        Self {
            needs_configure: config.mpe,
            config,
            sink,
            active: true,
            voices: [None; MAX_TOUCHES],
            seen: [false; MAX_TOUCHES],
            allocator,
            controllers: ControllerChangeTracker::default(),
            pending: Vec::new(),
            messages_sent: 0,
            send_errors: 0,
            last_error: None,
        }
    }

    pub fn config(&self) -> &MidiOutputConfig {
        &self.config
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    pub fn send_errors(&self) -> u64 {
        self.send_errors
    }

    /// Notes currently sounding
    pub fn active_voices(&self) -> usize {
        self.voices.iter().flatten().count()
    }

    fn queue_configuration(&mut self) {
        let master = self.config.base_channel();
        self.pending
            .extend(rpn(master, RPN_MPE_CONFIGURATION, self.config.voices));
        let range = self.config.pitch_bend_range;
        let members: Vec<u8> = self.allocator.channels().collect();
        for channel in members {
            self.pending.extend(rpn(channel, RPN_PITCH_BEND_RANGE, range));
        }
        log::debug!(
            "[MIDI OUT] MPE zone: master {}, {} members, bend range {}",
            master + 1,
            self.config.voices,
            range
        );
    }

    /// Channel for a new note in slot `index`
    fn voice_channel(&mut self, index: usize, zone_channel: u8) -> u8 {
        if !self.config.mpe {
            return match zone_channel {
                0 => self.config.base_channel(),
                c => c.min(16) - 1,
            };
        }
        let allocation = self.allocator.allocate(index);
        if let Some(stolen) = allocation.stolen {
            if let Some(voice) = self.voices.get_mut(stolen).and_then(Option::take) {
                self.pending.push(note_off(&voice));
            }
        }
        allocation.channel
    }

    fn pressure_event(&self, voice: &Voice) -> MidiEvent {
        if self.config.mpe {
            MidiEvent::ChannelPressure {
                channel: voice.channel,
                value: voice.pressure,
            }
        } else {
            MidiEvent::PolyPressure {
                channel: voice.channel,
                note: voice.note,
                value: voice.pressure,
            }
        }
    }

    fn release(&mut self, index: usize) {
        if let Some(voice) = self.voices.get_mut(index).and_then(Option::take) {
            self.pending.push(note_off(&voice));
        }
        if self.config.mpe {
            self.allocator.release(index);
        }
    }

    fn flush(&mut self) {
        let mut bytes = Vec::with_capacity(3);
        for event in std::mem::take(&mut self.pending) {
            bytes.clear();
            event.encode(&mut bytes);
            match self.sink.send(&bytes) {
                Ok(()) => {
                    self.messages_sent += 1;
                    self.last_error = None;
                }
                Err(e) => {
                    self.send_errors += 1;
                    if self.last_error.is_none() {
                        log::warn!("[MIDI OUT] {}", e);
                    }
                    self.last_error = Some(e);
                }
            }
        }
    }
}

fn note_off(voice: &Voice) -> MidiEvent {
    MidiEvent::NoteOff {
        channel: voice.channel,
        note: voice.note,
        velocity: 0,
    }
}

impl OutputConsumer for MidiOutput {
    fn name(&self) -> &str {
        "midi"
    }

    fn begin_frame(&mut self, _timestamp: Instant) {
        self.seen = [false; MAX_TOUCHES];
        if self.needs_configure {
            self.needs_configure = false;
            self.queue_configuration();
        }
    }

    fn send_touch(&mut self, index: usize, _offset: i32, touch: &ZoneTouch) {
        if index >= MAX_TOUCHES {
            return;
        }
        self.seen[index] = true;

        let note = touch.key_note.clamp(0, 127) as u8;
        let pressure = unit_to_7bit(touch.touch.z);
        let y = unit_to_7bit(touch.touch.y - touch.touch.ky as f32);

        let held = self.voices[index];
        let glide = self.config.mpe && self.config.glide;
        let retrigger = held.is_some_and(|v| v.note != note && !glide);
        if retrigger {
            self.release(index);
        }

        match self.voices[index] {
            Some(mut voice) => {
                let bend = if glide {
                    pitch_bend_value(touch.note - voice.note as f32, self.config.pitch_bend_range)
                } else {
                    PITCH_BEND_CENTER
                };
                if bend != voice.bend {
                    voice.bend = bend;
                    self.pending.push(MidiEvent::PitchBend {
                        channel: voice.channel,
                        value: bend,
                    });
                }
                if y != voice.y {
                    voice.y = y;
                    self.pending.push(MidiEvent::ControlChange {
                        channel: voice.channel,
                        cc: self.config.y_cc,
                        value: y,
                    });
                }
                if pressure != voice.pressure {
                    voice.pressure = pressure;
                    let event = self.pressure_event(&voice);
                    self.pending.push(event);
                }
                self.voices[index] = Some(voice);
            }
            None => {
                let channel = self.voice_channel(index, touch.channel);
                let bend = if glide {
                    pitch_bend_value(touch.note - note as f32, self.config.pitch_bend_range)
                } else {
                    PITCH_BEND_CENTER
                };
                let voice = Voice {
                    channel,
                    note,
                    pressure,
                    y,
                    bend,
                };
                // per-note expression is set up before the note sounds
                if self.config.mpe {
                    self.pending.push(MidiEvent::PitchBend {
                        channel,
                        value: bend,
                    });
                }
                self.pending.push(MidiEvent::ControlChange {
                    channel,
                    cc: self.config.y_cc,
                    value: y,
                });
                self.pending.push(MidiEvent::NoteOn {
                    channel,
                    note,
                    velocity: pressure.max(1),
                });
                let event = self.pressure_event(&voice);
                self.pending.push(event);
                self.voices[index] = Some(voice);
            }
        }
    }

    fn send_controller(&mut self, _zone_id: usize, _offset: i32, message: &ZoneMessage) {
        let channel = match message.channel {
            0 => self.config.base_channel(),
            c => c.min(16) - 1,
        };
        let [c1, c2, c3] = message.controllers;
        let mut values: Vec<(u8, f32)> = match message.zone_type {
            ZoneType::NoteRow => Vec::new(),
            ZoneType::XController => vec![(c1, message.x)],
            ZoneType::YController => vec![(c1, message.y)],
            ZoneType::XyController => vec![(c1, message.x), (c2, message.y)],
            ZoneType::ZController => vec![(c1, message.z)],
            ZoneType::Toggle => {
                let on = message.toggle.unwrap_or(false);
                vec![(c1, if on { 1.0 } else { 0.0 })]
            }
        };
        // optional pressure controller for position zones
        if matches!(
            message.zone_type,
            ZoneType::XController | ZoneType::YController | ZoneType::XyController
        ) && c3 != 0
        {
            values.push((c3, message.z));
        }

        for (cc, value) in values {
            let cc = cc & 0x7F;
            if let Some(value) = self.controllers.update(channel, cc, unit_to_7bit(value)) {
                self.pending
                    .push(MidiEvent::ControlChange { channel, cc, value });
            }
        }
    }

    fn end_frame(&mut self) {
        for index in 0..MAX_TOUCHES {
            if !self.seen[index] && self.voices[index].is_some() {
                self.release(index);
            }
        }
        self.flush();
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        if active && !self.active {
            self.needs_configure = self.config.mpe;
        }
        self.active = active;
    }

    fn status(&self) -> String {
        if !self.active {
            return "inactive".to_string();
        }
        if let Some(e) = &self.last_error {
            return format!("error: {}", e);
        }
        match self.sink.port_name() {
            Some(port) => format!(
                "{} on {}",
                if self.config.mpe { "MPE" } else { "MIDI" },
                port
            ),
            None => "not connected".to_string(),
        }
    }

    fn do_infrequent_tasks(&mut self) {
        if self.last_error.is_none() {
            return;
        }
        match self.sink.reconnect() {
            Ok(()) => {
                log::info!("[MIDI OUT] Reconnected");
                self.last_error = None;
                self.needs_configure = self.config.mpe;
            }
            Err(e) => log::debug!("[MIDI OUT] Reconnect failed: {}", e),
        }
    }

    fn clear(&mut self) {
        for index in 0..MAX_TOUCHES {
            self.release(index);
        }
        self.allocator.clear();
        self.controllers.clear();
        self.flush();
    }
}
