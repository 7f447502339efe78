//! OSC output consumer
//!
//! Each output cycle becomes one bundle:
//!
//! ```text
//! /t3d/frm  frame, time      begin marker
//! /t3d/tch{n} x y z note     one per touch, n = slot + 1
//! /t3d/con  name x y z       one per controller zone
//! /t3d/matrix w h v...       signal grid, row-major (matrix output only)
//! /t3d/end                   end marker
//! ```
//!
//! In Kyma mode the infrequent tasks also send `/osc/respond_to port` so a
//! Kyma host knows where to answer.

use std::time::Instant;

use super::{OscArg, OscBundle, OscMessage, OscPacket, OscSink};
use crate::output::OutputConsumer;
use crate::types::SensorFrame;
use crate::zone::{ZoneMessage, ZoneTouch};

const ADDR_FRAME: &str = "/t3d/frm";
const ADDR_TOUCH: &str = "/t3d/tch";
const ADDR_CONTROLLER: &str = "/t3d/con";
const ADDR_END: &str = "/t3d/end";
const ADDR_DATA_RATE: &str = "/t3d/dr";
const ADDR_MATRIX: &str = "/t3d/matrix";
const ADDR_KYMA_RESPOND_TO: &str = "/osc/respond_to";

/// Port control messages are received on, announced in Kyma mode
pub const DEFAULT_RECEIVE_PORT: u16 = 3122;

pub struct OscOutput {
    sink: Box<dyn OscSink>,
    active: bool,
    started: Instant,
    bundle: Option<OscBundle>,
    frame: u32,
    data_rate: f32,
    kyma_mode: bool,
    receive_port: u16,
    send_errors: u64,
    last_error: Option<String>,
}

impl OscOutput {
    pub fn new(sink: Box<dyn OscSink>) -> Self {
        Self {
            sink,
            active: true,
            started: Instant::now(),
            bundle: None,
            frame: 0,
            data_rate: 0.0,
            kyma_mode: false,
            receive_port: DEFAULT_RECEIVE_PORT,
            send_errors: 0,
            last_error: None,
        }
    }

    pub fn with_receive_port(mut self, port: u16) -> Self {
        self.receive_port = port;
        self
    }

    fn push(&mut self, message: OscMessage) {
        if let Some(bundle) = self.bundle.as_mut() {
            bundle.content.push(OscPacket::Message(message));
        }
    }

    fn send(&mut self, packet: OscPacket) {
        if let Err(e) = self.sink.send(packet) {
            self.send_errors += 1;
            if self.last_error.is_none() {
                log::warn!("[OSC] {}", e);
            }
            self.last_error = Some(e.to_string());
        } else {
            self.last_error = None;
        }
    }

    pub fn send_errors(&self) -> u64 {
        self.send_errors
    }
}

impl OutputConsumer for OscOutput {
    fn name(&self) -> &str {
        "osc"
    }

    fn begin_frame(&mut self, timestamp: Instant) {
        let time_tag = timestamp.saturating_duration_since(self.started).as_nanos() as u64;
        self.frame = self.frame.wrapping_add(1);
        self.bundle = Some(OscBundle {
            time_tag,
            content: Vec::new(),
        });
        let time = (time_tag / 1_000_000) as i32;
        self.push(OscMessage::new(
            ADDR_FRAME,
            vec![OscArg::Int(self.frame as i32), OscArg::Int(time)],
        ));
    }

    fn send_touch(&mut self, index: usize, offset: i32, touch: &ZoneTouch) {
        self.push(OscMessage::new(
            format!("{}{}", ADDR_TOUCH, index + 1),
            vec![
                touch.touch.x.into(),
                touch.touch.y.into(),
                touch.touch.z.into(),
                touch.note.into(),
                offset.into(),
            ],
        ));
    }

    fn send_controller(&mut self, _zone_id: usize, _offset: i32, message: &ZoneMessage) {
        let z = match message.toggle {
            Some(on) => {
                if on {
                    1.0
                } else {
                    0.0
                }
            }
            None => message.z,
        };
        self.push(OscMessage::new(
            ADDR_CONTROLLER,
            vec![
                OscArg::Str(message.name.to_string()),
                message.x.into(),
                message.y.into(),
                z.into(),
            ],
        ));
    }

    fn send_matrix(&mut self, matrix: &SensorFrame) {
        let mut args = Vec::with_capacity(matrix.width() * matrix.height() + 2);
        args.push(OscArg::Int(matrix.width() as i32));
        args.push(OscArg::Int(matrix.height() as i32));
        args.extend(matrix.as_array().iter().map(|&v| OscArg::Float(v)));
        self.push(OscMessage::new(ADDR_MATRIX, args));
    }

    fn end_frame(&mut self) {
        self.push(OscMessage::new(ADDR_END, vec![]));
        if let Some(bundle) = self.bundle.take() {
            self.send(OscPacket::Bundle(bundle));
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
        self.bundle = None;
    }

    fn status(&self) -> String {
        match &self.last_error {
            Some(e) => format!("OSC error: {}", e),
            None if self.kyma_mode => format!("OSC to Kyma, frame {}", self.frame),
            None => format!("OSC sending, frame {}", self.frame),
        }
    }

    fn do_infrequent_tasks(&mut self) {
        if self.active {
            let message = OscMessage::new(ADDR_DATA_RATE, vec![self.data_rate.into()]);
            self.send(OscPacket::Message(message));
            if self.kyma_mode {
                let message = OscMessage::new(
                    ADDR_KYMA_RESPOND_TO,
                    vec![OscArg::Int(i32::from(self.receive_port))],
                );
                self.send(OscPacket::Message(message));
            }
        }
    }

    fn set_kyma_mode(&mut self, on: bool) {
        self.kyma_mode = on;
    }

    fn set_data_rate(&mut self, rate: f32) {
        self.data_rate = rate;
    }
}
