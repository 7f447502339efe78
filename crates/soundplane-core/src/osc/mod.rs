//! OSC-style network control and output
//!
//! Packets are plain values; byte encoding and sockets belong to whatever
//! [`OscSink`] the application plugs in.

mod control;
mod output;

pub use control::{parse_control, ControlRequest, Query};
pub use output::{OscOutput, DEFAULT_RECEIVE_PORT};

use thiserror::Error;

/// One OSC argument
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Str(String),
}

impl OscArg {
    /// Numeric value of an int or float argument
    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            OscArg::Int(i) => Some(i as f32),
            OscArg::Float(f) => Some(f),
            OscArg::Str(_) => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            OscArg::Int(i) => Some(i),
            OscArg::Float(f) => Some(f as i32),
            OscArg::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscArg::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i32> for OscArg {
    fn from(v: i32) -> Self {
        OscArg::Int(v)
    }
}

impl From<f32> for OscArg {
    fn from(v: f32) -> Self {
        OscArg::Float(v)
    }
}

impl From<&str> for OscArg {
    fn from(v: &str) -> Self {
        OscArg::Str(v.to_string())
    }
}

impl From<String> for OscArg {
    fn from(v: String) -> Self {
        OscArg::Str(v)
    }
}

/// Addressed message
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    pub fn arg(&self, index: usize) -> Option<&OscArg> {
        self.args.get(index)
    }
}

/// Messages delivered together
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OscBundle {
    /// Nanoseconds since the output started (0 = immediately)
    pub time_tag: u64,
    pub content: Vec<OscPacket>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OscPacket {
    Message(OscMessage),
    Bundle(OscBundle),
}

impl OscPacket {
    /// All messages, flattening nested bundles
    pub fn messages(&self) -> Vec<&OscMessage> {
        match self {
            OscPacket::Message(m) => vec![m],
            OscPacket::Bundle(b) => b.content.iter().flat_map(|p| p.messages()).collect(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OscError {
    #[error("OSC send failed: {0}")]
    Send(String),

    #[error("Unknown OSC address: {0}")]
    UnknownAddress(String),

    #[error("Bad arguments for {0}")]
    BadArguments(String),
}

/// Destination for outgoing packets (a UDP socket in a real deployment)
pub trait OscSink: Send {
    fn send(&mut self, packet: OscPacket) -> Result<(), OscError>;
}

/// Receiver of inbound control messages
///
/// Replies to queries are written to `reply`.
pub trait OscListener {
    fn process_message(&self, message: &OscMessage, reply: &mut dyn OscSink);

    fn process_bundle(&self, bundle: &OscBundle, reply: &mut dyn OscSink) {
        for packet in &bundle.content {
            match packet {
                OscPacket::Message(m) => self.process_message(m, reply),
                OscPacket::Bundle(b) => self.process_bundle(b, reply),
            }
        }
    }
}

/// Sink that keeps every packet; handy for replies and tests
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub packets: Vec<OscPacket>,
}

impl OscSink for CollectingSink {
    fn send(&mut self, packet: OscPacket) -> Result<(), OscError> {
        self.packets.push(packet);
        Ok(())
    }
}

impl CollectingSink {
    pub fn messages(&self) -> Vec<&OscMessage> {
        self.packets.iter().flat_map(|p| p.messages()).collect()
    }
}
