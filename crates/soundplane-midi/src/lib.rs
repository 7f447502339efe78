//! MIDI / MPE output for the Soundplane pipeline
//!
//! Plugs into the core dispatcher as an [`OutputConsumer`] named "midi":
//!
//! ```text
//! OutputDispatcher ──► MidiOutput ──► VoiceAllocator (MPE member channels)
//!                          │
//!                          └──► MidiSink ──► MidirSink (system port, `midir-backend`)
//!                                       └──► MemorySink (tests, capture)
//! ```
//!
//! [`OutputConsumer`]: soundplane_core::OutputConsumer

mod config;
mod connection;
mod message;
mod output;
mod voice;

pub use config::{
    default_midi_config_path, load_midi_config, save_midi_config, MidiOutputConfig, MAX_CHANNEL,
};
#[cfg(feature = "midir-backend")]
pub use connection::{list_output_ports, MidirSink};
pub use connection::{MemorySink, MidiConnectionError, MidiSink};
pub use message::{pitch_bend_value, rpn, unit_to_7bit, MidiEvent, PITCH_BEND_CENTER};
pub use output::MidiOutput;
pub use voice::{Allocation, VoiceAllocator};
