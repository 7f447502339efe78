//! MIDI output port connection
//!
//! [`MidiSink`] is what the output consumer writes to. With the
//! `midir-backend` feature, [`MidirSink`] connects to a system port through
//! midir (ALSA on Linux, CoreMIDI on macOS, WinMM on Windows).

use std::sync::{Arc, Mutex};

/// Error type for MIDI connection operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MidiConnectionError {
    #[error("Failed to initialize MIDI output: {0}")]
    OutputInitError(String),

    #[error("No MIDI port found matching pattern: {0}")]
    PortNotFound(String),

    #[error("Failed to connect to MIDI port: {0}")]
    ConnectionError(String),

    #[error("Failed to send MIDI message: {0}")]
    SendError(String),

    #[error("MIDI output not connected")]
    NotConnected,
}

/// Destination for encoded MIDI messages
pub trait MidiSink: Send {
    /// Send one complete message
    fn send(&mut self, message: &[u8]) -> Result<(), MidiConnectionError>;

    /// Name of the connected port, if any
    fn port_name(&self) -> Option<String>;

    /// Try to (re)establish the connection; called from infrequent tasks
    fn reconnect(&mut self) -> Result<(), MidiConnectionError> {
        Ok(())
    }
}

/// Sink keeping every message in memory
///
/// Clones share the same buffer, so a test can keep one and hand the other
/// to the output.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    messages: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far
    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn take(&self) -> Vec<Vec<u8>> {
        self.messages
            .lock()
            .map(|mut m| std::mem::take(&mut *m))
            .unwrap_or_default()
    }
}

impl MidiSink for MemorySink {
    fn send(&mut self, message: &[u8]) -> Result<(), MidiConnectionError> {
        self.messages
            .lock()
            .map_err(|e| MidiConnectionError::SendError(e.to_string()))?
            .push(message.to_vec());
        Ok(())
    }

    fn port_name(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

#[cfg(feature = "midir-backend")]
pub use self::port::{list_output_ports, MidirSink};

#[cfg(feature = "midir-backend")]
mod port {
    use super::{MidiConnectionError, MidiSink};
    use midir::{MidiOutput, MidiOutputConnection};

    /// Output port found by case-insensitive substring match
    pub struct MidirSink {
        port_match: String,
        connection: Option<MidiOutputConnection>,
        port_name: Option<String>,
    }

    impl MidirSink {
        /// Connect to the first output port whose name contains `port_match`
        pub fn connect(port_match: &str) -> Result<Self, MidiConnectionError> {
            let mut sink = Self {
                port_match: port_match.to_string(),
                connection: None,
                port_name: None,
            };
            sink.reconnect()?;
            Ok(sink)
        }

        /// Create without connecting; `reconnect` retries later
        pub fn disconnected(port_match: &str) -> Self {
            Self {
                port_match: port_match.to_string(),
                connection: None,
                port_name: None,
            }
        }
    }

    impl MidiSink for MidirSink {
        fn send(&mut self, message: &[u8]) -> Result<(), MidiConnectionError> {
            let connection = self
                .connection
                .as_mut()
                .ok_or(MidiConnectionError::NotConnected)?;
            connection
                .send(message)
                .map_err(|e| MidiConnectionError::SendError(e.to_string()))
        }

        fn port_name(&self) -> Option<String> {
            self.port_name.clone()
        }

        fn reconnect(&mut self) -> Result<(), MidiConnectionError> {
            if self.connection.is_some() {
                return Ok(());
            }
            let pattern = self.port_match.to_lowercase();

            let midi_out = MidiOutput::new("soundplane-midi-out")
                .map_err(|e| MidiConnectionError::OutputInitError(e.to_string()))?;

            let port = midi_out
                .ports()
                .into_iter()
                .find(|port| {
                    midi_out
                        .port_name(port)
                        .map(|name| name.to_lowercase().contains(&pattern))
                        .unwrap_or(false)
                })
                .ok_or_else(|| MidiConnectionError::PortNotFound(self.port_match.clone()))?;

            let name = midi_out.port_name(&port).unwrap_or_default();
            let connection = midi_out
                .connect(&port, "soundplane-midi-output")
                .map_err(|e| MidiConnectionError::ConnectionError(e.to_string()))?;

            log::info!("[MIDI OUT] Connected to output port: {}", name);
            self.connection = Some(connection);
            self.port_name = Some(name);
            Ok(())
        }
    }

    /// List all available MIDI output ports
    pub fn list_output_ports() -> Result<Vec<String>, MidiConnectionError> {
        let midi_out = MidiOutput::new("soundplane-midi-list")
            .map_err(|e| MidiConnectionError::OutputInitError(e.to_string()))?;

        Ok(midi_out
            .ports()
            .iter()
            .filter_map(|port| midi_out.port_name(port).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_shares_buffer() {
        let sink = MemorySink::new();
        let mut writer: Box<dyn MidiSink> = Box::new(sink.clone());
        writer.send(&[0x90, 60, 100]).unwrap();
        writer.send(&[0x80, 60, 0]).unwrap();
        assert_eq!(sink.messages().len(), 2);
        assert_eq!(sink.take(), vec![vec![0x90, 60, 100], vec![0x80, 60, 0]]);
        assert!(sink.messages().is_empty());
    }

    #[cfg(feature = "midir-backend")]
    #[test]
    fn test_list_ports() {
        // Port availability depends on the system; only check enumeration
        let _ = list_output_ports();
    }
}
