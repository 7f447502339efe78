//! MIDI output configuration
//!
//! Stored as YAML next to the pipeline config (`~/.config/soundplane/midi.yaml`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Highest MIDI channel
pub const MAX_CHANNEL: u8 = 16;

/// MIDI output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiOutputConfig {
    /// Case-insensitive substring of the output port name
    pub port_match: String,
    /// MPE: one member channel per voice, per-note pitch bend and pressure
    pub mpe: bool,
    /// Base channel (1-16). In MPE mode this is the master channel and the
    /// member channels follow it.
    pub channel: u8,
    /// Member channels used for voices in MPE mode
    pub voices: u8,
    /// Pitch bend range in semitones announced to the receiver
    pub pitch_bend_range: u8,
    /// Controller carrying the touch's y position
    pub y_cc: u8,
    /// Send per-note pitch bend for horizontal movement
    pub glide: bool,
}

impl Default for MidiOutputConfig {
    fn default() -> Self {
        Self {
            port_match: String::new(),
            mpe: true,
            channel: 1,
            voices: 8,
            pitch_bend_range: 48,
            y_cc: 74,
            glide: true,
        }
    }
}

impl MidiOutputConfig {
    /// Clamp everything into ranges the encoder can express
    pub fn sanitized(mut self) -> Self {
        self.channel = self.channel.clamp(1, MAX_CHANNEL);
        let max_voices = if self.mpe { MAX_CHANNEL - self.channel } else { MAX_CHANNEL };
        self.voices = self.voices.clamp(1, max_voices.max(1));
        self.pitch_bend_range = self.pitch_bend_range.clamp(1, 96);
        self.y_cc = self.y_cc.min(127);
        self
    }

    /// Zero-based channel of the base / master channel
    pub fn base_channel(&self) -> u8 {
        self.channel.clamp(1, MAX_CHANNEL) - 1
    }
}

/// Get the default MIDI config path
///
/// Returns: `<config dir>/soundplane/midi.yaml`
pub fn default_midi_config_path() -> PathBuf {
    soundplane_core::config::default_config_path("midi.yaml")
}

/// Load MIDI output configuration from a YAML file
///
/// Missing or invalid files give the defaults.
pub fn load_midi_config(path: &Path) -> MidiOutputConfig {
    log::info!("load_midi_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_midi_config: Config file doesn't exist, using defaults");
        return MidiOutputConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<MidiOutputConfig>(&contents) {
            Ok(config) => {
                let config = config.sanitized();
                log::info!(
                    "load_midi_config: port_match '{}', {} on channel {}",
                    config.port_match,
                    if config.mpe { "MPE" } else { "single channel" },
                    config.channel
                );
                config
            }
            Err(e) => {
                log::warn!("load_midi_config: Failed to parse config: {}", e);
                MidiOutputConfig::default()
            }
        },
        Err(e) => {
            log::warn!("load_midi_config: Failed to read config file: {}", e);
            MidiOutputConfig::default()
        }
    }
}

/// Save MIDI output configuration to a YAML file
///
/// Creates parent directories if they don't exist.
pub fn save_midi_config(config: &MidiOutputConfig, path: &Path) -> anyhow::Result<()> {
    use anyhow::Context;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize MIDI config to YAML")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write MIDI config file: {:?}", path))?;

    log::info!("save_midi_config: Saved to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_limits_mpe_voices() {
        let config = MidiOutputConfig {
            channel: 12,
            voices: 15,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(config.voices, 4);
        assert_eq!(config.base_channel(), 11);

        let config = MidiOutputConfig {
            channel: 0,
            mpe: false,
            voices: 40,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(config.channel, 1);
        assert_eq!(config.voices, 16);
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("midi.yaml");
        let config = MidiOutputConfig {
            port_match: "IAC".to_string(),
            mpe: false,
            ..Default::default()
        };
        save_midi_config(&config, &path).unwrap();
        assert_eq!(load_midi_config(&path), config);
    }

    #[test]
    fn test_missing_or_invalid_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("midi.yaml");
        assert_eq!(load_midi_config(&path), MidiOutputConfig::default());

        std::fs::write(&path, "mpe: [not, a, bool").unwrap();
        assert_eq!(load_midi_config(&path), MidiOutputConfig::default());
    }
}
