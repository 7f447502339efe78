//! YAML settings files
//!
//! Loading never fails: a missing file means first start, a broken one is
//! reported and replaced by defaults so the surface still comes up.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Read and parse a settings file
pub fn read_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {:?}", path))?;
    serde_yaml::from_str(&contents).with_context(|| format!("Invalid settings in {:?}", path))
}

/// Load settings, falling back to defaults when the file is missing or bad
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("[CONFIG] No settings at {:?}, using defaults", path);
        return T::default();
    }

    match read_config(path) {
        Ok(config) => {
            log::info!("[CONFIG] Loaded settings from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("[CONFIG] {:#}; using defaults", e);
            T::default()
        }
    }
}

/// Write settings as YAML, creating missing parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create settings directory {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to encode settings as YAML")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write settings file {:?}", path))?;

    log::info!("[CONFIG] Saved settings to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoundplaneConfig;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: SoundplaneConfig = load_config(Path::new("/nonexistent/path/soundplane.yaml"));
        assert_eq!(config, SoundplaneConfig::default());
    }

    #[test]
    fn test_read_config_reports_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "surface: 12").unwrap();

        let err = read_config::<SoundplaneConfig>(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.yaml"));
        assert!(read_config::<SoundplaneConfig>(&dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_invalid_yaml_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "touch: [this is not a map").unwrap();

        let config: SoundplaneConfig = load_config(&path);
        assert_eq!(config, SoundplaneConfig::default());
    }

    #[test]
    fn test_roundtrip_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("soundplane.yaml");

        let mut config = SoundplaneConfig::default();
        config.touch.z_scale = 2.5;
        config.output.data_rate = 250.0;
        config.carriers.override_carriers = Some(vec![0; 32]);

        save_config(&config, &path).unwrap();
        let loaded: SoundplaneConfig = load_config(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.yaml");
        std::fs::write(&path, "touch:\n  hysteresis: 0.4\n").unwrap();

        let config: SoundplaneConfig = load_config(&path);
        assert_eq!(config.touch.hysteresis, 0.4);
        assert_eq!(config.surface, SoundplaneConfig::default().surface);
    }
}
