//! Path utilities for Soundplane configuration files

use std::path::PathBuf;

/// Get the default configuration directory
///
/// Returns: `<platform config dir>/soundplane` (e.g. `~/.config/soundplane`)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("soundplane")
}

/// Get the default config file path for a given file name
///
/// Returns: `<config dir>/soundplane/{filename}`
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}

/// Get the default directory holding a preset collection (e.g. "zones", "touch")
pub fn default_presets_dir(collection: &str) -> PathBuf {
    default_config_dir().join("presets").join(collection)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_ends_with_soundplane() {
        assert!(default_config_dir().ends_with("soundplane"));
    }

    #[test]
    fn test_config_path_includes_filename() {
        let path = default_config_path("test.yaml");
        assert!(path.ends_with("test.yaml"));
    }

    #[test]
    fn test_presets_dir_is_under_config_dir() {
        let path = default_presets_dir("zones");
        assert!(path.ends_with("presets/zones"));
        assert!(path.starts_with(default_config_dir()));
    }
}
