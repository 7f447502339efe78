//! Zone and touch preset collections
//!
//! A catalog only enumerates names and returns a preset's JSON text; parsing
//! and validation happen in the model so a bad preset can be rejected before
//! anything changes.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde_json::json;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("Preset not found: {0}")]
    NotFound(String),

    #[error("Failed to read preset '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Named preset collection
pub trait PresetCatalog: Send + Sync {
    /// Preset names, sorted
    fn names(&self) -> Vec<String>;

    /// JSON text of a preset
    fn load(&self, name: &str) -> Result<String, PresetError>;
}

/// `*.json` files under a directory; a preset's name is its path relative to
/// the root without the extension (`"rows/fourths"`)
#[derive(Debug, Clone)]
pub struct DirectoryPresets {
    root: PathBuf,
}

impl DirectoryPresets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn preset_name(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?.with_extension("");
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

impl PresetCatalog for DirectoryPresets {
    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("json"))
                    .unwrap_or(false)
            })
            .filter_map(|e| self.preset_name(e.path()))
            .collect();
        names.sort();
        names
    }

    fn load(&self, name: &str) -> Result<String, PresetError> {
        // names are relative paths below the root, nothing else
        let relative = Path::new(name);
        if name.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(PresetError::NotFound(name.to_string()));
        }
        let path = self.root.join(format!("{}.json", name));
        if !path.is_file() {
            return Err(PresetError::NotFound(name.to_string()));
        }
        fs::read_to_string(&path).map_err(|source| PresetError::Io {
            name: name.to_string(),
            source,
        })
    }
}

/// Presets held in memory (built-ins and tests)
#[derive(Debug, Clone, Default)]
pub struct MemoryPresets {
    presets: BTreeMap<String, String>,
}

impl MemoryPresets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, json: impl Into<String>) -> Self {
        self.insert(name, json);
        self
    }

    pub fn insert(&mut self, name: &str, json: impl Into<String>) {
        self.presets.insert(name.to_string(), json.into());
    }
}

impl PresetCatalog for MemoryPresets {
    fn names(&self) -> Vec<String> {
        self.presets.keys().cloned().collect()
    }

    fn load(&self, name: &str) -> Result<String, PresetError> {
        self.presets
            .get(name)
            .cloned()
            .ok_or_else(|| PresetError::NotFound(name.to_string()))
    }
}

/// Several catalogs searched in order; the first one holding a name wins
#[derive(Default)]
pub struct LayeredPresets {
    layers: Vec<Box<dyn PresetCatalog>>,
}

impl LayeredPresets {
    pub fn new(layers: Vec<Box<dyn PresetCatalog>>) -> Self {
        Self { layers }
    }
}

impl PresetCatalog for LayeredPresets {
    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.layers.iter().flat_map(|l| l.names()).collect();
        names.sort();
        names.dedup();
        names
    }

    fn load(&self, name: &str) -> Result<String, PresetError> {
        for layer in &self.layers {
            match layer.load(name) {
                Err(PresetError::NotFound(_)) => continue,
                other => return other,
            }
        }
        Err(PresetError::NotFound(name.to_string()))
    }
}

/// Zone layouts that ship with the surface, sized to the key grid
///
/// - `chromatic`: one note zone over the whole surface, rows a fourth apart
/// - `rows`: one note zone per row
/// - `rows_and_controllers`: note rows above a bottom row split into an x
///   controller and a toggle
pub fn builtin_zone_presets(key_width: usize, key_height: usize) -> MemoryPresets {
    let w = key_width as i32;
    let h = key_height as i32;

    let chromatic = json!({"zone": [
        {"type": "note_row", "name": "chromatic", "rect": [0, 0, w, h], "note": 40, "row_interval": 5}
    ]});

    let rows: Vec<_> = (0..h)
        .map(|row| {
            json!({"type": "note_row", "name": format!("row{}", row + 1),
                   "rect": [0, row, w, 1], "note": 40 + row * 5, "offset": row})
        })
        .collect();

    let mut with_controllers: Vec<_> = (0..(h - 1).max(0))
        .map(|row| {
            json!({"type": "note_row", "name": format!("row{}", row + 1),
                   "rect": [0, row, w, 1], "note": 40 + row * 5})
        })
        .collect();
    let half = w / 2;
    with_controllers.push(json!({"type": "x_controller", "name": "slider",
        "rect": [0, h - 1, half, 1], "ctrl1": 1}));
    with_controllers.push(json!({"type": "toggle", "name": "hold",
        "rect": [half, h - 1, w - half, 1], "ctrl1": 64}));

    MemoryPresets::new()
        .with("chromatic", chromatic.to_string())
        .with("rows", json!({ "zone": rows }).to_string())
        .with(
            "rows_and_controllers",
            json!({ "zone": with_controllers }).to_string(),
        )
}

/// Touch presets that ship with the surface: property trees for the tracker
/// and pressure curve
pub fn builtin_touch_presets() -> MemoryPresets {
    MemoryPresets::new()
        .with(
            "default",
            json!({"z_scale": 1.0, "z_curve": 0.25, "hysteresis": 0.3, "lopass": 0.5}).to_string(),
        )
        .with(
            "light",
            json!({"z_scale": 1.6, "z_curve": 0.1, "hysteresis": 0.3, "lopass": 0.6}).to_string(),
        )
        .with(
            "steady",
            json!({"z_scale": 1.0, "z_curve": 0.4, "hysteresis": 0.5, "lopass": 0.3}).to_string(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::ZoneLayout;
    use tempfile::TempDir;

    #[test]
    fn test_directory_presets_enumerate_json_recursively() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("fourths.json"), r#"{"zone": []}"#).unwrap();
        fs::create_dir_all(dir.path().join("split")).unwrap();
        fs::write(dir.path().join("split/pads.json"), r#"{"zone": []}"#).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let catalog = DirectoryPresets::new(dir.path());
        assert_eq!(catalog.names(), vec!["fourths", "split/pads"]);
        assert_eq!(catalog.load("fourths").unwrap(), r#"{"zone": []}"#);
        assert!(matches!(catalog.load("missing"), Err(PresetError::NotFound(_))));
        assert!(matches!(catalog.load("../etc"), Err(PresetError::NotFound(_))));
    }

    #[test]
    fn test_names_cannot_leave_the_root() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.json"), r#"{"outside": true}"#).unwrap();
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("split")).unwrap();
        fs::write(root.path().join("split/pads.json"), r#"{"zone": []}"#).unwrap();

        let catalog = DirectoryPresets::new(root.path());
        let absolute = outside.path().join("secret");
        let absolute = absolute.to_string_lossy();
        assert!(matches!(catalog.load(&absolute), Err(PresetError::NotFound(_))));
        assert!(matches!(catalog.load("split/../split/pads"), Err(PresetError::NotFound(_))));
        assert!(matches!(catalog.load("./split/pads"), Err(PresetError::NotFound(_))));
        assert!(matches!(catalog.load(""), Err(PresetError::NotFound(_))));
        assert!(catalog.load("split/pads").is_ok());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let catalog = DirectoryPresets::new("/nonexistent/soundplane/presets");
        assert!(catalog.names().is_empty());
    }

    #[test]
    fn test_layers_search_in_order() {
        let user = MemoryPresets::new().with("chromatic", "user");
        let catalog = LayeredPresets::new(vec![
            Box::new(user),
            Box::new(builtin_zone_presets(30, 5)),
        ]);
        assert_eq!(catalog.load("chromatic").unwrap(), "user");
        assert!(catalog.load("rows").is_ok());
        assert_eq!(
            catalog.names(),
            vec!["chromatic", "rows", "rows_and_controllers"]
        );
    }

    #[test]
    fn test_builtin_zone_presets_are_valid_layouts() {
        let presets = builtin_zone_presets(30, 5);
        for name in presets.names() {
            let json = presets.load(&name).unwrap();
            let layout = ZoneLayout::from_json_str(&json, 30, 5)
                .unwrap_or_else(|e| panic!("{}: {}", name, e));
            assert!(!layout.is_empty());
        }
    }

    #[test]
    fn test_builtin_touch_presets_parse() {
        let presets = builtin_touch_presets();
        for name in presets.names() {
            let value: serde_json::Value = serde_json::from_str(&presets.load(&name).unwrap()).unwrap();
            assert!(value.get("z_scale").is_some());
        }
    }
}
