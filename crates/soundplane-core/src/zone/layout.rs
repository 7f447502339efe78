//! Validated zone list plus its key-grid lookup

use serde::{Deserialize, Serialize};

use super::{Zone, ZoneError, ZoneSpec, MAX_ROW_INTERVAL};

/// Key-grid lookup from `(column, row)` to the owning zone
///
/// Every cell maps to exactly one zone or to none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneIndexMap {
    width: usize,
    height: usize,
    cells: Vec<Option<u16>>,
}

impl ZoneIndexMap {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![None; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Zone owning key `(kx, ky)`; `None` off the grid or outside all zones
    pub fn zone_at(&self, kx: i32, ky: i32) -> Option<usize> {
        if kx < 0 || ky < 0 || kx as usize >= self.width || ky as usize >= self.height {
            return None;
        }
        self.cells[ky as usize * self.width + kx as usize].map(usize::from)
    }

    fn cell_mut(&mut self, kx: usize, ky: usize) -> &mut Option<u16> {
        &mut self.cells[ky * self.width + kx]
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ZoneFile {
    zone: Vec<ZoneSpec>,
}

/// Zones and their index map, swapped into the router as a unit
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneLayout {
    zones: Vec<Zone>,
    map: ZoneIndexMap,
}

impl ZoneLayout {
    /// Layout with no zones; every touch is dropped
    pub fn empty(key_width: usize, key_height: usize) -> Self {
        Self {
            zones: Vec::new(),
            map: ZoneIndexMap::new(key_width, key_height),
        }
    }

    /// Parse a `{"zone": [...]}` document
    pub fn from_json_str(json: &str, key_width: usize, key_height: usize) -> Result<Self, ZoneError> {
        let file: ZoneFile = serde_json::from_str(json)?;
        Self::from_specs(file.zone, key_width, key_height)
    }

    /// Build from an already parsed JSON tree
    pub fn from_json_value(
        value: &serde_json::Value,
        key_width: usize,
        key_height: usize,
    ) -> Result<Self, ZoneError> {
        let file = ZoneFile::deserialize(value)?;
        Self::from_specs(file.zone, key_width, key_height)
    }

    /// Validate zones and build the index map
    ///
    /// Empty, out-of-bounds and overlapping rectangles are rejected, as are
    /// start notes outside 0..=127 and oversized row intervals.
    pub fn from_specs(
        specs: Vec<ZoneSpec>,
        key_width: usize,
        key_height: usize,
    ) -> Result<Self, ZoneError> {
        if specs.len() > u16::MAX as usize {
            return Err(ZoneError::TooMany(specs.len()));
        }

        let zones: Vec<Zone> = specs
            .into_iter()
            .enumerate()
            .map(|(id, spec)| Zone::from_spec(id, spec))
            .collect();

        let mut map = ZoneIndexMap::new(key_width, key_height);
        for zone in &zones {
            let r = zone.rect;
            if r.is_empty() {
                return Err(ZoneError::EmptyRect {
                    name: zone.name.to_string(),
                });
            }
            let right = i64::from(r.x) + i64::from(r.width);
            let bottom = i64::from(r.y) + i64::from(r.height);
            if r.x < 0 || r.y < 0 || right > key_width as i64 || bottom > key_height as i64 {
                return Err(ZoneError::OutOfBounds {
                    name: zone.name.to_string(),
                    width: key_width,
                    height: key_height,
                });
            }
            if !(0..=127).contains(&zone.start_note)
                || zone.row_interval.unsigned_abs() > MAX_ROW_INTERVAL.unsigned_abs()
            {
                return Err(ZoneError::InvalidNotes {
                    name: zone.name.to_string(),
                    note: zone.start_note,
                    row_interval: zone.row_interval,
                });
            }
            for ky in r.y as usize..bottom as usize {
                for kx in r.x as usize..right as usize {
                    let cell = map.cell_mut(kx, ky);
                    if let Some(other) = *cell {
                        return Err(ZoneError::Overlap {
                            first: zones[other as usize].name.to_string(),
                            second: zone.name.to_string(),
                        });
                    }
                    *cell = Some(zone.id as u16);
                }
            }
        }

        Ok(Self { zones, map })
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn zone(&self, id: usize) -> Option<&Zone> {
        self.zones.get(id)
    }

    pub fn map(&self) -> &ZoneIndexMap {
        &self.map
    }

    /// Zone owning key `(kx, ky)`
    pub fn zone_at(&self, kx: i32, ky: i32) -> Option<&Zone> {
        self.map.zone_at(kx, ky).and_then(|id| self.zones.get(id))
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Serialize back to the `{"zone": [...]}` form
    pub fn to_json_value(&self) -> serde_json::Value {
        let file = ZoneFile {
            zone: self.zones.iter().map(Zone::to_spec).collect(),
        };
        serde_json::to_value(file).unwrap_or(serde_json::Value::Null)
    }
}
