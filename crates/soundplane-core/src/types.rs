//! Common types for the Soundplane pipeline
//!
//! Surface constants and the sensor frame grid shared by every stage.

use ndarray::{Array2, ArrayView1};

/// Sensor columns delivered by a Soundplane Model A
pub const DEFAULT_SENSOR_WIDTH: usize = 64;

/// Sensor rows delivered by a Soundplane Model A
pub const DEFAULT_SENSOR_HEIGHT: usize = 8;

/// Key columns on the playing surface
pub const DEFAULT_KEY_WIDTH: usize = 30;

/// Key rows on the playing surface
pub const DEFAULT_KEY_HEIGHT: usize = 5;

/// Carrier (column group) count of the default surface
pub const NUM_CARRIERS: usize = 32;

/// Maximum simultaneous touches tracked
pub const MAX_TOUCHES: usize = 16;

/// Frames buffered between the driver callback and the processing thread
pub const FRAME_QUEUE_CAPACITY: usize = 16;

/// One raw (or conditioned) reading of the whole sensor grid
///
/// Stored row-major as `height × width`; `get(x, y)` addresses column `x`,
/// row `y`. Frames are never mutated after the driver hands them over, each
/// conditioning stage produces a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFrame {
    data: Array2<f32>,
}

impl SensorFrame {
    /// A frame of zeros
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            data: Array2::zeros((height, width)),
        }
    }

    /// A frame with every sensor set to `value`
    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            data: Array2::from_elem((height, width), value),
        }
    }

    /// Build from row-major samples; `None` if the length doesn't match
    pub fn from_vec(width: usize, height: usize, samples: Vec<f32>) -> Option<Self> {
        Array2::from_shape_vec((height, width), samples)
            .ok()
            .map(|data| Self { data })
    }

    /// Wrap an existing `height × width` array
    pub fn from_array(data: Array2<f32>) -> Self {
        Self { data }
    }

    /// Build by evaluating `f(x, y)` for every sensor
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        Self {
            data: Array2::from_shape_fn((height, width), |(y, x)| f(x, y)),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Reading at column `x`, row `y`
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[[y, x]]
    }

    /// All rows of sensor column `x`
    pub fn column(&self, x: usize) -> ArrayView1<'_, f32> {
        self.data.column(x)
    }

    pub fn as_array(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn into_array(self) -> Array2<f32> {
        self.data
    }

    /// True if both frames have the same width and height
    pub fn same_shape(&self, other: &SensorFrame) -> bool {
        self.data.dim() == other.data.dim()
    }

    /// True if the frame is `width × height`
    pub fn has_shape(&self, width: usize, height: usize) -> bool {
        self.width() == width && self.height() == height
    }

    /// Largest reading in the frame
    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Mean of all readings (0.0 for an empty frame)
    pub fn mean(&self) -> f32 {
        self.data.mean().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_addressing_is_column_row() {
        let frame = SensorFrame::from_fn(4, 2, |x, y| (y * 10 + x) as f32);
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.get(3, 1), 13.0);
        assert_eq!(frame.column(2).to_vec(), vec![2.0, 12.0]);
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        assert!(SensorFrame::from_vec(3, 2, vec![0.0; 5]).is_none());
        let frame = SensorFrame::from_vec(3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(frame.get(0, 1), 4.0);
    }

    #[test]
    fn test_shape_helpers() {
        let a = SensorFrame::zeros(64, 8);
        let b = SensorFrame::filled(64, 8, 0.5);
        let c = SensorFrame::zeros(32, 8);
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&c));
        assert!(a.has_shape(64, 8));
        assert_eq!(b.max(), 0.5);
        assert!((b.mean() - 0.5).abs() < 1e-6);
    }
}
