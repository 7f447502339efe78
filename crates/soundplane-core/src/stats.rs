//! Per-sensor running statistics
//!
//! Welford's online algorithm, one accumulator per sensor. Used for the
//! calibration baseline (mean), carrier noise measurement (std dev) and the
//! statistics over recent calibrated frames ([`SensorHistory`]).

use std::collections::VecDeque;
use std::sync::Arc;

use ndarray::{Array2, Zip};

use crate::types::SensorFrame;

/// Running mean and variance of every sensor over a sequence of frames
#[derive(Debug, Clone)]
pub struct SensorFrameStats {
    count: usize,
    mean: Array2<f32>,
    m2: Array2<f32>,
}

impl SensorFrameStats {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            count: 0,
            mean: Array2::zeros((height, width)),
            m2: Array2::zeros((height, width)),
        }
    }

    /// Forget all accumulated frames
    pub fn clear(&mut self) {
        self.count = 0;
        self.mean.fill(0.0);
        self.m2.fill(0.0);
    }

    /// Add a frame; returns false (and ignores it) if its shape differs
    pub fn accumulate(&mut self, frame: &SensorFrame) -> bool {
        if frame.as_array().dim() != self.mean.dim() {
            return false;
        }
        self.count += 1;
        let n = self.count as f32;
        Zip::from(&mut self.mean)
            .and(&mut self.m2)
            .and(frame.as_array())
            .for_each(|mean, m2, &x| {
                let delta = x - *mean;
                *mean += delta / n;
                *m2 += delta * (x - *mean);
            });
        true
    }

    /// Frames accumulated so far
    pub fn count(&self) -> usize {
        self.count
    }

    /// Per-sensor mean
    pub fn mean(&self) -> SensorFrame {
        SensorFrame::from_array(self.mean.clone())
    }

    /// Per-sensor population standard deviation (zeros before two frames)
    pub fn std_dev(&self) -> SensorFrame {
        if self.count < 2 {
            return SensorFrame::from_array(Array2::zeros(self.mean.dim()));
        }
        let n = self.count as f32;
        SensorFrame::from_array(self.m2.mapv(|m2| (m2 / n).max(0.0).sqrt()))
    }
}

/// Bounded ring of recent calibrated frames
#[derive(Debug, Clone, Default)]
pub struct SensorHistory {
    frames: VecDeque<Arc<SensorFrame>>,
    capacity: usize,
}

impl SensorHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: Arc<SensorFrame>) {
        if self.capacity == 0 {
            return;
        }
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Values of sensor `(x, y)`, oldest first; empty off the grid
    pub fn sample_history(&self, x: usize, y: usize) -> Vec<f32> {
        self.frames
            .iter()
            .filter(|f| x < f.width() && y < f.height())
            .map(|f| f.get(x, y))
            .collect()
    }

    /// Mean level and typical noise over the history
    ///
    /// Per-sensor Welford statistics, then the mean of the sensor means and
    /// the mean of the sensor standard deviations. `None` while empty.
    pub fn stats(&self) -> Option<(f32, f32)> {
        let first = self.frames.front()?;
        let mut stats = SensorFrameStats::new(first.width(), first.height());
        for frame in &self.frames {
            stats.accumulate(frame);
        }
        Some((stats.mean().mean(), stats.std_dev().mean()))
    }

    /// Smallest and largest sample in the newest `n` frames
    pub fn min_max(&self, n: usize) -> Option<(f32, f32)> {
        self.frames
            .iter()
            .rev()
            .take(n)
            .flat_map(|f| f.as_array().iter().copied())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std_dev() {
        let mut stats = SensorFrameStats::new(2, 1);
        for v in [1.0, 2.0, 3.0, 4.0] {
            let frame = SensorFrame::from_vec(2, 1, vec![v, 10.0]).unwrap();
            assert!(stats.accumulate(&frame));
        }

        assert_eq!(stats.count(), 4);
        let mean = stats.mean();
        assert!((mean.get(0, 0) - 2.5).abs() < 1e-6);
        assert!((mean.get(1, 0) - 10.0).abs() < 1e-6);

        let std_dev = stats.std_dev();
        // population std dev of 1,2,3,4
        assert!((std_dev.get(0, 0) - 1.118_034).abs() < 1e-4);
        assert!(std_dev.get(1, 0).abs() < 1e-6);
    }

    #[test]
    fn test_wrong_shape_is_ignored() {
        let mut stats = SensorFrameStats::new(4, 2);
        assert!(!stats.accumulate(&SensorFrame::zeros(2, 2)));
        assert_eq!(stats.count(), 0);
    }

    #[test]
    fn test_clear_resets() {
        let mut stats = SensorFrameStats::new(1, 1);
        stats.accumulate(&SensorFrame::filled(1, 1, 5.0));
        stats.clear();
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.mean().get(0, 0), 0.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = SensorHistory::new(3);
        for v in 0..5 {
            history.push(Arc::new(SensorFrame::filled(2, 2, v as f32)));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.sample_history(1, 1), vec![2.0, 3.0, 4.0]);
        assert!(history.sample_history(2, 0).is_empty());
    }

    #[test]
    fn test_history_stats_and_min_max() {
        let mut history = SensorHistory::new(8);
        assert_eq!(history.stats(), None);
        assert_eq!(history.min_max(4), None);

        for v in [1.0, 3.0] {
            let frame = SensorFrame::from_vec(2, 1, vec![v, 10.0]).unwrap();
            history.push(Arc::new(frame));
        }
        let (mean, std_dev) = history.stats().unwrap();
        // sensor means 2 and 10, std devs 1 and 0
        assert!((mean - 6.0).abs() < 1e-6);
        assert!((std_dev - 0.5).abs() < 1e-6);

        assert_eq!(history.min_max(1), Some((3.0, 10.0)));
        assert_eq!(history.min_max(10), Some((1.0, 10.0)));
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut history = SensorHistory::new(0);
        history.push(Arc::new(SensorFrame::zeros(1, 1)));
        assert!(history.is_empty());
    }
}
