//! Carrier sets and carrier selection
//!
//! Each column group of the sensor is excited by one carrier frequency.
//! Electrical interference differs per frequency, so a selection run excites
//! a series of candidate sets, measures the noise each produces on every
//! column, and keeps, per column group, the quietest carrier seen.
//!
//! ```text
//! Idle ──begin()──▶ Selecting { step 0 }  excite candidate 0
//!                     │ settle_frames  (ignored, hardware settling)
//!                     │ measure_frames (noise accumulated)
//!                     ▼ next_step() ─▶ excite candidate 1 … ─▶ Complete(best set) ──▶ Idle
//! ```
//!
//! The engine never touches the hardware. It returns the set that should be
//! excited and the processing loop writes it at its next safe point.

use serde::{Deserialize, Serialize};

use crate::config::CarrierConfig;
use crate::stats::SensorFrameStats;
use crate::types::{SensorFrame, NUM_CARRIERS};

/// Canonical carrier table of the Model A; index 32 is skipped because it
/// aliases with 16.
pub const DEFAULT_CARRIER_TABLE: [u8; 40] = [
    0, 0, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26,
    27, 28, 29, 30, 31, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42,
];

/// Standard sets skip a window of this many table entries
const STANDARD_SET_GAP: usize = 4;
/// Leading groups that are never excited
const STANDARD_SET_START: usize = 2;
/// Window advance per standard set
const STANDARD_SET_SKIP: usize = 2;

/// One carrier per column group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CarrierSet(Vec<u8>);

impl CarrierSet {
    pub fn new(carriers: Vec<u8>) -> Self {
        Self(carriers)
    }

    /// The first `groups` entries of the carrier table
    pub fn default_for(groups: usize) -> Self {
        Self(
            (0..groups)
                .map(|g| DEFAULT_CARRIER_TABLE.get(g).copied().unwrap_or(0))
                .collect(),
        )
    }

    /// Standard candidate set `index`
    ///
    /// Groups before the skip window take table entry `g`, groups after it
    /// take entry `g + 4`, so each set avoids a different run of four
    /// frequencies.
    pub fn standard(index: usize, groups: usize) -> Self {
        let gap_start = index * STANDARD_SET_SKIP + STANDARD_SET_START;
        Self(
            (0..groups)
                .map(|g| {
                    let entry = if g < STANDARD_SET_START {
                        return 0;
                    } else if g < gap_start {
                        g
                    } else {
                        g + STANDARD_SET_GAP
                    };
                    DEFAULT_CARRIER_TABLE.get(entry).copied().unwrap_or(0)
                })
                .collect(),
        )
    }

    /// The first `count` standard sets
    pub fn standard_sets(count: usize, groups: usize) -> Vec<Self> {
        (0..count).map(|i| Self::standard(i, groups)).collect()
    }

    /// Number of column groups covered
    pub fn groups(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, group: usize) -> Option<u8> {
        self.0.get(group).copied()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Default for CarrierSet {
    fn default() -> Self {
        Self::default_for(NUM_CARRIERS)
    }
}

/// Noise measured per candidate set and sensor column
///
/// `max_noise[set][column]` is the largest per-sensor standard deviation seen
/// in that column; `noise_carrier[set][column]` is the carrier that was
/// exciting the column at the time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoiseStats {
    max_noise: Vec<Vec<f32>>,
    noise_carrier: Vec<Vec<u8>>,
}

impl NoiseStats {
    /// Empty statistics for `sets` candidates over `columns` sensor columns
    pub fn new(sets: usize, columns: usize) -> Self {
        Self {
            max_noise: vec![vec![f32::INFINITY; columns]; sets],
            noise_carrier: vec![vec![0; columns]; sets],
        }
    }

    /// Build directly from a noise table (for replaying measurements)
    pub fn from_table(max_noise: Vec<Vec<f32>>, candidates: &[CarrierSet]) -> Self {
        let noise_carrier = max_noise
            .iter()
            .enumerate()
            .map(|(set, columns)| {
                let groups = candidates.get(set).map(|c| c.groups()).unwrap_or(0).max(1);
                let per_group = (columns.len() / groups).max(1);
                (0..columns.len())
                    .map(|col| {
                        candidates
                            .get(set)
                            .and_then(|c| c.get(col / per_group))
                            .unwrap_or(0)
                    })
                    .collect()
            })
            .collect();
        Self {
            max_noise,
            noise_carrier,
        }
    }

    pub fn sets(&self) -> usize {
        self.max_noise.len()
    }

    pub fn columns(&self) -> usize {
        self.max_noise.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Max noise recorded for a set and column (`INFINITY` if never measured)
    pub fn max_noise(&self, set: usize, column: usize) -> f32 {
        self.max_noise
            .get(set)
            .and_then(|c| c.get(column))
            .copied()
            .unwrap_or(f32::INFINITY)
    }

    /// Carrier that produced the recorded max noise
    pub fn noise_carrier(&self, set: usize, column: usize) -> u8 {
        self.noise_carrier
            .get(set)
            .and_then(|c| c.get(column))
            .copied()
            .unwrap_or(0)
    }

    /// Record the std dev frame measured for `set` while `carriers` were active
    fn record(&mut self, set: usize, std_dev: &SensorFrame, carriers: &CarrierSet, per_group: usize) {
        let (Some(noise_row), Some(carrier_row)) =
            (self.max_noise.get_mut(set), self.noise_carrier.get_mut(set))
        else {
            return;
        };
        for (col, (noise, carrier)) in noise_row.iter_mut().zip(carrier_row.iter_mut()).enumerate() {
            if col >= std_dev.width() {
                break;
            }
            let column_max = std_dev
                .column(col)
                .iter()
                .copied()
                .fold(0.0f32, f32::max);
            *noise = column_max;
            *carrier = carriers.get(col / per_group).unwrap_or(0);
        }
    }

    /// Noise of a whole column group under one candidate set
    fn group_noise(&self, set: usize, group: usize, per_group: usize) -> f32 {
        (group * per_group..(group + 1) * per_group)
            .map(|col| self.max_noise(set, col))
            .map(|n| if n.is_nan() { f32::INFINITY } else { n })
            .fold(f32::NEG_INFINITY, f32::max)
    }
}

/// Choose, per column group, the carrier of the quietest candidate
///
/// Candidates are compared with a strict `<`, scanning in index order, so
/// ties go to the lowest-indexed candidate and the same measurements always
/// give the same result.
pub fn select_carriers(stats: &NoiseStats, candidates: &[CarrierSet], per_group: usize) -> CarrierSet {
    let groups = candidates.first().map(|c| c.groups()).unwrap_or(0);
    let per_group = per_group.max(1);
    let carriers = (0..groups)
        .map(|group| {
            let mut best_set = 0;
            let mut best_noise = f32::INFINITY;
            for set in 0..candidates.len() {
                let noise = stats.group_noise(set, group, per_group);
                if noise < best_noise {
                    best_noise = noise;
                    best_set = set;
                }
            }
            candidates[best_set].get(group).unwrap_or(0)
        })
        .collect();
    CarrierSet::new(carriers)
}

/// What the processing loop must do after feeding a frame
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionEvent {
    /// Nothing to do
    None,
    /// Excite this candidate set on the hardware
    Excite(CarrierSet),
    /// Selection finished; apply this set
    Complete(CarrierSet),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectionState {
    Idle,
    Selecting { step: usize, frame: usize },
}

/// Carrier selection state machine
pub struct CarrierSelectionEngine {
    width: usize,
    per_group: usize,
    settle_frames: usize,
    measure_frames: usize,
    candidates: Vec<CarrierSet>,
    state: SelectionState,
    stats: SensorFrameStats,
    noise: NoiseStats,
}

impl CarrierSelectionEngine {
    /// Engine over `candidates`, measuring a `width × height` sensor with
    /// `per_group` columns per carrier
    pub fn new(
        width: usize,
        height: usize,
        per_group: usize,
        config: &CarrierConfig,
        candidates: Vec<CarrierSet>,
    ) -> Self {
        let sets = candidates.len();
        Self {
            width,
            per_group: per_group.max(1),
            settle_frames: config.settle_frames,
            measure_frames: config.measure_frames.max(1),
            candidates,
            state: SelectionState::Idle,
            stats: SensorFrameStats::new(width, height),
            noise: NoiseStats::new(sets, width),
        }
    }

    /// Start a run; returns the first candidate to excite, or `None` if a run
    /// is already active or there is nothing to try
    pub fn begin(&mut self) -> Option<CarrierSet> {
        if self.is_selecting() {
            log::warn!("[CARRIERS] begin ignored, selection already running");
            return None;
        }
        let first = self.candidates.first().cloned()?;
        self.noise = NoiseStats::new(self.candidates.len(), self.width);
        self.stats.clear();
        self.state = SelectionState::Selecting { step: 0, frame: 0 };
        log::info!(
            "[CARRIERS] Selection started: {} candidate sets, settle {} / measure {} frames",
            self.candidates.len(),
            self.settle_frames,
            self.measure_frames
        );
        Some(first)
    }

    /// Feed one raw frame
    pub fn accumulate(&mut self, frame: &SensorFrame) -> SelectionEvent {
        let SelectionState::Selecting { step, frame: count } = self.state else {
            return SelectionEvent::None;
        };

        let count = count + 1;
        self.state = SelectionState::Selecting { step, frame: count };

        if count <= self.settle_frames {
            return SelectionEvent::None;
        }
        self.stats.accumulate(frame);
        if count < self.settle_frames + self.measure_frames {
            return SelectionEvent::None;
        }
        self.next_step()
    }

    /// Finish measuring the current candidate and move to the next one
    pub fn next_step(&mut self) -> SelectionEvent {
        let SelectionState::Selecting { step, .. } = self.state else {
            return SelectionEvent::None;
        };

        if self.stats.count() > 0 {
            let std_dev = self.stats.std_dev();
            self.noise
                .record(step, &std_dev, &self.candidates[step], self.per_group);
            log::debug!(
                "[CARRIERS] Set {} measured over {} frames",
                step,
                self.stats.count()
            );
        }
        self.stats.clear();

        let next = step + 1;
        if next < self.candidates.len() {
            self.state = SelectionState::Selecting { step: next, frame: 0 };
            return SelectionEvent::Excite(self.candidates[next].clone());
        }

        let selected = select_carriers(&self.noise, &self.candidates, self.per_group);
        self.state = SelectionState::Idle;
        log::info!("[CARRIERS] Selection complete: {:?}", selected.as_slice());
        SelectionEvent::Complete(selected)
    }

    /// Abort without selecting
    pub fn end(&mut self) {
        if self.is_selecting() {
            log::info!("[CARRIERS] Selection aborted");
        }
        self.stats.clear();
        self.state = SelectionState::Idle;
    }

    pub fn is_selecting(&self) -> bool {
        matches!(self.state, SelectionState::Selecting { .. })
    }

    /// Current candidate index while selecting
    pub fn step(&self) -> Option<usize> {
        match self.state {
            SelectionState::Selecting { step, .. } => Some(step),
            SelectionState::Idle => None,
        }
    }

    /// Fraction of all candidate frames seen so far
    pub fn progress(&self) -> f32 {
        match self.state {
            SelectionState::Selecting { step, frame } => {
                let per_step = self.settle_frames + self.measure_frames;
                let total = (per_step * self.candidates.len()).max(1);
                (step * per_step + frame) as f32 / total as f32
            }
            SelectionState::Idle => 0.0,
        }
    }

    /// Measurements of the latest run
    pub fn noise_stats(&self) -> &NoiseStats {
        &self.noise
    }

    pub fn candidates(&self) -> &[CarrierSet] {
        &self.candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(settle: usize, measure: usize) -> CarrierConfig {
        CarrierConfig {
            settle_frames: settle,
            measure_frames: measure,
            ..Default::default()
        }
    }

    #[test]
    fn test_standard_sets_skip_a_window() {
        let set0 = CarrierSet::standard(0, 32);
        assert_eq!(set0.groups(), 32);
        assert_eq!(&set0.as_slice()[..4], &[0, 0, 8, 9]);

        let set15 = CarrierSet::standard(15, 32);
        assert_eq!(set15, CarrierSet::default_for(32));
        assert!(CarrierSet::standard_sets(16, 32).iter().all(|s| s.groups() == 32));
    }

    #[test]
    fn test_select_strict_minimum_per_group() {
        let candidates = vec![
            CarrierSet::new(vec![10, 11]),
            CarrierSet::new(vec![20, 21]),
            CarrierSet::new(vec![30, 31]),
        ];
        // two groups, one column each
        let stats = NoiseStats::from_table(
            vec![vec![0.5, 0.1], vec![0.2, 0.3], vec![0.9, 0.05]],
            &candidates,
        );
        let selected = select_carriers(&stats, &candidates, 1);
        assert_eq!(selected.as_slice(), &[20, 31]);
    }

    #[test]
    fn test_select_ties_go_to_lowest_index() {
        let candidates = vec![
            CarrierSet::new(vec![10]),
            CarrierSet::new(vec![20]),
            CarrierSet::new(vec![30]),
        ];
        let stats = NoiseStats::from_table(vec![vec![0.4], vec![0.2], vec![0.2]], &candidates);
        for _ in 0..10 {
            assert_eq!(select_carriers(&stats, &candidates, 1).as_slice(), &[20]);
        }

        let all_equal = NoiseStats::from_table(vec![vec![0.3], vec![0.3], vec![0.3]], &candidates);
        assert_eq!(select_carriers(&all_equal, &candidates, 1).as_slice(), &[10]);
    }

    #[test]
    fn test_group_noise_uses_loudest_column() {
        let candidates = vec![CarrierSet::new(vec![1]), CarrierSet::new(vec![2])];
        // one group of two columns: set 0 has a loud column
        let stats = NoiseStats::from_table(vec![vec![0.1, 0.9], vec![0.5, 0.5]], &candidates);
        assert_eq!(select_carriers(&stats, &candidates, 2).as_slice(), &[2]);
    }

    #[test]
    fn test_nan_noise_never_wins() {
        let candidates = vec![CarrierSet::new(vec![1]), CarrierSet::new(vec![2])];
        let stats = NoiseStats::from_table(vec![vec![f32::NAN], vec![0.5]], &candidates);
        assert_eq!(select_carriers(&stats, &candidates, 1).as_slice(), &[2]);
    }

    #[test]
    fn test_run_selects_quietest_set() {
        let candidates = vec![CarrierSet::new(vec![5, 6]), CarrierSet::new(vec![7, 8])];
        let mut engine = CarrierSelectionEngine::new(2, 1, 1, &config(2, 4), candidates);

        assert_eq!(engine.begin(), Some(CarrierSet::new(vec![5, 6])));
        assert!(engine.is_selecting());

        // set 0: column 0 noisy, column 1 quiet
        let mut event = SelectionEvent::None;
        for i in 0..6 {
            let wobble = if i % 2 == 0 { 1.0 } else { -1.0 };
            event = engine.accumulate(&SensorFrame::from_vec(2, 1, vec![5.0 + wobble, 5.0]).unwrap());
        }
        assert_eq!(event, SelectionEvent::Excite(CarrierSet::new(vec![7, 8])));
        assert_eq!(engine.step(), Some(1));

        // set 1: column 0 quiet, column 1 noisy
        for i in 0..6 {
            let wobble = if i % 2 == 0 { 0.5 } else { -0.5 };
            event = engine.accumulate(&SensorFrame::from_vec(2, 1, vec![5.0, 5.0 + wobble]).unwrap());
        }
        assert_eq!(event, SelectionEvent::Complete(CarrierSet::new(vec![7, 6])));
        assert!(!engine.is_selecting());

        let noise = engine.noise_stats();
        assert!(noise.max_noise(0, 0) > 0.9);
        assert_eq!(noise.noise_carrier(1, 1), 8);
    }

    #[test]
    fn test_settling_frames_are_ignored() {
        let candidates = vec![CarrierSet::new(vec![1]), CarrierSet::new(vec![2])];
        let mut engine = CarrierSelectionEngine::new(1, 1, 1, &config(3, 2), candidates);
        engine.begin();

        // wild values while settling must not count as noise
        for v in [100.0, -100.0, 50.0] {
            assert_eq!(engine.accumulate(&SensorFrame::filled(1, 1, v)), SelectionEvent::None);
        }
        engine.accumulate(&SensorFrame::filled(1, 1, 1.0));
        engine.accumulate(&SensorFrame::filled(1, 1, 1.0));
        assert_eq!(engine.noise_stats().max_noise(0, 0), 0.0);
    }

    #[test]
    fn test_progress_and_abort() {
        let candidates = CarrierSet::standard_sets(4, 2);
        let mut engine = CarrierSelectionEngine::new(4, 1, 2, &config(1, 1), candidates);
        assert_eq!(engine.progress(), 0.0);
        engine.begin();
        engine.accumulate(&SensorFrame::zeros(4, 1));
        assert!((engine.progress() - 1.0 / 8.0).abs() < 1e-6);
        engine.end();
        assert!(!engine.is_selecting());
        assert_eq!(engine.progress(), 0.0);
        assert_eq!(engine.next_step(), SelectionEvent::None);
    }

    #[test]
    fn test_manual_next_step_skips_measurement() {
        let candidates = vec![CarrierSet::new(vec![1]), CarrierSet::new(vec![2])];
        let mut engine = CarrierSelectionEngine::new(1, 1, 1, &config(0, 100), candidates);
        engine.begin();
        assert_eq!(engine.next_step(), SelectionEvent::Excite(CarrierSet::new(vec![2])));
        // set 1 measured, set 0 never was: set 1 wins
        for v in [1.0, 2.0] {
            engine.accumulate(&SensorFrame::filled(1, 1, v));
        }
        assert_eq!(engine.next_step(), SelectionEvent::Complete(CarrierSet::new(vec![2])));
    }
}
