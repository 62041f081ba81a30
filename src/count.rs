//! Per-cycle counting and session state.
//!
//! Counts are not smoothed across frames. Every cycle starts from zero and
//! adds one per detection; the tracker is the only source of temporal
//! consistency.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::detect::Detection;
use crate::present::Palette;

/// Intervals at or below this many seconds do not produce an fps sample.
pub const FPS_EPSILON: f64 = 1e-6;

/// Label-sorted per-class tally for one cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassCount {
    counts: BTreeMap<String, usize>,
}

impl ClassCount {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn get(&self, label: &str) -> usize {
        self.counts.get(label).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(label, n)| (label.as_str(), *n))
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    /// `AA=3 AAA=1`, or `none`.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "none".to_string();
        }
        self.iter()
            .map(|(label, n)| format!("{}={}", label, n))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CountAggregator;

impl CountAggregator {
    pub fn new() -> Self {
        Self
    }

    /// One unit per detection, keyed by its label. Track ids are ignored.
    pub fn tally(&self, detections: &[Detection]) -> ClassCount {
        let mut counts = BTreeMap::new();
        for det in detections {
            *counts.entry(det.class_label.clone()).or_insert(0) += 1;
        }
        ClassCount { counts }
    }
}

/// Instantaneous frame rate from consecutive frame timestamps.
#[derive(Clone, Debug, Default)]
pub struct FpsEstimator {
    last: Option<Instant>,
    fps: f64,
}

impl FpsEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful cycle at `now` and return the current estimate.
    ///
    /// An interval of `FPS_EPSILON` or less (including a clock that did not
    /// advance) keeps the previous estimate.
    pub fn tick(&mut self, now: Instant) -> f64 {
        if let Some(last) = self.last {
            let dt = now.saturating_duration_since(last).as_secs_f64();
            if dt > FPS_EPSILON {
                self.fps = 1.0 / dt;
            }
        }
        self.last = Some(now);
        self.fps
    }

    /// Restart timing after a reconnection. The gap is not sampled and the
    /// last estimate stays visible until the next interval completes.
    pub fn resume(&mut self, now: Instant) {
        self.last = Some(now);
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}

/// Mutable state threaded through the live loop.
#[derive(Clone, Debug)]
pub struct SessionState {
    pub fps: FpsEstimator,
    pub palette: Palette,
    pub frames_processed: u64,
    pub last_counts: ClassCount,
}

impl SessionState {
    pub fn new(palette: Palette) -> Self {
        Self {
            fps: FpsEstimator::new(),
            palette,
            frames_processed: 0,
            last_counts: ClassCount::default(),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(Palette::default())
    }
}
