//! Automatic distance splits and manual laps.

use crate::geo::average_pace;
use crate::recording::types::{Split, SplitKind};
use serde::{Deserialize, Serialize};

/// Start point of the split currently being measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct SplitStart {
    distance_m: f64,
    elapsed_s: f64,
}

/// Tracks automatic and manual splits for one session.
///
/// Serializable so it can be restored from a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitTracker {
    split_distance_m: f64,
    splits: Vec<Split>,
    auto_start: SplitStart,
    manual_start: SplitStart,
    /// Last progress point, used to interpolate boundary times
    last: SplitStart,
    next_auto_index: u32,
    next_manual_index: u32,
}

impl SplitTracker {
    pub fn new(split_distance_m: f64) -> Self {
        Self {
            split_distance_m,
            splits: Vec::new(),
            auto_start: SplitStart::default(),
            manual_start: SplitStart::default(),
            last: SplitStart::default(),
            next_auto_index: 1,
            next_manual_index: 1,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.split_distance_m);
    }

    /// All splits so far, in emission order.
    pub fn splits(&self) -> &[Split] {
        &self.splits
    }

    pub fn count(&self, kind: SplitKind) -> usize {
        self.splits.iter().filter(|s| s.kind == kind).count()
    }

    /// Record cumulative progress; returns the automatic splits completed.
    ///
    /// One split is emitted per boundary crossed, even when a single step
    /// crosses several. Boundary times are interpolated within the step.
    /// A split distance that is not a positive finite number disables
    /// automatic splits.
    pub fn record_progress(&mut self, distance_m: f64, elapsed_s: f64) -> Vec<Split> {
        let previous = self.last;
        self.last = SplitStart {
            distance_m: distance_m.max(previous.distance_m),
            elapsed_s: elapsed_s.max(previous.elapsed_s),
        };

        let mut completed = Vec::new();
        if !self.auto_splits_enabled() {
            return completed;
        }
        loop {
            let boundary = self.next_auto_index as f64 * self.split_distance_m;
            if self.last.distance_m < boundary {
                break;
            }

            let step = self.last.distance_m - previous.distance_m;
            let fraction = if step > 0.0 {
                ((boundary - previous.distance_m) / step).clamp(0.0, 1.0)
            } else {
                1.0
            };
            let boundary_elapsed =
                previous.elapsed_s + fraction * (self.last.elapsed_s - previous.elapsed_s);

            let split = self.make_split(
                SplitKind::AutoKm,
                self.next_auto_index,
                self.auto_start,
                SplitStart {
                    distance_m: boundary,
                    elapsed_s: boundary_elapsed,
                },
            );
            self.auto_start = SplitStart {
                distance_m: boundary,
                elapsed_s: boundary_elapsed,
            };
            self.next_auto_index += 1;

            tracing::info!(
                "Split {} completed in {:.0}s",
                split.index,
                split.duration_s
            );
            self.splits.push(split.clone());
            completed.push(split);
        }

        completed
    }

    fn auto_splits_enabled(&self) -> bool {
        self.split_distance_m > 0.0 && self.split_distance_m.is_finite()
    }

    /// Close a manual lap at the current position.
    pub fn lap(&mut self, distance_m: f64, elapsed_s: f64) -> Split {
        let end = SplitStart {
            distance_m: distance_m.max(self.manual_start.distance_m),
            elapsed_s: elapsed_s.max(self.manual_start.elapsed_s),
        };
        let split = self.make_split(SplitKind::Manual, self.next_manual_index, self.manual_start, end);
        self.manual_start = end;
        self.next_manual_index += 1;
        self.splits.push(split.clone());
        split
    }

    /// The partial automatic split from the last boundary to the end of the
    /// session, if any distance remains. Does not modify the tracker.
    pub fn closing_split(&self, distance_m: f64, elapsed_s: f64) -> Option<Split> {
        if distance_m - self.auto_start.distance_m <= 0.0 {
            return None;
        }
        Some(self.make_split(
            SplitKind::AutoKm,
            self.next_auto_index,
            self.auto_start,
            SplitStart {
                distance_m,
                elapsed_s: elapsed_s.max(self.auto_start.elapsed_s),
            },
        ))
    }

    fn make_split(&self, kind: SplitKind, index: u32, start: SplitStart, end: SplitStart) -> Split {
        let distance_m = end.distance_m - start.distance_m;
        let duration_s = end.elapsed_s - start.elapsed_s;
        Split {
            kind,
            index,
            distance_m,
            duration_s,
            avg_pace_s_per_km: average_pace(distance_m, duration_s),
            start_elapsed_s: start.elapsed_s,
            end_elapsed_s: end.elapsed_s,
        }
    }
}
