//! Forward-fill of missing daily values.
//!
//! Follower counts are a level, not a flow: a day without an observation is
//! best represented by the last known level. Only target entities are filled,
//! and only from an earlier observation (no backward fill).

use super::loader::{DailySnapshot, SeriesHistory};
use super::select::TargetSet;

/// Carry-forward state for one pass over a history.
#[derive(Debug, Default)]
pub struct ForwardFill {
    carry: DailySnapshot,
    filled: usize,
}

impl ForwardFill {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill one day in place, then carry the whole (observed + filled) day forward.
    ///
    /// Days must be fed in ascending date order.
    pub fn step(&mut self, snapshot: &mut DailySnapshot, targets: &TargetSet) {
        for name in targets.iter() {
            if snapshot.contains_key(name) {
                continue;
            }
            if let Some(&value) = self.carry.get(name) {
                snapshot.insert(name.to_string(), value);
                self.filled += 1;
            }
        }
        self.carry = snapshot.clone();
    }

    /// Values inserted so far.
    pub fn filled(&self) -> usize {
        self.filled
    }
}

/// Forward-fill every day of `history` for the target entities.
///
/// Returns the number of values inserted.
pub fn forward_fill(history: &mut SeriesHistory, targets: &TargetSet) -> usize {
    let mut fill = ForwardFill::new();
    for (_, snapshot) in history.days_mut() {
        fill.step(snapshot, targets);
    }
    fill.filled()
}
