//! Second-stage selection: the union of each day's top-K.
//!
//! The series is already restricted to whitelisted entities, so the result is
//! whitelist ∩ "ranked within the top K on at least one day". Entities with a
//! short-lived surge are kept even if they never rank again.

use super::loader::{DailySnapshot, SeriesHistory};
use std::cmp::Reverse;
use std::collections::BTreeSet;

/// Entities selected for output. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSet {
    names: BTreeSet<String>,
}

impl TargetSet {
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Names in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl FromIterator<String> for TargetSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}

/// Top `k` entries of one day: value descending, ties broken by name ascending.
pub fn rank_day(snapshot: &DailySnapshot, k: usize) -> Vec<(&str, i64)> {
    let mut ranked: Vec<(&str, i64)> = snapshot.iter().map(|(n, v)| (n.as_str(), *v)).collect();
    ranked.sort_by_key(|&(name, value)| (Reverse(value), name));
    ranked.truncate(k);
    ranked
}

/// Build the target set from the per-day rankings.
pub fn select_targets(history: &SeriesHistory, k: usize) -> TargetSet {
    history
        .days()
        .flat_map(|(_, snapshot)| rank_day(snapshot, k))
        .map(|(name, _)| name.to_string())
        .collect()
}
