//! Whitelist and raw series loading.
//!
//! The whitelist is the only hard requirement of a run: without it nothing can
//! be declared eligible, so a missing file is fatal. Everything else degrades:
//! malformed rows are counted and skipped, and a missing series file yields an
//! empty history.
//!
//! Series rows for entities outside the whitelist are dropped while reading so
//! the in-memory history only ever holds eligible entities.

use crate::error::BakeError;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// Name → value for one date. Ordered so iteration is deterministic.
pub type DailySnapshot = BTreeMap<String, i64>;

/// One whitelist CSV row: `mid,name,follower,face`.
///
/// Only `name` is required. `face` is an optional trailing field; older lists
/// were written without it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistRow {
    pub mid: Option<String>,
    pub name: String,
    pub follower: Option<i64>,
    pub face: Option<String>,
}

impl WhitelistRow {
    /// Positional decode. Returns `None` when the name column is missing or empty.
    ///
    /// The name is kept exactly as written, the same way series rows key it,
    /// so surrounding whitespace is part of the identity.
    pub fn from_record(record: &csv::StringRecord) -> Option<Self> {
        let field = |i: usize| {
            record
                .get(i)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Some(Self {
            mid: field(0),
            name: entity_name(record, 1)?.to_string(),
            follower: field(2).and_then(|f| f.parse().ok()),
            face: field(3),
        })
    }
}

/// Curated set of eligible entities with their primary avatar URLs.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    entries: BTreeMap<String, Option<String>>,
}

impl Whitelist {
    /// Read a whitelist CSV. The first line is always treated as the header.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let mut whitelist = Self::default();
        for record in rdr.records() {
            let record = match record {
                Ok(r) => r,
                Err(e) if e.is_io_error() => return Err(e),
                Err(e) => {
                    debug!("skipping malformed whitelist row: {e}");
                    continue;
                }
            };
            if let Some(row) = WhitelistRow::from_record(&record) {
                whitelist.insert(row);
            }
        }
        Ok(whitelist)
    }

    /// Add a row. A later row with a face URL replaces an earlier one; a later
    /// row without one keeps what is already known.
    pub fn insert(&mut self, row: WhitelistRow) {
        let slot = self.entries.entry(row.name).or_insert(None);
        if row.face.is_some() {
            *slot = row.face;
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Primary avatar URL, if the whitelist carries one.
    pub fn face_url(&self, name: &str) -> Option<&str> {
        self.entries.get(name).and_then(|f| f.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Counters from reading the raw series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub rows_read: usize,
    pub rows_kept: usize,
    pub rows_malformed: usize,
    pub rows_not_whitelisted: usize,
}

/// Daily snapshots keyed by date, ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesHistory {
    days: BTreeMap<NaiveDate, DailySnapshot>,
}

impl SeriesHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a raw `date,name,value` series, keeping only whitelisted entities.
    ///
    /// Duplicate (date, name) pairs are last-write-wins.
    pub fn from_reader<R: Read>(
        reader: R,
        whitelist: &Whitelist,
    ) -> Result<(Self, LoadStats), csv::Error> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut history = Self::new();
        let mut stats = LoadStats::default();

        for record in rdr.records() {
            let record = match record {
                Ok(r) => r,
                Err(e) if e.is_io_error() => return Err(e),
                Err(e) => {
                    stats.rows_read += 1;
                    stats.rows_malformed += 1;
                    debug!("skipping malformed series row: {e}");
                    continue;
                }
            };

            // Header lines (possibly repeated by concatenated exports)
            if record.get(0).is_some_and(|f| f.starts_with("date")) {
                continue;
            }
            stats.rows_read += 1;

            let Some((date, name, value)) = parse_observation(&record) else {
                stats.rows_malformed += 1;
                continue;
            };

            if !whitelist.contains(name) {
                stats.rows_not_whitelisted += 1;
                continue;
            }

            history.insert(date, name, value);
            stats.rows_kept += 1;
        }

        Ok((history, stats))
    }

    pub fn insert(&mut self, date: NaiveDate, name: &str, value: i64) {
        self.days
            .entry(date)
            .or_default()
            .insert(name.to_string(), value);
    }

    pub fn get(&self, date: NaiveDate, name: &str) -> Option<i64> {
        self.days.get(&date).and_then(|day| day.get(name)).copied()
    }

    pub fn snapshot(&self, date: NaiveDate) -> Option<&DailySnapshot> {
        self.days.get(&date)
    }

    /// Dates in ascending order.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.days.keys().copied()
    }

    pub fn days(&self) -> impl Iterator<Item = (NaiveDate, &DailySnapshot)> {
        self.days.iter().map(|(d, s)| (*d, s))
    }

    pub fn days_mut(&mut self) -> impl Iterator<Item = (NaiveDate, &mut DailySnapshot)> {
        self.days.iter_mut().map(|(d, s)| (*d, s))
    }

    pub fn day_count(&self) -> usize {
        self.days.len()
    }

    pub fn observation_count(&self) -> usize {
        self.days.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

/// Entity name column, untrimmed. Both input files key entities this way.
fn entity_name(record: &csv::StringRecord, index: usize) -> Option<&str> {
    record.get(index).filter(|n| !n.is_empty())
}

fn parse_observation(record: &csv::StringRecord) -> Option<(NaiveDate, &str, i64)> {
    let date = NaiveDate::parse_from_str(record.get(0)?.trim(), "%Y-%m-%d").ok()?;
    let name = entity_name(record, 1)?;
    let value = record.get(2)?.trim().parse::<i64>().ok()?;
    Some((date, name, value))
}

/// Load the whitelist. Missing file is the one fatal input condition.
pub fn load_whitelist(path: &Path) -> Result<Whitelist, BakeError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BakeError::WhitelistMissing {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(BakeError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let whitelist = Whitelist::from_reader(file).map_err(|source| BakeError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    info!(entries = whitelist.len(), "loaded whitelist from {}", path.display());
    Ok(whitelist)
}

/// Load the raw series, applying the whitelist filter while reading.
pub fn load_series(
    path: &Path,
    whitelist: &Whitelist,
) -> Result<(SeriesHistory, LoadStats), BakeError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("series file {} not found, baking an empty series", path.display());
            return Ok((SeriesHistory::new(), LoadStats::default()));
        }
        Err(source) => {
            return Err(BakeError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let (history, stats) =
        SeriesHistory::from_reader(file, whitelist).map_err(|source| BakeError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

    if stats.rows_malformed > 0 {
        warn!(skipped = stats.rows_malformed, "skipped malformed series rows");
    }
    info!(
        days = history.day_count(),
        kept = stats.rows_kept,
        filtered = stats.rows_not_whitelisted,
        "loaded series from {}",
        path.display()
    );
    Ok((history, stats))
}
