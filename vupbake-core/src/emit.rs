//! Output dataset emission.
//!
//! Columns: `date,name,value,inc,color`. Dates ascending; within a date,
//! target entities in name order, only those present in the post-fill
//! snapshot. `inc` is the difference to the entity's previously *emitted*
//! value, 0 on its first row. An entity absent for a stretch of days gets a
//! delta spanning the whole gap on reappearance.

use crate::error::BakeError;
use crate::series::{SeriesHistory, TargetSet};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::Path;

pub const HEADER: [&str; 5] = ["date", "name", "value", "inc", "color"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    pub date: NaiveDate,
    pub name: String,
    pub value: i64,
    pub delta: i64,
    pub color: String,
}

impl OutputRow {
    fn record(&self) -> [String; 5] {
        [
            self.date.format("%Y-%m-%d").to_string(),
            self.name.clone(),
            self.value.to_string(),
            self.delta.to_string(),
            self.color.clone(),
        ]
    }
}

/// Previous-emitted-value tracker.
#[derive(Debug, Default)]
pub struct Emitter {
    previous: HashMap<String, i64>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_row(&mut self, date: NaiveDate, name: &str, value: i64, color: &str) -> OutputRow {
        let delta = match self.previous.insert(name.to_string(), value) {
            Some(prev) => value.saturating_sub(prev),
            None => 0,
        };
        OutputRow {
            date,
            name: name.to_string(),
            value,
            delta,
            color: color.to_string(),
        }
    }
}

/// Write the dataset to `out`, returning the number of data rows.
///
/// Entities missing from `colors` get `fallback_color`. Each row is flushed
/// as soon as it is complete, so an interrupted write never ends mid-row.
pub fn write_dataset<W: Write>(
    out: W,
    history: &SeriesHistory,
    targets: &TargetSet,
    colors: &BTreeMap<String, String>,
    fallback_color: &str,
) -> Result<usize, csv::Error> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(HEADER)?;
    wtr.flush()?;

    let mut emitter = Emitter::new();
    let mut rows = 0;
    for (date, snapshot) in history.days() {
        for name in targets.iter() {
            let Some(&value) = snapshot.get(name) else {
                continue;
            };
            let color = colors.get(name).map_or(fallback_color, String::as_str);
            let row = emitter.next_row(date, name, value, color);
            wtr.write_record(row.record())?;
            wtr.flush()?;
            rows += 1;
        }
    }
    Ok(rows)
}

/// [`write_dataset`] into a file, creating parent directories.
pub fn write_dataset_file(
    path: &Path,
    history: &SeriesHistory,
    targets: &TargetSet,
    colors: &BTreeMap<String, String>,
    fallback_color: &str,
) -> Result<usize, BakeError> {
    let output_error = |reason: String| BakeError::OutputWrite {
        path: path.to_path_buf(),
        reason,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| output_error(e.to_string()))?;
    }
    let file = File::create(path).map_err(|e| output_error(e.to_string()))?;
    write_dataset(LineWriter::new(file), history, targets, colors, fallback_color)
        .map_err(|e| output_error(e.to_string()))
}
