//! Series ingestion and shaping: load, select, fill.

pub mod fill;
pub mod loader;
pub mod select;

pub use fill::{forward_fill, ForwardFill};
pub use loader::{
    load_series, load_whitelist, DailySnapshot, LoadStats, SeriesHistory, Whitelist, WhitelistRow,
};
pub use select::{rank_day, select_targets, TargetSet};
