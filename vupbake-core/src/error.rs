//! Fatal error tier for a bake run.
//!
//! Everything below this tier (malformed rows, failed downloads, failed color
//! extraction) is recovered inside its stage and never surfaces here.

use crate::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BakeError {
    #[error("whitelist file not found: {} (eligibility cannot be determined)", path.display())]
    WhitelistMissing { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to write output dataset {}: {reason}", path.display())]
    OutputWrite { path: PathBuf, reason: String },

    #[error("avatar store error for {}: {source}", path.display())]
    AvatarStore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
