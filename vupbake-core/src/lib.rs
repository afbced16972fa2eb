//! vupbake core: turns a raw follower time-series into a baked visualization dataset.
//!
//! Pipeline stages, leaf-first:
//! - Loader: whitelist and raw series CSV parsing, first-stage whitelist filter
//! - Selector: per-day top-K ranking unioned into the target set
//! - Interpolator: forward-fill of missing daily values for target entities
//! - Avatar acquisition: integrity-checked downloads with retry, directory fallback, placeholder
//! - Color resolution: override table, dominant-color extraction, default gray
//! - Emitter: chronological walk with day-over-day deltas into the output CSV

pub mod avatar;
pub mod color;
pub mod config;
pub mod emit;
pub mod error;
pub mod pipeline;
pub mod series;

pub use config::{BakeConfig, ConfigError};
pub use error::BakeError;
pub use pipeline::{
    avatar_status, bake, repair_avatars, AvatarStatus, BakeDeps, BakeProgress, BakeStage,
    BakeSummary, EntityReport, RepairSummary, SilentProgress, TracingProgress,
};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: state objects handed between stages are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<series::SeriesHistory>();
        require_sync::<series::SeriesHistory>();
        require_send::<series::TargetSet>();
        require_sync::<series::TargetSet>();
        require_send::<series::Whitelist>();
        require_sync::<series::Whitelist>();
        require_send::<color::ColorEntry>();
        require_sync::<color::ColorEntry>();
        require_send::<emit::OutputRow>();
        require_sync::<emit::OutputRow>();
        require_send::<avatar::CircuitBreaker>();
        require_sync::<avatar::CircuitBreaker>();
        require_send::<BakeConfig>();
        require_sync::<BakeConfig>();
        require_send::<BakeSummary>();
        require_sync::<BakeSummary>();
    }
}
