//! Bake orchestration.
//!
//! `load → select → fill → per-entity (avatar, color) → emit → hash`.
//! Entities are processed one at a time in name order. Network access and
//! color extraction come in through [`BakeDeps`] so a whole bake can run
//! against mocks.

use crate::avatar::{
    AssetSource, AssetVerdict, AvatarAcquirer, AvatarState, AvatarStore, EntityDirectory,
    ImageTransport,
};
use crate::color::{ColorEntry, ColorExtractor, ColorOrigin, ColorResolver};
use crate::config::BakeConfig;
use crate::emit::write_dataset_file;
use crate::error::BakeError;
use crate::series::{forward_fill, load_series, load_whitelist, select_targets, LoadStats};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// External collaborators of a bake.
#[derive(Clone, Copy)]
pub struct BakeDeps<'a> {
    pub transport: &'a dyn ImageTransport,
    pub directory: &'a dyn EntityDirectory,
    pub extractor: &'a dyn ColorExtractor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BakeStage {
    Load,
    Select,
    Fill,
    Assets,
    Emit,
}

/// What happened to one target entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReport {
    pub avatar: AvatarState,
    pub attempts: u32,
    pub color: ColorEntry,
}

/// Progress callback for a bake.
pub trait BakeProgress {
    fn on_stage(&self, stage: BakeStage);

    fn on_entity_start(&self, name: &str, index: usize, total: usize);

    fn on_entity_complete(&self, name: &str, index: usize, total: usize, report: &EntityReport);

    fn on_complete(&self, summary: &BakeSummary);
}

/// Progress reporter that logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl BakeProgress for TracingProgress {
    fn on_stage(&self, stage: BakeStage) {
        debug!(?stage, "stage started");
    }

    fn on_entity_start(&self, name: &str, index: usize, total: usize) {
        debug!("[{}/{}] {name}", index + 1, total);
    }

    fn on_entity_complete(&self, name: &str, index: usize, total: usize, report: &EntityReport) {
        info!(
            avatar = ?report.avatar,
            color = %report.color.hex,
            "[{}/{}] {name}",
            index + 1,
            total
        );
    }

    fn on_complete(&self, summary: &BakeSummary) {
        info!(
            rows = summary.rows_written,
            targets = summary.targets,
            hash = %summary.dataset_hash,
            "bake complete: {}",
            summary.output.display()
        );
    }
}

/// Progress reporter that reports nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl BakeProgress for SilentProgress {
    fn on_stage(&self, _stage: BakeStage) {}
    fn on_entity_start(&self, _name: &str, _index: usize, _total: usize) {}
    fn on_entity_complete(&self, _name: &str, _index: usize, _total: usize, _report: &EntityReport) {}
    fn on_complete(&self, _summary: &BakeSummary) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AvatarCounts {
    pub existing: usize,
    pub downloaded: usize,
    pub fallback: usize,
    pub placeholder: usize,
    pub network_attempts: u32,
}

impl AvatarCounts {
    fn record(&mut self, state: AvatarState, attempts: u32) {
        match state {
            AvatarState::Valid(AssetSource::Existing) => self.existing += 1,
            AvatarState::Valid(AssetSource::Primary) => self.downloaded += 1,
            AvatarState::Valid(AssetSource::Fallback) => self.fallback += 1,
            AvatarState::Placeholder => self.placeholder += 1,
        }
        self.network_attempts += attempts;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ColorCounts {
    pub overridden: usize,
    pub extracted: usize,
    pub defaulted: usize,
}

impl ColorCounts {
    fn record(&mut self, origin: ColorOrigin) {
        match origin {
            ColorOrigin::Override => self.overridden += 1,
            ColorOrigin::Extracted => self.extracted += 1,
            ColorOrigin::Default => self.defaulted += 1,
        }
    }
}

/// Outcome of a bake run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BakeSummary {
    pub whitelist_entries: usize,
    pub load: LoadStats,
    pub days: usize,
    pub targets: usize,
    pub filled: usize,
    pub avatars: AvatarCounts,
    pub colors: ColorCounts,
    pub rows_written: usize,
    pub output: PathBuf,
    /// BLAKE3 of the output file.
    pub dataset_hash: String,
}

/// Run a full bake.
pub fn bake(
    config: &BakeConfig,
    deps: BakeDeps<'_>,
    progress: &dyn BakeProgress,
) -> Result<BakeSummary, BakeError> {
    config.validate()?;
    let paths = &config.paths;

    progress.on_stage(BakeStage::Load);
    let whitelist = load_whitelist(&paths.whitelist)?;
    let (mut history, load) = load_series(&paths.series, &whitelist)?;

    progress.on_stage(BakeStage::Select);
    let targets = select_targets(&history, config.selection.top_k);
    info!(
        targets = targets.len(),
        top_k = config.selection.top_k,
        "selected target entities"
    );

    progress.on_stage(BakeStage::Fill);
    let filled = forward_fill(&mut history, &targets);
    info!(filled, "forward-filled missing days");

    progress.on_stage(BakeStage::Assets);
    let store = AvatarStore::new(&paths.avatar_dir);
    store.ensure_dir().map_err(|source| BakeError::AvatarStore {
        path: paths.avatar_dir.clone(),
        source,
    })?;
    let acquirer = AvatarAcquirer::new(
        &store,
        deps.transport,
        deps.directory,
        config.avatar.retry_policy(),
        config.avatar.min_bytes,
    );
    let mut resolver = ColorResolver::from_config(&config.color, deps.extractor)?;

    let mut avatars = AvatarCounts::default();
    let mut color_counts = ColorCounts::default();
    let mut colors = BTreeMap::new();
    let total = targets.len();
    let mut host_down_logged = false;

    for (index, name) in targets.iter().enumerate() {
        progress.on_entity_start(name, index, total);

        if !host_down_logged && !deps.transport.is_available() {
            warn!("image host unavailable, remaining avatars will use existing files or placeholders");
            host_down_logged = true;
        }

        let outcome = acquirer.ensure(name, whitelist.face_url(name))?;
        let color = resolver.resolve(name, &outcome.path).clone();

        avatars.record(outcome.state, outcome.attempts);
        color_counts.record(color.origin);
        colors.insert(name.to_string(), color.hex.clone());

        let report = EntityReport {
            avatar: outcome.state,
            attempts: outcome.attempts,
            color,
        };
        progress.on_entity_complete(name, index, total, &report);
    }

    progress.on_stage(BakeStage::Emit);
    let default_hex = config.color.default_rgb()?.to_hex();
    let rows_written = write_dataset_file(&paths.output, &history, &targets, &colors, &default_hex)?;
    let dataset_hash = hash_file(&paths.output)?;

    let summary = BakeSummary {
        whitelist_entries: whitelist.len(),
        load,
        days: history.day_count(),
        targets: total,
        filled,
        avatars,
        colors: color_counts,
        rows_written,
        output: paths.output.clone(),
        dataset_hash,
    };
    progress.on_complete(&summary);
    Ok(summary)
}

fn hash_file(path: &Path) -> Result<String, BakeError> {
    let bytes = std::fs::read(path).map_err(|source| BakeError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Outcome of an avatar repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairSummary {
    pub scanned: usize,
    pub placeholders: usize,
    pub fixed: Vec<String>,
    pub still_failed: Vec<String>,
}

/// Re-acquire every placeholder avatar through the entity directory.
///
/// Placeholders whose repair fails are left in place.
pub fn repair_avatars(
    config: &BakeConfig,
    deps: BakeDeps<'_>,
    progress: &dyn BakeProgress,
) -> Result<RepairSummary, BakeError> {
    config.validate()?;
    let store = AvatarStore::new(&config.paths.avatar_dir);
    let assets = scan_store(&store, config)?;

    let placeholders: Vec<&str> = assets
        .iter()
        .filter(|a| a.verdict == AssetVerdict::Placeholder)
        .map(|a| a.name.as_str())
        .collect();
    info!(
        scanned = assets.len(),
        placeholders = placeholders.len(),
        "scanned avatar directory"
    );

    let acquirer = AvatarAcquirer::new(
        &store,
        deps.transport,
        deps.directory,
        config.avatar.retry_policy(),
        config.avatar.min_bytes,
    );

    let mut summary = RepairSummary {
        scanned: assets.len(),
        placeholders: placeholders.len(),
        ..RepairSummary::default()
    };
    let mut resolver = ColorResolver::from_config(&config.color, deps.extractor)?;

    progress.on_stage(BakeStage::Assets);
    let total = placeholders.len();
    for (index, name) in placeholders.into_iter().enumerate() {
        progress.on_entity_start(name, index, total);
        let outcome = acquirer.repair(name)?;
        match outcome.state {
            AvatarState::Valid(_) => summary.fixed.push(name.to_string()),
            AvatarState::Placeholder => summary.still_failed.push(name.to_string()),
        }

        let report = EntityReport {
            avatar: outcome.state,
            attempts: outcome.attempts,
            color: resolver.resolve(name, &outcome.path).clone(),
        };
        progress.on_entity_complete(name, index, total, &report);
    }

    info!(
        fixed = summary.fixed.len(),
        failed = summary.still_failed.len(),
        "avatar repair finished"
    );
    Ok(summary)
}

/// Counts of stored avatars by verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AvatarStatus {
    pub valid: usize,
    pub placeholder: usize,
    pub corrupt: usize,
    pub placeholder_names: Vec<String>,
    pub corrupt_names: Vec<String>,
}

pub fn avatar_status(config: &BakeConfig) -> Result<AvatarStatus, BakeError> {
    let store = AvatarStore::new(&config.paths.avatar_dir);
    let mut status = AvatarStatus::default();
    for asset in scan_store(&store, config)? {
        match asset.verdict {
            AssetVerdict::Valid(_) => status.valid += 1,
            AssetVerdict::Placeholder => {
                status.placeholder += 1;
                status.placeholder_names.push(asset.name);
            }
            AssetVerdict::Corrupt(_) => {
                status.corrupt += 1;
                status.corrupt_names.push(asset.name);
            }
        }
    }
    Ok(status)
}

fn scan_store(
    store: &AvatarStore,
    config: &BakeConfig,
) -> Result<Vec<crate::avatar::StoredAsset>, BakeError> {
    store
        .scan(config.avatar.min_bytes, config.avatar.placeholder_max_bytes)
        .map_err(|source| BakeError::AvatarStore {
            path: store.dir().to_path_buf(),
            source,
        })
}
