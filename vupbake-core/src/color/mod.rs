//! Display colors for target entities.
//!
//! Resolution order per entity: override table, then the dominant color of
//! the stored avatar, then the configured default. Every failure below the
//! override table degrades to the next source; resolution never errors.

pub mod extract;

pub use extract::{ColorExtractor, ImageColorExtractor};

use crate::config::{ColorConfig, ConfigError};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb` (either case). Shorthand and alpha forms are rejected.
    pub fn from_hex(s: &str) -> Option<Self> {
        let hex = s.trim().strip_prefix('#')?;
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    /// Lowercase `#rrggbb`.
    pub fn to_hex(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Error)]
pub enum ColorError {
    #[error("failed to read avatar {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image has no opaque, non-white pixels")]
    NoUsablePixels,

    #[error("color quantization failed: {0}")]
    Quantize(#[from] color_thief::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorOrigin {
    Override,
    Extracted,
    Default,
}

/// Color assigned to one entity for the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColorEntry {
    pub hex: String,
    pub origin: ColorOrigin,
}

impl ColorEntry {
    fn new(rgb: Rgb, origin: ColorOrigin) -> Self {
        Self {
            hex: rgb.to_hex(),
            origin,
        }
    }
}

/// Memoizing resolver. Each entity is resolved at most once per run.
pub struct ColorResolver<'a> {
    overrides: BTreeMap<String, Rgb>,
    default: Rgb,
    extractor: &'a dyn ColorExtractor,
    cache: HashMap<String, ColorEntry>,
}

impl<'a> ColorResolver<'a> {
    pub fn new(
        overrides: BTreeMap<String, Rgb>,
        default: Rgb,
        extractor: &'a dyn ColorExtractor,
    ) -> Self {
        Self {
            overrides,
            default,
            extractor,
            cache: HashMap::new(),
        }
    }

    pub fn from_config(
        config: &ColorConfig,
        extractor: &'a dyn ColorExtractor,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.override_rgbs()?,
            config.default_rgb()?,
            extractor,
        ))
    }

    /// Color for `name`, extracting from the avatar at `avatar` when no
    /// override exists.
    pub fn resolve(&mut self, name: &str, avatar: &Path) -> &ColorEntry {
        if !self.cache.contains_key(name) {
            let entry = self.compute(name, avatar);
            self.cache.insert(name.to_string(), entry);
        }
        &self.cache[name]
    }

    pub fn get(&self, name: &str) -> Option<&ColorEntry> {
        self.cache.get(name)
    }

    /// Number of resolved entities per origin.
    pub fn origin_counts(&self) -> BTreeMap<ColorOrigin, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.cache.values() {
            *counts.entry(entry.origin).or_insert(0) += 1;
        }
        counts
    }

    fn compute(&self, name: &str, avatar: &Path) -> ColorEntry {
        if let Some(rgb) = self.overrides.get(name) {
            return ColorEntry::new(*rgb, ColorOrigin::Override);
        }
        match extract::extract_from_path(self.extractor, avatar) {
            Ok(rgb) => ColorEntry::new(rgb, ColorOrigin::Extracted),
            Err(e) => {
                debug!(entity = name, "color extraction failed, using default: {e}");
                ColorEntry::new(self.default, ColorOrigin::Default)
            }
        }
    }
}
