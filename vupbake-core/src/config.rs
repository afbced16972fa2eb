//! Bake configuration, loaded from TOML.
//!
//! Every field has a default so an empty file (or no file at all) yields a
//! working configuration. Colors are validated at load time so a typo in the
//! override table fails the run before any network traffic happens.

use crate::avatar::RetryPolicy;
use crate::color::Rgb;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid color '{value}' for {field}: expected #rrggbb")]
    InvalidColor { field: String, value: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Top-level configuration for a bake run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BakeConfig {
    pub paths: PathsConfig,
    pub selection: SelectionConfig,
    pub avatar: AvatarConfig,
    pub color: ColorConfig,
}

/// Input and output locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Curated whitelist CSV (`mid,name,follower,face`).
    pub whitelist: PathBuf,
    /// Raw series CSV (`date,name,value`).
    pub series: PathBuf,
    /// Baked dataset CSV (`date,name,value,inc,color`).
    pub output: PathBuf,
    /// One image file per target entity.
    pub avatar_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            whitelist: PathBuf::from("vup_list.csv"),
            series: PathBuf::from("data.csv"),
            output: PathBuf::from("baked_data.csv"),
            avatar_dir: PathBuf::from("avatars"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelectionConfig {
    /// Entities ranked within this many places on any single day are kept.
    pub top_k: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self { top_k: 150 }
    }
}

/// Avatar download, integrity and fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AvatarConfig {
    /// Attempts per URL (primary and fallback each get this many).
    pub max_attempts: u32,
    /// Base backoff; attempt n waits `backoff_ms * n` before attempt n + 1.
    pub backoff_ms: u64,
    /// Per-request timeout for image downloads.
    pub timeout_secs: u64,
    /// Buffers shorter than this are rejected by the integrity check.
    pub min_bytes: usize,
    /// Files smaller than this are treated as placeholders by `retry-avatars`.
    pub placeholder_max_bytes: u64,
    pub user_agent: String,
    pub referer: String,
    pub origin: String,
    /// Base URL of the entity directory service used for fallback lookups.
    pub directory_url: String,
    pub directory_timeout_secs: u64,
    /// Consecutive blocked responses before the image host is left alone.
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: u64,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1000,
            timeout_secs: 10,
            min_bytes: 200,
            placeholder_max_bytes: 500,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36"
                .into(),
            referer: "https://www.bilibili.com/".into(),
            origin: "https://www.bilibili.com".into(),
            directory_url: "https://api.vtbs.moe".into(),
            directory_timeout_secs: 15,
            breaker_threshold: 5,
            breaker_cooldown_secs: 600,
        }
    }
}

impl AvatarConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_secs(self.directory_timeout_secs)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ColorConfig {
    /// Used when extraction fails.
    pub default: String,
    /// Per-entity colors that always win over extraction.
    pub overrides: BTreeMap<String, String>,
}

impl Default for ColorConfig {
    fn default() -> Self {
        let mut overrides = BTreeMap::new();
        overrides.insert("阿萨Aza".to_string(), "#B8E994".to_string());
        overrides.insert("永雏塔菲".to_string(), "#ff85c8".to_string());
        Self {
            default: "#777777".into(),
            overrides,
        }
    }
}

impl ColorConfig {
    pub fn default_rgb(&self) -> Result<Rgb, ConfigError> {
        Rgb::from_hex(&self.default).ok_or_else(|| ConfigError::InvalidColor {
            field: "color.default".into(),
            value: self.default.clone(),
        })
    }

    /// Parsed override table.
    pub fn override_rgbs(&self) -> Result<BTreeMap<String, Rgb>, ConfigError> {
        self.overrides
            .iter()
            .map(|(name, hex)| {
                Rgb::from_hex(hex)
                    .map(|rgb| (name.clone(), rgb))
                    .ok_or_else(|| ConfigError::InvalidColor {
                        field: format!("color.overrides.{name}"),
                        value: hex.clone(),
                    })
            })
            .collect()
    }
}

impl BakeConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.selection.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "selection.top_k",
                reason: "must be at least 1".into(),
            });
        }
        if self.avatar.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "avatar.max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        self.color.default_rgb()?;
        self.color.override_rgbs()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = BakeConfig::from_toml("").unwrap();
        assert_eq!(config, BakeConfig::default());
        assert_eq!(config.selection.top_k, 150);
        assert_eq!(config.avatar.max_attempts, 3);
        assert_eq!(config.avatar.min_bytes, 200);
        assert_eq!(config.color.default, "#777777");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = BakeConfig::from_toml(
            r##"
[selection]
top_k = 20

[paths]
output = "out/baked.csv"

[color.overrides]
"Someone" = "#010203"
"##,
        )
        .unwrap();

        assert_eq!(config.selection.top_k, 20);
        assert_eq!(config.paths.output, PathBuf::from("out/baked.csv"));
        assert_eq!(config.paths.whitelist, PathBuf::from("vup_list.csv"));
        assert_eq!(config.color.overrides.len(), 1);
        assert_eq!(config.avatar.backoff_ms, 1000);
    }

    #[test]
    fn rejects_bad_override_color() {
        let err = BakeConfig::from_toml(
            r##"
[color.overrides]
"Someone" = "red"
"##,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidColor { .. }));
    }

    #[test]
    fn rejects_zero_top_k() {
        let err = BakeConfig::from_toml("[selection]\ntop_k = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "selection.top_k",
                ..
            }
        ));
    }

    #[test]
    fn toml_roundtrip() {
        let config = BakeConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = BakeConfig::from_toml(&text).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn builtin_overrides_parse() {
        let overrides = BakeConfig::default().color.override_rgbs().unwrap();
        assert_eq!(overrides["永雏塔菲"], Rgb::new(0xff, 0x85, 0xc8));
    }

    #[test]
    fn retry_policy_from_config() {
        let policy = AvatarConfig::default().retry_policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
    }
}
