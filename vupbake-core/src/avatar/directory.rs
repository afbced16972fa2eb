//! Entity directory lookups for the fallback avatar URL.
//!
//! Whitelist face URLs go stale when an entity changes avatar. The directory
//! service maps a display name to a numeric id (`/v1/short`) and an id to its
//! current detail record (`/v1/detail/{mid}`), whose `face` field is fresh.

use super::AvatarError;
use crate::config::AvatarConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

pub trait EntityDirectory {
    /// Current avatar URL for `name`.
    fn lookup_face(&self, name: &str) -> Result<String, AvatarError>;
}

/// Directory that knows nobody. Used for offline runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDirectory;

impl EntityDirectory for NoDirectory {
    fn lookup_face(&self, _name: &str) -> Result<String, AvatarError> {
        Err(AvatarError::Offline)
    }
}

#[derive(Debug, Deserialize)]
struct ShortEntry {
    mid: u64,
    uname: String,
}

#[derive(Debug, Deserialize)]
struct Detail {
    face: Option<String>,
}

/// Client for the vtbs.moe-style directory API.
pub struct VtbsDirectory {
    client: reqwest::blocking::Client,
    base_url: String,
    /// Name → mid, fetched once per run. `None` records a failed fetch so a
    /// dead directory is not asked again for every entity.
    index: OnceLock<Option<HashMap<String, u64>>>,
}

impl VtbsDirectory {
    pub fn new(config: &AvatarConfig) -> Result<Self, AvatarError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.directory_timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| AvatarError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.directory_url.trim_end_matches('/').to_string(),
            index: OnceLock::new(),
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, AvatarError> {
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| AvatarError::Directory(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AvatarError::Directory(format!("HTTP {status} for {url}")));
        }
        resp.json()
            .map_err(|e| AvatarError::Directory(format!("unexpected response from {url}: {e}")))
    }

    fn fetch_index(&self) -> Result<HashMap<String, u64>, AvatarError> {
        let entries: Vec<ShortEntry> = self.get_json(&format!("{}/v1/short", self.base_url))?;
        debug!(entries = entries.len(), "fetched directory index");
        Ok(build_index(entries))
    }

    fn index(&self) -> Option<&HashMap<String, u64>> {
        self.index
            .get_or_init(|| match self.fetch_index() {
                Ok(index) => Some(index),
                Err(e) => {
                    warn!("directory index unavailable, fallback lookups disabled: {e}");
                    None
                }
            })
            .as_ref()
    }
}

/// Names are stored the way the whitelist writes them: ASCII commas become
/// full-width so they survive the naive CSV format.
fn build_index(entries: Vec<ShortEntry>) -> HashMap<String, u64> {
    entries
        .into_iter()
        .map(|e| (e.uname.replace(',', "，"), e.mid))
        .collect()
}

impl EntityDirectory for VtbsDirectory {
    fn lookup_face(&self, name: &str) -> Result<String, AvatarError> {
        let index = self.index().ok_or(AvatarError::DirectoryUnavailable)?;
        let mid = index.get(name).ok_or_else(|| AvatarError::NotInDirectory {
            name: name.to_string(),
        })?;

        let detail: Detail = self.get_json(&format!("{}/v1/detail/{mid}", self.base_url))?;
        detail
            .face
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| AvatarError::NoFaceUrl {
                name: name.to_string(),
            })
    }
}
