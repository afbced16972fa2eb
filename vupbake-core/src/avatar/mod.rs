//! Avatar acquisition.
//!
//! Every target entity ends a bake with an image on disk: either a downloaded
//! buffer that passed the integrity check, or the embedded placeholder. The
//! network is reached through the [`ImageTransport`] and [`EntityDirectory`]
//! traits so the whole fallback chain can run against mocks.

pub mod acquirer;
pub mod circuit_breaker;
pub mod directory;
pub mod integrity;
pub mod retry;
pub mod store;
pub mod transport;

pub use acquirer::{AvatarAcquirer, AvatarOutcome};
pub use circuit_breaker::CircuitBreaker;
pub use directory::{EntityDirectory, NoDirectory, VtbsDirectory};
pub use integrity::{check_integrity, verify_download, ImageKind, IntegrityError};
pub use retry::{RetryExhausted, RetryPolicy, RetryState, Retryable};
pub use store::{AssetVerdict, AvatarStore, StoredAsset, PLACEHOLDER_PNG};
pub use transport::{normalize_url, FetchedImage, HttpTransport, ImageTransport, OfflineTransport};

use serde::Serialize;
use thiserror::Error;

/// Failure of a single acquisition attempt. Never fatal for a run.
#[derive(Debug, Error)]
pub enum AvatarError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("blocked by image host (HTTP {status})")]
    Blocked { status: u16 },

    #[error("unexpected HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("content-length mismatch: declared {declared} bytes, received {received}")]
    LengthMismatch { declared: u64, received: usize },

    #[error("integrity check failed: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("directory lookup failed: {0}")]
    Directory(String),

    #[error("entity directory index unavailable for this run")]
    DirectoryUnavailable,

    #[error("'{name}' not found in entity directory")]
    NotInDirectory { name: String },

    #[error("entity directory has no avatar URL for '{name}'")]
    NoFaceUrl { name: String },

    #[error("image host unavailable (circuit breaker open)")]
    CircuitOpen,

    #[error("network disabled (offline mode)")]
    Offline,

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl Retryable for AvatarError {
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AvatarError::CircuitOpen
                | AvatarError::Offline
                | AvatarError::Client(_)
                | AvatarError::DirectoryUnavailable
                | AvatarError::NotInDirectory { .. }
                | AvatarError::NoFaceUrl { .. }
        )
    }
}

/// Terminal state of an entity's avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AvatarState {
    Valid(AssetSource),
    Placeholder,
}

/// Where a valid asset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetSource {
    /// Already on disk and intact.
    Existing,
    /// Whitelist face URL.
    Primary,
    /// URL resolved through the entity directory.
    Fallback,
}
