//! Per-entity avatar state machine.
//!
//! ```text
//! Check:   on disk + intact ─────────────────────────────▶ Valid(Existing)
//!          on disk + failing integrity ─▶ delete ─┐
//!          absent ────────────────────────────────┤
//! Missing: primary URL (retry policy) ────────────┼─ok──▶ Valid(Primary)
//!          directory lookup + URL (retry policy) ─┼─ok──▶ Valid(Fallback)
//!          everything failed ─────────────────────┴─────▶ Placeholder
//! ```
//!
//! Network and integrity failures are logged and absorbed here. Only failing
//! to write to the avatar directory is an error for the caller.

use super::directory::EntityDirectory;
use super::integrity::{check_integrity, verify_download};
use super::retry::{RetryExhausted, RetryPolicy};
use super::store::AvatarStore;
use super::transport::{normalize_url, ImageTransport};
use super::{AssetSource, AvatarError, AvatarState};
use crate::error::BakeError;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of running the state machine for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarOutcome {
    pub state: AvatarState,
    pub path: PathBuf,
    /// Network attempts spent on this entity.
    pub attempts: u32,
}

pub struct AvatarAcquirer<'a> {
    store: &'a AvatarStore,
    transport: &'a dyn ImageTransport,
    directory: &'a dyn EntityDirectory,
    policy: RetryPolicy,
    min_bytes: usize,
}

impl<'a> AvatarAcquirer<'a> {
    pub fn new(
        store: &'a AvatarStore,
        transport: &'a dyn ImageTransport,
        directory: &'a dyn EntityDirectory,
        policy: RetryPolicy,
        min_bytes: usize,
    ) -> Self {
        Self {
            store,
            transport,
            directory,
            policy,
            min_bytes,
        }
    }

    /// Make sure `name` has a usable avatar on disk.
    pub fn ensure(&self, name: &str, primary_url: Option<&str>) -> Result<AvatarOutcome, BakeError> {
        let path = self.store.path_for(name);

        if let Some(bytes) = self.store.read(name).map_err(|e| store_error(&path, e))? {
            match check_integrity(&bytes, self.min_bytes) {
                Ok(_) => {
                    return Ok(AvatarOutcome {
                        state: AvatarState::Valid(AssetSource::Existing),
                        path,
                        attempts: 0,
                    })
                }
                Err(e) => {
                    debug!(entity = name, "discarding stored avatar: {e}");
                    self.store.remove(name).map_err(|e| store_error(&path, e))?;
                }
            }
        }

        let mut attempts = 0;
        let primary = primary_url.map(normalize_url);

        if !self.transport.is_available() {
            debug!(entity = name, "image host unavailable, skipping download");
        } else if let Some(url) = &primary {
            match self.download(name, url) {
                Ok((bytes, used)) => return self.accept(name, &bytes, AssetSource::Primary, used),
                Err(exhausted) => {
                    attempts += exhausted.attempts;
                    warn!(
                        entity = name,
                        attempts = exhausted.attempts,
                        "primary avatar failed: {}",
                        exhausted.last_error
                    );
                }
            }
        } else {
            debug!(entity = name, "no primary avatar URL");
        }

        match self.fallback(name, primary.as_deref()) {
            Some(Ok((bytes, used))) => {
                return self.accept(name, &bytes, AssetSource::Fallback, attempts + used)
            }
            Some(Err(exhausted)) => attempts += exhausted.attempts,
            None => {}
        }

        let path = self.store.write_placeholder(name).map_err(|e| store_error(&path, e))?;
        info!(entity = name, "using placeholder avatar");
        Ok(AvatarOutcome {
            state: AvatarState::Placeholder,
            path,
            attempts,
        })
    }

    /// Re-acquire an entity currently holding a placeholder, through the
    /// directory only. The placeholder is kept when that fails too.
    pub fn repair(&self, name: &str) -> Result<AvatarOutcome, BakeError> {
        match self.fallback(name, None) {
            Some(Ok((bytes, used))) => self.accept(name, &bytes, AssetSource::Fallback, used),
            Some(Err(exhausted)) => Ok(AvatarOutcome {
                state: AvatarState::Placeholder,
                path: self.store.path_for(name),
                attempts: exhausted.attempts,
            }),
            None => Ok(AvatarOutcome {
                state: AvatarState::Placeholder,
                path: self.store.path_for(name),
                attempts: 0,
            }),
        }
    }

    /// Resolve and download the directory URL. `None` when no download was
    /// attempted (host unavailable, lookup failed, or nothing new to try).
    fn fallback(
        &self,
        name: &str,
        already_tried: Option<&str>,
    ) -> Option<Result<(Vec<u8>, u32), RetryExhausted<AvatarError>>> {
        if !self.transport.is_available() {
            debug!(entity = name, "image host unavailable, skipping fallback");
            return None;
        }

        let url = match self.policy.run(|_| self.directory.lookup_face(name)) {
            Ok(url) => normalize_url(&url),
            Err(exhausted) => {
                warn!(
                    entity = name,
                    attempts = exhausted.attempts,
                    "fallback lookup failed: {}",
                    exhausted.last_error
                );
                return None;
            }
        };
        if already_tried == Some(url.as_str()) {
            debug!(entity = name, "directory returned the same URL as the whitelist");
            return None;
        }

        let result = self.download(name, &url);
        if let Err(exhausted) = &result {
            warn!(
                entity = name,
                attempts = exhausted.attempts,
                "fallback avatar failed: {}",
                exhausted.last_error
            );
        }
        Some(result)
    }

    /// Fetch and verify `url` under the retry policy. On success also returns
    /// the attempt number that succeeded.
    fn download(
        &self,
        name: &str,
        url: &str,
    ) -> Result<(Vec<u8>, u32), RetryExhausted<AvatarError>> {
        self.policy.run(|attempt| {
            let fetched = self.transport.fetch(url)?;
            match verify_download(&fetched, self.min_bytes) {
                Ok(kind) => {
                    debug!(entity = name, attempt, ?kind, bytes = fetched.bytes.len(), "downloaded avatar");
                    Ok((fetched.bytes, attempt))
                }
                Err(e) => {
                    debug!(entity = name, attempt, "rejected download from {url}: {e}");
                    Err(e)
                }
            }
        })
    }

    fn accept(
        &self,
        name: &str,
        bytes: &[u8],
        source: AssetSource,
        attempts: u32,
    ) -> Result<AvatarOutcome, BakeError> {
        let path = self.store.path_for(name);
        let path = self.store.write(name, bytes).map_err(|e| store_error(&path, e))?;
        Ok(AvatarOutcome {
            state: AvatarState::Valid(source),
            path,
            attempts,
        })
    }
}

fn store_error(path: &Path, source: std::io::Error) -> BakeError {
    BakeError::AvatarStore {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::integrity::fixtures;
    use crate::avatar::store::PLACEHOLDER_PNG;
    use crate::avatar::transport::{FetchedImage, OfflineTransport};
    use crate::avatar::NoDirectory;
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;

    /// Replays queued responses per URL; an exhausted queue answers 404.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: RefCell<HashMap<String, VecDeque<Result<FetchedImage, AvatarError>>>>,
        calls: RefCell<Vec<String>>,
    }

    impl ScriptedTransport {
        fn push(&self, url: &str, response: Result<FetchedImage, AvatarError>) {
            self.responses
                .borrow_mut()
                .entry(url.to_string())
                .or_default()
                .push_back(response);
        }

        fn push_bytes(&self, url: &str, bytes: Vec<u8>) {
            let declared_len = Some(bytes.len() as u64);
            self.push(url, Ok(FetchedImage { bytes, declared_len }));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl ImageTransport for ScriptedTransport {
        fn fetch(&self, url: &str) -> Result<FetchedImage, AvatarError> {
            self.calls.borrow_mut().push(url.to_string());
            self.responses
                .borrow_mut()
                .get_mut(url)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Err(AvatarError::HttpStatus { status: 404 }))
        }
    }

    struct MapDirectory(HashMap<String, String>);

    impl EntityDirectory for MapDirectory {
        fn lookup_face(&self, name: &str) -> Result<String, AvatarError> {
            self.0.get(name).cloned().ok_or_else(|| AvatarError::NotInDirectory {
                name: name.to_string(),
            })
        }
    }

    /// Fails the first `failures` lookups with a transient error.
    struct FlakyDirectory {
        failures: u32,
        lookups: RefCell<u32>,
        url: &'static str,
    }

    impl EntityDirectory for FlakyDirectory {
        fn lookup_face(&self, _name: &str) -> Result<String, AvatarError> {
            let mut lookups = self.lookups.borrow_mut();
            *lookups += 1;
            if *lookups <= self.failures {
                Err(AvatarError::Directory("HTTP 502 Bad Gateway".into()))
            } else {
                Ok(self.url.to_string())
            }
        }
    }

    fn directory(entries: &[(&str, &str)]) -> MapDirectory {
        MapDirectory(
            entries
                .iter()
                .map(|(n, u)| (n.to_string(), u.to_string()))
                .collect(),
        )
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    const PRIMARY: &str = "https://img.test/a.jpg";
    const FALLBACK: &str = "https://img.test/a-new.jpg";

    #[test]
    fn intact_file_is_kept_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let store = AvatarStore::new(dir.path());
        let original = fixtures::jpeg(500);
        store.write("A", &original).unwrap();
        let transport = ScriptedTransport::default();

        let acquirer = AvatarAcquirer::new(&store, &transport, &NoDirectory, policy(), 200);
        let outcome = acquirer.ensure("A", Some(PRIMARY)).unwrap();

        assert_eq!(outcome.state, AvatarState::Valid(AssetSource::Existing));
        assert_eq!(outcome.attempts, 0);
        assert!(transport.calls().is_empty());
        assert_eq!(store.read("A").unwrap().unwrap(), original);
    }

    #[test]
    fn corrupt_file_is_replaced_from_primary() {
        let dir = tempfile::tempdir().unwrap();
        let store = AvatarStore::new(dir.path());
        store.write_placeholder("A").unwrap();
        let transport = ScriptedTransport::default();
        let fresh = fixtures::png(800);
        transport.push_bytes(PRIMARY, fresh.clone());

        let acquirer = AvatarAcquirer::new(&store, &transport, &NoDirectory, policy(), 200);
        let outcome = acquirer.ensure("A", Some(PRIMARY)).unwrap();

        assert_eq!(outcome.state, AvatarState::Valid(AssetSource::Primary));
        assert_eq!(store.read("A").unwrap().unwrap(), fresh);
    }

    #[test]
    fn primary_is_normalized_to_https() {
        let dir = tempfile::tempdir().unwrap();
        let store = AvatarStore::new(dir.path());
        let transport = ScriptedTransport::default();
        transport.push_bytes(PRIMARY, fixtures::jpeg(400));

        let acquirer = AvatarAcquirer::new(&store, &transport, &NoDirectory, policy(), 200);
        let outcome = acquirer.ensure("A", Some("http://img.test/a.jpg")).unwrap();

        assert_eq!(outcome.state, AvatarState::Valid(AssetSource::Primary));
        assert_eq!(transport.calls(), vec![PRIMARY.to_string()]);
    }

    #[test]
    fn retries_until_a_valid_buffer_arrives() {
        let dir = tempfile::tempdir().unwrap();
        let store = AvatarStore::new(dir.path());
        let transport = ScriptedTransport::default();
        transport.push(PRIMARY, Err(AvatarError::Timeout("slow".into())));
        let mut truncated = fixtures::jpeg(600);
        truncated.truncate(400);
        transport.push_bytes(PRIMARY, truncated);
        transport.push_bytes(PRIMARY, fixtures::jpeg(600));

        let acquirer = AvatarAcquirer::new(&store, &transport, &NoDirectory, policy(), 200);
        let outcome = acquirer.ensure("A", Some(PRIMARY)).unwrap();

        assert_eq!(outcome.state, AvatarState::Valid(AssetSource::Primary));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(transport.calls().len(), 3);
    }

    #[test]
    fn content_length_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = AvatarStore::new(dir.path());
        let transport = ScriptedTransport::default();
        for _ in 0..3 {
            transport.push(
                PRIMARY,
                Ok(FetchedImage {
                    bytes: fixtures::jpeg(400),
                    declared_len: Some(4000),
                }),
            );
        }

        let acquirer = AvatarAcquirer::new(&store, &transport, &NoDirectory, policy(), 200);
        let outcome = acquirer.ensure("A", Some(PRIMARY)).unwrap();

        assert_eq!(outcome.state, AvatarState::Placeholder);
    }

    #[test]
    fn falls_back_to_directory_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = AvatarStore::new(dir.path());
        let transport = ScriptedTransport::default();
        transport.push(PRIMARY, Err(AvatarError::Blocked { status: 403 }));
        transport.push_bytes(FALLBACK, fixtures::webp(900));
        let directory = directory(&[("A", "//img.test/a-new.jpg")]);

        let acquirer = AvatarAcquirer::new(&store, &transport, &directory, policy(), 200);
        let outcome = acquirer.ensure("A", Some(PRIMARY)).unwrap();

        assert_eq!(outcome.state, AvatarState::Valid(AssetSource::Fallback));
        assert_eq!(outcome.attempts, 4);
        let calls = transport.calls();
        assert_eq!(calls.iter().filter(|u| *u == PRIMARY).count(), 3);
        assert_eq!(calls.last().map(String::as_str), Some(FALLBACK));
    }

    #[test]
    fn missing_primary_goes_straight_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = AvatarStore::new(dir.path());
        let transport = ScriptedTransport::default();
        transport.push_bytes(FALLBACK, fixtures::gif(300));
        let directory = directory(&[("A", FALLBACK)]);

        let acquirer = AvatarAcquirer::new(&store, &transport, &directory, policy(), 200);
        let outcome = acquirer.ensure("A", None).unwrap();

        assert_eq!(outcome.state, AvatarState::Valid(AssetSource::Fallback));
        assert_eq!(transport.calls(), vec![FALLBACK.to_string()]);
    }

    #[test]
    fn same_url_from_directory_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = AvatarStore::new(dir.path());
        let transport = ScriptedTransport::default();
        let directory = directory(&[("A", "http://img.test/a.jpg")]);

        let acquirer = AvatarAcquirer::new(&store, &transport, &directory, policy(), 200);
        let outcome = acquirer.ensure("A", Some(PRIMARY)).unwrap();

        assert_eq!(outcome.state, AvatarState::Placeholder);
        assert_eq!(transport.calls().len(), 3);
    }

    #[test]
    fn everything_failing_writes_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let store = AvatarStore::new(dir.path());
        let transport = ScriptedTransport::default();
        let directory = directory(&[("A", FALLBACK)]);

        let acquirer = AvatarAcquirer::new(&store, &transport, &directory, policy(), 200);
        let outcome = acquirer.ensure("A", Some(PRIMARY)).unwrap();

        assert_eq!(outcome.state, AvatarState::Placeholder);
        assert_eq!(outcome.attempts, 6);
        assert_eq!(store.read("A").unwrap().unwrap(), PLACEHOLDER_PNG);
    }

    #[test]
    fn offline_never_calls_out() {
        let dir = tempfile::tempdir().unwrap();
        let store = AvatarStore::new(dir.path());

        let acquirer = AvatarAcquirer::new(&store, &OfflineTransport, &NoDirectory, policy(), 200);
        let outcome = acquirer.ensure("A", Some(PRIMARY)).unwrap();

        assert_eq!(outcome.state, AvatarState::Placeholder);
        assert_eq!(outcome.attempts, 0);
    }

    #[test]
    fn repair_overwrites_placeholder_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = AvatarStore::new(dir.path());
        store.write_placeholder("A").unwrap();
        let transport = ScriptedTransport::default();
        transport.push_bytes(FALLBACK, fixtures::jpeg(700));
        let directory = directory(&[("A", FALLBACK)]);

        let acquirer = AvatarAcquirer::new(&store, &transport, &directory, policy(), 200);
        let outcome = acquirer.repair("A").unwrap();

        assert_eq!(outcome.state, AvatarState::Valid(AssetSource::Fallback));
        assert_eq!(store.read("A").unwrap().unwrap().len(), 700);
    }

    #[test]
    fn failed_repair_keeps_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let store = AvatarStore::new(dir.path());
        store.write_placeholder("A").unwrap();
        let transport = ScriptedTransport::default();

        let acquirer = AvatarAcquirer::new(&store, &transport, &NoDirectory, policy(), 200);
        let outcome = acquirer.repair("A").unwrap();

        assert_eq!(outcome.state, AvatarState::Placeholder);
        assert_eq!(store.read("A").unwrap().unwrap(), PLACEHOLDER_PNG);
    }

    #[test]
    fn transient_lookup_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = AvatarStore::new(dir.path());
        store.write_placeholder("A").unwrap();
        let transport = ScriptedTransport::default();
        transport.push_bytes(FALLBACK, fixtures::jpeg(700));
        let directory = FlakyDirectory {
            failures: 2,
            lookups: RefCell::new(0),
            url: FALLBACK,
        };

        let acquirer = AvatarAcquirer::new(&store, &transport, &directory, policy(), 200);
        let outcome = acquirer.repair("A").unwrap();

        assert_eq!(outcome.state, AvatarState::Valid(AssetSource::Fallback));
        assert_eq!(*directory.lookups.borrow(), 3);
    }

    #[test]
    fn lookup_gives_up_after_policy_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let store = AvatarStore::new(dir.path());
        let transport = ScriptedTransport::default();
        let directory = FlakyDirectory {
            failures: u32::MAX,
            lookups: RefCell::new(0),
            url: FALLBACK,
        };

        let acquirer = AvatarAcquirer::new(&store, &transport, &directory, policy(), 200);
        let outcome = acquirer.ensure("A", None).unwrap();

        assert_eq!(outcome.state, AvatarState::Placeholder);
        assert_eq!(*directory.lookups.borrow(), 3);
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn entity_missing_from_directory_gets_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let store = AvatarStore::new(dir.path());
        let transport = ScriptedTransport::default();
        let directory = directory(&[]);

        let acquirer = AvatarAcquirer::new(&store, &transport, &directory, policy(), 200);
        let outcome = acquirer.ensure("A", None).unwrap();

        assert_eq!(outcome.state, AvatarState::Placeholder);
        assert_eq!(outcome.attempts, 0);
    }
}
