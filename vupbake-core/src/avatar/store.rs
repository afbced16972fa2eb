//! Name-addressed avatar directory.
//!
//! Layout: `{avatar_dir}/{name}.jpg`, one file per entity regardless of the
//! actual container format (downstream consumers look files up by name only).
//! Characters a file name cannot hold are percent-encoded, as is `%` itself,
//! so distinct names always get distinct files.
//! Writes go to a `.tmp` sibling and are renamed into place, so an interrupted
//! run never leaves a half-written avatar behind a valid name.

use super::integrity::{check_integrity, ImageKind, IntegrityError};
use percent_encoding::{percent_decode_str, percent_encode_byte};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 1×1 PNG written when every acquisition attempt has failed.
pub const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0xda, 0x63, 0x8c, 0xf0, 0x9f, 0xf1,
    0x1f, 0x00, 0x05, 0x26, 0x02, 0x3e, 0xa8, 0x3d, 0x81, 0xa9, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45,
    0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

const EXTENSION: &str = "jpg";

/// Classification of a file found in the avatar directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetVerdict {
    Valid(ImageKind),
    /// Too small to be anything but the placeholder or a blocked response.
    Placeholder,
    Corrupt(IntegrityError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub verdict: AssetVerdict,
}

#[derive(Debug, Clone)]
pub struct AvatarStore {
    dir: PathBuf,
}

impl AvatarStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// File path for an entity.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", file_stem(name)))
    }

    /// Current bytes for an entity, `None` if no file exists.
    pub fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Atomically replace an entity's avatar.
    pub fn write(&self, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.path_for(name);
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            e
        })?;
        Ok(path)
    }

    pub fn write_placeholder(&self, name: &str) -> io::Result<PathBuf> {
        self.write(name, PLACEHOLDER_PNG)
    }

    pub fn remove(&self, name: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(name)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Classify every avatar file in the directory, sorted by name.
    ///
    /// Files failing the integrity check below `placeholder_max_bytes` count
    /// as placeholders, larger failing files as corrupt.
    pub fn scan(&self, min_bytes: usize, placeholder_max_bytes: u64) -> io::Result<Vec<StoredAsset>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut assets = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(name_from_stem) else {
                continue;
            };

            let bytes = fs::read(&path)?;
            let size = bytes.len() as u64;
            let verdict = match check_integrity(&bytes, min_bytes) {
                Ok(kind) => AssetVerdict::Valid(kind),
                Err(_) if size < placeholder_max_bytes => AssetVerdict::Placeholder,
                Err(e) => AssetVerdict::Corrupt(e),
            };
            assets.push(StoredAsset {
                name,
                path,
                size,
                verdict,
            });
        }
        assets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(assets)
    }
}

/// Entity name as a file stem. Path separators, reserved and control
/// characters, `%`, and a leading `.` are percent-encoded; everything else,
/// including non-ASCII text, is kept as is. An empty name becomes `%`.
fn file_stem(name: &str) -> String {
    if name.is_empty() {
        return "%".to_string();
    }
    let mut stem = String::with_capacity(name.len());
    for (i, c) in name.char_indices() {
        let reserved = matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '%')
            || c.is_control()
            || (i == 0 && c == '.');
        if reserved {
            let mut buf = [0; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                stem.push_str(percent_encode_byte(byte));
            }
        } else {
            stem.push(c);
        }
    }
    stem
}

/// Inverse of [`file_stem`]. Stems that do not decode to UTF-8 (files not
/// written by this store) are taken verbatim.
fn name_from_stem(stem: &str) -> String {
    if stem == "%" {
        return String::new();
    }
    match percent_decode_str(stem).decode_utf8() {
        Ok(name) => name.into_owned(),
        Err(_) => stem.to_string(),
    }
}
