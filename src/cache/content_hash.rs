//! Deterministic fingerprinting of a stage's inputs.
//!
//! The digest covers every byte source and configuration value that can
//! change the stage's artifact, and nothing else: no wall-clock time, no
//! filesystem metadata, no enumeration order. Files are keyed by their
//! logical name and sorted before hashing, so two directory walks that
//! return entries in different orders produce the same digest.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::CacheError;

/// SHA-256 of a byte slice as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// The complete set of byte sources and configuration values a stage's
/// input hash is computed over.
#[derive(Debug, Default)]
pub struct InputSet {
    /// (logical name, absolute path) — logical names are stable across
    /// machines; absolute paths never enter the digest.
    files: Vec<(String, PathBuf)>,
    config: Vec<(String, String)>,
}

impl InputSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, logical: impl Into<String>, path: impl Into<PathBuf>) -> &mut Self {
        self.files.push((logical.into(), path.into()));
        self
    }

    /// Add every regular file under `dir` whose extension matches, keyed
    /// as `<prefix>/<filename>`. A missing directory contributes nothing.
    pub fn add_dir(
        &mut self,
        prefix: &str,
        dir: &Path,
        extensions: &[&str],
    ) -> Result<&mut Self, CacheError> {
        if !dir.exists() {
            return Ok(self);
        }
        let entries = fs::read_dir(dir).map_err(|source| CacheError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| CacheError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| {
                    let e = e.to_ascii_lowercase();
                    extensions.iter().any(|want| *want == e)
                })
                .unwrap_or(false);
            if matches {
                let name = entry.file_name().to_string_lossy().into_owned();
                self.files.push((format!("{prefix}/{name}"), path));
            }
        }
        Ok(self)
    }

    pub fn add_config(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.config.push((key.into(), value.to_string()));
        self
    }

    /// Compute the digest: sorted `(name, content-digest)` pairs followed
    /// by the sorted configuration subset.
    pub fn hash(&self) -> Result<String, CacheError> {
        let mut files: Vec<&(String, PathBuf)> = self.files.iter().collect();
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = Sha256::new();
        for (logical, path) in files {
            let content = fs::read(path).map_err(|source| CacheError::Io {
                path: path.clone(),
                source,
            })?;
            hasher.update(logical.as_bytes());
            hasher.update([0u8]);
            hasher.update(Sha256::digest(&content));
            hasher.update([0xAu8]);
        }

        let mut config: Vec<&(String, String)> = self.config.iter().collect();
        config.sort_by(|a, b| a.0.cmp(&b.0));
        hasher.update(b"--config--");
        for (key, value) in config {
            hasher.update(key.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
            hasher.update([0xAu8]);
        }

        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        Ok(out)
    }
}
