//! Durable stage cache manifest.
//!
//! One JSON file per project (`.cache/stage_cache.json`) holding at most
//! one entry per stage: the input hash the stage last ran with and where
//! its artifact landed. The file is deliberately human-inspectable and
//! safe to delete — deleting it forces a clean rebuild, nothing more.
//!
//! Single-writer: one pipeline run per project directory. Concurrent runs
//! against the same directory are undefined.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::StageId;

use super::CacheError;

/// One stage's cache record. Its presence is the sole evidence the stage
/// has run since its inputs last changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub input_hash: String,
    /// Artifact location, relative to the project directory.
    pub artifact_ref: PathBuf,
    pub written_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    stages: BTreeMap<StageId, CacheEntry>,
}

/// The authority for "has this stage's input changed". Sole owner and
/// writer of [`CacheEntry`] records; the executor requests mutations
/// through it.
#[derive(Debug)]
pub struct ManifestStore {
    path: PathBuf,
    stages: BTreeMap<StageId, CacheEntry>,
}

impl ManifestStore {
    /// Load the manifest, treating a missing, unreadable, or corrupt file
    /// as empty. Corruption costs a recompute, never a failed run.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stages = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<StoreFile>(&raw) {
                Ok(file) => file.stages,
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        %error,
                        "Stage cache manifest is corrupt — treating as empty"
                    );
                    BTreeMap::new()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    %error,
                    "Stage cache manifest unreadable — treating as empty"
                );
                BTreeMap::new()
            }
        };
        Self { path, stages }
    }

    pub fn get(&self, stage: StageId) -> Option<&CacheEntry> {
        self.stages.get(&stage)
    }

    /// Upsert the entry for one stage, replacing any prior entry.
    pub fn put(
        &mut self,
        stage: StageId,
        input_hash: impl Into<String>,
        artifact_ref: impl Into<PathBuf>,
    ) -> Result<(), CacheError> {
        self.stages.insert(
            stage,
            CacheEntry {
                input_hash: input_hash.into(),
                artifact_ref: artifact_ref.into(),
                written_at: Utc::now(),
            },
        );
        self.persist()
    }

    /// Remove the entries for `stage` and every stage ordered after it.
    pub fn invalidate_from(&mut self, stage: StageId) -> Result<(), CacheError> {
        self.stages.retain(|s, _| *s < stage);
        self.persist()
    }

    /// Remove entries strictly after `stage`. Used after a successful
    /// recompute of `stage`, whose own entry is updated via `put` — an
    /// upstream recompute is conservatively assumed to change meaning
    /// even when downstream inputs come out byte-identical.
    pub fn invalidate_all_downstream_of(&mut self, stage: StageId) -> Result<(), CacheError> {
        self.stages.retain(|s, _| *s <= stage);
        self.persist()
    }

    fn persist(&self) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = StoreFile {
            stages: self.stages.clone(),
        };
        let raw = serde_json::to_string_pretty(&file)?;
        fs::write(&self.path, raw).map_err(|source| CacheError::Io {
            path: self.path.clone(),
            source,
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.stages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn store_in(dir: &Path) -> ManifestStore {
        ManifestStore::open(dir.join("stage_cache.json"))
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.get(StageId::Ingest).is_none());
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        store
            .put(StageId::Ingest, "abc123", ".cache/manifest.json")
            .unwrap();

        let entry = store.get(StageId::Ingest).unwrap();
        assert_eq!(entry.input_hash, "abc123");
        assert_eq!(entry.artifact_ref, PathBuf::from(".cache/manifest.json"));
    }

    #[test]
    fn put_replaces_prior_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        store.put(StageId::Ingest, "old", "a.json").unwrap();
        store.put(StageId::Ingest, "new", "b.json").unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(StageId::Ingest).unwrap().input_hash, "new");
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = store_in(dir.path());
            store.put(StageId::Match, "h3b", ".cache/content_plan.json").unwrap();
        }
        let store = store_in(dir.path());
        assert_eq!(store.get(StageId::Match).unwrap().input_hash, "h3b");
    }

    #[test]
    fn corrupt_file_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stage_cache.json");
        fs::write(&path, "{not json at all").unwrap();

        let store = ManifestStore::open(&path);
        assert!(store.get(StageId::Ingest).is_none());
    }

    #[test]
    fn invalidate_from_clears_stage_and_later() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        for stage in StageId::ALL {
            store.put(stage, "h", "x.json").unwrap();
        }

        store.invalidate_from(StageId::Enrich).unwrap();

        assert!(store.get(StageId::Ingest).is_some());
        assert!(store.get(StageId::Process).is_some());
        assert!(store.get(StageId::Enrich).is_none());
        assert!(store.get(StageId::Match).is_none());
        assert!(store.get(StageId::Layout).is_none());
        assert!(store.get(StageId::Render).is_none());
    }

    #[test]
    fn invalidate_downstream_keeps_the_stage_itself() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        for stage in StageId::ALL {
            store.put(stage, "h", "x.json").unwrap();
        }

        store.invalidate_all_downstream_of(StageId::Enrich).unwrap();

        assert!(store.get(StageId::Enrich).is_some());
        assert!(store.get(StageId::Match).is_none());
        assert!(store.get(StageId::Render).is_none());
    }

    #[test]
    fn invalidation_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = store_in(dir.path());
            for stage in StageId::ALL {
                store.put(stage, "h", "x.json").unwrap();
            }
            store.invalidate_from(StageId::Layout).unwrap();
        }
        let store = store_in(dir.path());
        assert!(store.get(StageId::Match).is_some());
        assert!(store.get(StageId::Layout).is_none());
    }

    #[test]
    fn file_is_human_inspectable_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stage_cache.json");
        let mut store = ManifestStore::open(&path);
        store.put(StageId::Ingest, "abc", ".cache/manifest.json").unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"ingest\""));
        assert!(raw.contains("\"input_hash\""));
        assert!(raw.contains("abc"));
    }
}
