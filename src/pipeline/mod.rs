//! The six-stage pipeline and its resumable executor.
//!
//! Stage bodies are plain functions over typed artifacts; the executor
//! owns skip/recompute decisions, the invalidation cascade, and failure
//! surfacing. Stages never touch the cache manifest directly.

pub mod agenda;
pub mod executor;
pub mod stage1_ingest;
pub mod stage2_process;
pub mod stage3a_enrich;
pub mod stage3b_match;
pub mod stage4_layout;
pub mod stage5_render;

pub use executor::{PipelineExecutor, RunReport, StageOutcome, StageStatus};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::CacheError;
use crate::services::ServiceError;

/// The ordered stage enumeration. The derived `Ord` defines the
/// invalidation cascade direction: invalidating a stage clears everything
/// ordered after it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Ingest,
    Process,
    Enrich,
    Match,
    Layout,
    Render,
}

impl StageId {
    pub const ALL: [StageId; 6] = [
        StageId::Ingest,
        StageId::Process,
        StageId::Enrich,
        StageId::Match,
        StageId::Layout,
        StageId::Render,
    ];

    /// Short stage label as used on the command line ("1" … "5").
    pub fn label(self) -> &'static str {
        match self {
            Self::Ingest => "1",
            Self::Process => "2",
            Self::Enrich => "3a",
            Self::Match => "3b",
            Self::Layout => "4",
            Self::Render => "5",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Process => "process",
            Self::Enrich => "enrich",
            Self::Match => "match",
            Self::Layout => "layout",
            Self::Render => "render",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.name())
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        for stage in Self::ALL {
            if normalized == stage.label() || normalized == stage.name() {
                return Ok(stage);
            }
        }
        Err(format!(
            "Unknown stage '{s}' — expected one of: 1, 2, 3a, 3b, 4, 5"
        ))
    }
}

// ──────────────────────────────────────────────
// Error types
// ──────────────────────────────────────────────

/// A stage body's own failure. The executor wraps it with the stage id
/// and input hash before surfacing it.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Service call failed: {0}")]
    Service(#[from] ServiceError),

    #[error("Image processing failed for {path}: {reason}")]
    Image { path: String, reason: String },

    #[error("Upstream artifact {path} does not conform: {reason}")]
    InvalidArtifact { path: String, reason: String },

    #[error("No photos found under fotos/ — nothing to document")]
    NoPhotos,

    #[error("Template rendering failed: {0}")]
    Render(String),
}

/// Top-level pipeline failure, carrying enough context to diagnose
/// without inspecting internals.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Stage {stage} failed (input hash {input_hash}): {source}")]
    Stage {
        stage: StageId,
        input_hash: String,
        #[source]
        source: StageError,
    },

    #[error("Stage {0} has no cached artifact — run the pipeline without --cached first")]
    MissingCache(StageId),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

// ──────────────────────────────────────────────
// Artifact I/O
// ──────────────────────────────────────────────

/// Write a stage artifact as pretty-printed JSON under the project
/// directory. Returns the project-relative artifact ref.
pub(crate) fn write_json_artifact<T: serde::Serialize>(
    settings: &crate::config::Settings,
    relative: &str,
    value: &T,
) -> Result<std::path::PathBuf, StageError> {
    let path = settings.resolve(std::path::Path::new(relative));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(value).map_err(CacheError::Serde)?;
    std::fs::write(&path, raw)?;
    Ok(std::path::PathBuf::from(relative))
}

/// Load and validate an upstream artifact. Any read or shape problem is
/// an [`StageError::InvalidArtifact`] naming the offending file.
pub(crate) fn load_json_artifact<T: serde::de::DeserializeOwned>(
    settings: &crate::config::Settings,
    relative: &std::path::Path,
) -> Result<T, StageError> {
    let path = settings.resolve(relative);
    let raw = std::fs::read_to_string(&path).map_err(|e| StageError::InvalidArtifact {
        path: relative.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| StageError::InvalidArtifact {
        path: relative.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_defines_cascade_direction() {
        assert!(StageId::Ingest < StageId::Process);
        assert!(StageId::Process < StageId::Enrich);
        assert!(StageId::Enrich < StageId::Match);
        assert!(StageId::Match < StageId::Layout);
        assert!(StageId::Layout < StageId::Render);
    }

    #[test]
    fn all_lists_stages_in_order() {
        let mut sorted = StageId::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, StageId::ALL.to_vec());
    }

    #[test]
    fn parses_labels_and_names() {
        assert_eq!("3a".parse::<StageId>().unwrap(), StageId::Enrich);
        assert_eq!("3B".parse::<StageId>().unwrap(), StageId::Match);
        assert_eq!("ingest".parse::<StageId>().unwrap(), StageId::Ingest);
        assert_eq!("5".parse::<StageId>().unwrap(), StageId::Render);
        assert!("7".parse::<StageId>().is_err());
    }

    #[test]
    fn serializes_as_snake_case_name() {
        assert_eq!(serde_json::to_string(&StageId::Enrich).unwrap(), "\"enrich\"");
    }

    #[test]
    fn display_combines_label_and_name() {
        assert_eq!(StageId::Match.to_string(), "3b (match)");
    }

    #[test]
    fn stage_error_context_in_pipeline_error() {
        let error = PipelineError::Stage {
            stage: StageId::Enrich,
            input_hash: "abc123".into(),
            source: StageError::NoPhotos,
        };
        let message = error.to_string();
        assert!(message.contains("3a"));
        assert!(message.contains("abc123"));
    }
}
