//! Run configuration.
//!
//! One `Settings` value is built in `main` (defaults layered under
//! `FPG_`-prefixed environment variables) and passed by reference into
//! every component. Nothing in the pipeline reads ambient state.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable prefix, e.g. `FPG_OPENAI_API_KEY`.
const ENV_PREFIX: &str = "FPG_";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// All run configuration, resolved once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub openai_api_key: String,
    /// OpenAI-compatible API root, no trailing slash.
    pub api_base_url: String,
    pub vision_model: String,
    pub embedding_model: String,
    /// Resolution-detail hint forwarded to the vision service.
    pub vision_detail: String,

    pub project_dir: PathBuf,

    /// Assignments under this combined confidence get `needs_review`.
    pub match_confidence_threshold: f64,
    pub temporal_weight: f64,
    pub semantic_weight: f64,
    /// Minutes outside a session window at which temporal confidence
    /// reaches zero.
    pub temporal_max_distance_minutes: f64,
    /// Notes whose best combined confidence falls under this stay
    /// unassigned instead of landing on the least-bad session.
    pub note_min_confidence: f64,

    pub max_photos_per_page: usize,
    pub section_dividers: bool,
    pub language: String,

    /// Bounded worker pool size for per-photo vision calls.
    pub worker_concurrency: usize,
    pub retry_max_attempts: u32,
    pub retry_base_delay_secs: f64,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            api_base_url: "https://api.openai.com/v1".into(),
            vision_model: "gpt-4o".into(),
            embedding_model: "text-embedding-3-small".into(),
            vision_detail: "high".into(),
            project_dir: PathBuf::from("./data"),
            match_confidence_threshold: 0.65,
            temporal_weight: 0.6,
            semantic_weight: 0.4,
            temporal_max_distance_minutes: 30.0,
            note_min_confidence: 0.3,
            max_photos_per_page: 2,
            section_dividers: false,
            language: "de".into(),
            worker_concurrency: 4,
            retry_max_attempts: 6,
            retry_base_delay_secs: 2.0,
            request_timeout_secs: 120,
        }
    }
}

impl Settings {
    /// Defaults layered under `FPG_*` environment variables, then validated.
    pub fn load() -> Result<Self, SettingsError> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        fn fraction(name: &str, v: f64) -> Result<(), SettingsError> {
            if !(0.0..=1.0).contains(&v) {
                return Err(SettingsError::Invalid(format!(
                    "{name} must be between 0.0 and 1.0, got {v}"
                )));
            }
            Ok(())
        }

        fraction("match_confidence_threshold", self.match_confidence_threshold)?;
        fraction("temporal_weight", self.temporal_weight)?;
        fraction("semantic_weight", self.semantic_weight)?;
        fraction("note_min_confidence", self.note_min_confidence)?;

        if (self.temporal_weight + self.semantic_weight - 1.0).abs() > 1e-6 {
            return Err(SettingsError::Invalid(format!(
                "temporal_weight + semantic_weight must sum to 1.0, got {}",
                self.temporal_weight + self.semantic_weight
            )));
        }
        if self.temporal_max_distance_minutes <= 0.0 {
            return Err(SettingsError::Invalid(
                "temporal_max_distance_minutes must be positive".into(),
            ));
        }
        if self.max_photos_per_page < 1 {
            return Err(SettingsError::Invalid(
                "max_photos_per_page must be at least 1".into(),
            ));
        }
        if self.worker_concurrency < 1 {
            return Err(SettingsError::Invalid(
                "worker_concurrency must be at least 1".into(),
            ));
        }
        if self.retry_max_attempts < 1 {
            return Err(SettingsError::Invalid(
                "retry_max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    // ── Project directory layout ─────────────────────────

    pub fn agenda_dir(&self) -> PathBuf {
        self.project_dir.join("agenda")
    }

    pub fn fotos_dir(&self) -> PathBuf {
        self.project_dir.join("fotos")
    }

    pub fn text_dir(&self) -> PathBuf {
        self.project_dir.join("text")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.project_dir.join(".cache")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.cache_dir().join("processed")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.project_dir.join("output")
    }

    pub fn stage_cache_path(&self) -> PathBuf {
        self.cache_dir().join("stage_cache.json")
    }

    pub fn memo_db_path(&self) -> PathBuf {
        self.cache_dir().join("memo.db")
    }

    /// Make an absolute path from a project-relative artifact path.
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.project_dir.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn default_weights_sum_to_one() {
        let settings = Settings::default();
        assert!((settings.temporal_weight + settings.semantic_weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let settings = Settings {
            match_confidence_threshold: 1.5,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn weights_not_summing_to_one_rejected() {
        let settings = Settings {
            temporal_weight: 0.6,
            semantic_weight: 0.6,
            ..Settings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn zero_photos_per_page_rejected() {
        let settings = Settings {
            max_photos_per_page: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_workers_rejected() {
        let settings = Settings {
            worker_concurrency: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn negative_max_distance_rejected() {
        let settings = Settings {
            temporal_max_distance_minutes: -5.0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn directory_layout_under_project_dir() {
        let settings = Settings {
            project_dir: PathBuf::from("/tmp/workshop"),
            ..Settings::default()
        };
        assert_eq!(settings.fotos_dir(), PathBuf::from("/tmp/workshop/fotos"));
        assert_eq!(
            settings.processed_dir(),
            PathBuf::from("/tmp/workshop/.cache/processed")
        );
        assert_eq!(
            settings.stage_cache_path(),
            PathBuf::from("/tmp/workshop/.cache/stage_cache.json")
        );
    }

    #[test]
    fn resolve_joins_relative_artifact_paths() {
        let settings = Settings {
            project_dir: PathBuf::from("/tmp/workshop"),
            ..Settings::default()
        };
        assert_eq!(
            settings.resolve(Path::new(".cache/manifest.json")),
            PathBuf::from("/tmp/workshop/.cache/manifest.json")
        );
    }
}
