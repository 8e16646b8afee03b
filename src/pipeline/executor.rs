//! Resumable pipeline executor.
//!
//! Per stage, evaluated in `StageId` order:
//!
//! ```text
//! PENDING → SKIPPED                    input hash matches the manifest
//!         → RUNNING → DONE             recompute, publish, cascade
//!                   → FAILED           surface and halt, manifest untouched
//! ```
//!
//! A stage only begins after its predecessor's artifact is durably on
//! disk. After a successful recompute every downstream manifest entry is
//! cleared, even when downstream inputs would hash identically — an
//! upstream recompute is conservatively assumed to change meaning. A
//! failed stage leaves its own manifest entry alone so the next attempt
//! can still detect "nothing usable changed".

use std::path::PathBuf;

use serde::Serialize;

use crate::cache::{CacheEntry, InputSet, ManifestStore, MemoStore};
use crate::config::Settings;
use crate::models::{ContentPlan, EnrichedPhotoSet, PagePlan, PhotoResults, ProjectManifest};
use crate::services::{EmbeddingClient, VisionAnalyzer};

use super::{
    load_json_artifact, stage1_ingest, stage2_process, stage3a_enrich, stage3b_match,
    stage4_layout, stage5_render, PipelineError, StageError, StageId,
};

const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const TEXT_EXTENSIONS: &[&str] = &["md", "txt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Inputs unchanged — prior artifact reused bit-for-bit.
    Skipped,
    /// Recomputed and published.
    Done,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub stage: StageId,
    pub status: StageStatus,
    pub input_hash: String,
    pub artifact_ref: PathBuf,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<StageOutcome>,
    /// Final document, relative to the project directory.
    pub output: PathBuf,
}

impl RunReport {
    pub fn stage(&self, stage: StageId) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }
}

pub struct PipelineExecutor<'a> {
    settings: &'a Settings,
    store: ManifestStore,
    memo: MemoStore,
    vision: &'a dyn VisionAnalyzer,
    embedder: &'a dyn EmbeddingClient,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(
        settings: &'a Settings,
        vision: &'a dyn VisionAnalyzer,
        embedder: &'a dyn EmbeddingClient,
    ) -> Result<Self, PipelineError> {
        let store = ManifestStore::open(settings.stage_cache_path());
        let memo = MemoStore::open(&settings.memo_db_path())?;
        Ok(Self {
            settings,
            store,
            memo,
            vision,
            embedder,
        })
    }

    /// Run all stages. With `force_stage`, that stage and everything after
    /// it is invalidated up front and guaranteed to run; earlier stages
    /// remain eligible for skipping.
    pub fn run(&mut self, force_stage: Option<StageId>) -> Result<RunReport, PipelineError> {
        if let Some(stage) = force_stage {
            tracing::info!(%stage, "Force-stage requested — invalidating it and downstream");
            self.store.invalidate_from(stage)?;
        }
        let settings = self.settings;
        let mut outcomes = Vec::with_capacity(StageId::ALL.len());

        // ── Stage 1: ingest ──────────────────────────────
        let mut inputs = InputSet::new();
        inputs.add_dir("agenda", &settings.agenda_dir(), TEXT_EXTENSIONS)?;
        inputs.add_dir("fotos", &settings.fotos_dir(), PHOTO_EXTENSIONS)?;
        inputs.add_dir("text", &settings.text_dir(), TEXT_EXTENSIONS)?;
        let (manifest, outcome): (ProjectManifest, _) = execute(
            &mut self.store,
            StageId::Ingest,
            &inputs.hash()?,
            |entry| load_json_artifact(settings, &entry.artifact_ref),
            || stage1_ingest::run(settings),
        )?;
        let manifest_ref = outcome.artifact_ref.clone();
        outcomes.push(outcome);

        // ── Stage 2: process ─────────────────────────────
        let mut inputs = InputSet::new();
        inputs.add_file("artifact/manifest", settings.resolve(&manifest_ref));
        inputs.add_dir("fotos", &settings.fotos_dir(), PHOTO_EXTENSIONS)?;
        let (photo_results, outcome): (PhotoResults, _) = execute(
            &mut self.store,
            StageId::Process,
            &inputs.hash()?,
            |entry| load_json_artifact(settings, &entry.artifact_ref),
            || stage2_process::run(settings, &manifest),
        )?;
        let photo_results_ref = outcome.artifact_ref.clone();
        outcomes.push(outcome);

        // ── Stage 3a: enrich ─────────────────────────────
        let mut inputs = InputSet::new();
        inputs.add_file("artifact/photo_results", settings.resolve(&photo_results_ref));
        inputs.add_config("vision_model", &settings.vision_model);
        inputs.add_config("vision_detail", &settings.vision_detail);
        let (photo_set, outcome): (EnrichedPhotoSet, _) = execute(
            &mut self.store,
            StageId::Enrich,
            &inputs.hash()?,
            |entry| load_json_artifact(settings, &entry.artifact_ref),
            || stage3a_enrich::run(settings, &photo_results, &self.memo, self.vision),
        )?;
        let enriched_ref = outcome.artifact_ref.clone();
        outcomes.push(outcome);

        // ── Stage 3b: match ──────────────────────────────
        let mut inputs = InputSet::new();
        inputs.add_file("artifact/manifest", settings.resolve(&manifest_ref));
        inputs.add_file("artifact/enriched_photos", settings.resolve(&enriched_ref));
        inputs.add_config("embedding_model", &settings.embedding_model);
        inputs.add_config("temporal_weight", settings.temporal_weight);
        inputs.add_config("semantic_weight", settings.semantic_weight);
        inputs.add_config("match_confidence_threshold", settings.match_confidence_threshold);
        inputs.add_config(
            "temporal_max_distance_minutes",
            settings.temporal_max_distance_minutes,
        );
        inputs.add_config("note_min_confidence", settings.note_min_confidence);
        let (content_plan, outcome): (ContentPlan, _) = execute(
            &mut self.store,
            StageId::Match,
            &inputs.hash()?,
            |entry| load_json_artifact(settings, &entry.artifact_ref),
            || stage3b_match::run(settings, &manifest, &photo_set, &self.memo, self.embedder),
        )?;
        let content_plan_ref = outcome.artifact_ref.clone();
        outcomes.push(outcome);

        // ── Stage 4: layout ──────────────────────────────
        let mut inputs = InputSet::new();
        inputs.add_file("artifact/manifest", settings.resolve(&manifest_ref));
        inputs.add_file("artifact/content_plan", settings.resolve(&content_plan_ref));
        inputs.add_file("artifact/enriched_photos", settings.resolve(&enriched_ref));
        inputs.add_config("max_photos_per_page", settings.max_photos_per_page);
        inputs.add_config("section_dividers", settings.section_dividers);
        let (page_plan, outcome): (PagePlan, _) = execute(
            &mut self.store,
            StageId::Layout,
            &inputs.hash()?,
            |entry| load_json_artifact(settings, &entry.artifact_ref),
            || stage4_layout::run(settings, &manifest, &content_plan, &photo_set),
        )?;
        let page_plan_ref = outcome.artifact_ref.clone();
        outcomes.push(outcome);

        // ── Stage 5: render ──────────────────────────────
        let mut inputs = InputSet::new();
        inputs.add_file("artifact/manifest", settings.resolve(&manifest_ref));
        inputs.add_file("artifact/content_plan", settings.resolve(&content_plan_ref));
        inputs.add_file("artifact/page_plan", settings.resolve(&page_plan_ref));
        inputs.add_file("artifact/enriched_photos", settings.resolve(&enriched_ref));
        inputs.add_config("language", &settings.language);
        let (output, outcome): (PathBuf, _) = execute(
            &mut self.store,
            StageId::Render,
            &inputs.hash()?,
            |entry| {
                if settings.resolve(&entry.artifact_ref).exists() {
                    Ok(entry.artifact_ref.clone())
                } else {
                    Err(StageError::InvalidArtifact {
                        path: entry.artifact_ref.display().to_string(),
                        reason: "rendered output missing".into(),
                    })
                }
            },
            || {
                stage5_render::run(settings, &manifest, &content_plan, &page_plan, &photo_set)
                    .map(|path| (path.clone(), path))
            },
        )?;
        outcomes.push(outcome);

        Ok(RunReport { outcomes, output })
    }

    /// Resume using only cached artifacts: nothing is hashed, nothing is
    /// recomputed, and a missing entry is an error naming the stage.
    pub fn run_cached(&self) -> Result<RunReport, PipelineError> {
        let mut outcomes = Vec::with_capacity(StageId::ALL.len());
        for stage in StageId::ALL {
            let entry = self
                .store
                .get(stage)
                .ok_or(PipelineError::MissingCache(stage))?;
            if !self.settings.resolve(&entry.artifact_ref).exists() {
                return Err(PipelineError::MissingCache(stage));
            }
            outcomes.push(StageOutcome {
                stage,
                status: StageStatus::Skipped,
                input_hash: entry.input_hash.clone(),
                artifact_ref: entry.artifact_ref.clone(),
            });
        }
        let output = outcomes
            .last()
            .map(|o| o.artifact_ref.clone())
            .unwrap_or_default();
        Ok(RunReport { outcomes, output })
    }
}

/// One stage through the state machine. `load` materializes the prior
/// artifact on a hash match; an unusable cached artifact falls through to
/// recompute instead of failing the run.
fn execute<T>(
    store: &mut ManifestStore,
    stage: StageId,
    input_hash: &str,
    load: impl FnOnce(&CacheEntry) -> Result<T, StageError>,
    compute: impl FnOnce() -> Result<(T, PathBuf), StageError>,
) -> Result<(T, StageOutcome), PipelineError> {
    if let Some(entry) = store.get(stage) {
        if entry.input_hash == input_hash {
            let artifact_ref = entry.artifact_ref.clone();
            match load(entry) {
                Ok(value) => {
                    tracing::info!(%stage, "Stage skipped — inputs unchanged");
                    return Ok((
                        value,
                        StageOutcome {
                            stage,
                            status: StageStatus::Skipped,
                            input_hash: input_hash.to_string(),
                            artifact_ref,
                        },
                    ));
                }
                Err(error) => {
                    tracing::warn!(%stage, %error, "Cached artifact unusable — recomputing");
                }
            }
        }
    }

    tracing::info!(%stage, "Stage running");
    let (value, artifact_ref) = compute().map_err(|source| PipelineError::Stage {
        stage,
        input_hash: input_hash.to_string(),
        source,
    })?;
    store.put(stage, input_hash, &artifact_ref)?;
    store.invalidate_all_downstream_of(stage)?;

    Ok((
        value,
        StageOutcome {
            stage,
            status: StageStatus::Done,
            input_hash: input_hash.to_string(),
            artifact_ref,
        },
    ))
}
