//! Stage 3a: Enrich — vision analysis per photo.
//!
//! Every analysis routes through the per-unit memoizer (keyed by the
//! processed image's content hash) and the retry wrapper, so a stage-level
//! cache wipe never re-pays for an unchanged photo. Unit calls run on a
//! bounded worker pool; all blocking happens at the HTTP boundary, which
//! is timeout-bounded by the client.
//!
//! Flipchart photos get their crop box applied (with margin) into a
//! sibling `<hash>_crop.jpg`, leaving the stage-2 original pristine so
//! crop application stays idempotent.
//!
//! Reads:  .cache/photo_results.json + .cache/processed/*.jpg
//! Writes: .cache/enriched_photos.json + .cache/processed/*_crop.jpg

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use image::{DynamicImage, GenericImageView};

use crate::cache::MemoStore;
use crate::config::Settings;
use crate::models::{CropBox, EnrichedPhoto, EnrichedPhotoSet, PhotoResults, ProcessedPhoto, SceneType};
use crate::services::{with_retry, RetryPolicy, VisionAnalyzer};

use super::{write_json_artifact, StageError};

pub const ARTIFACT: &str = ".cache/enriched_photos.json";

/// Padding added around the model's tight crop box (normalized units).
/// Better to take more than less — keeps a comfortable border around the
/// document.
const CROP_MARGIN: f64 = 0.03;

pub fn run(
    settings: &Settings,
    photo_results: &PhotoResults,
    memo: &MemoStore,
    vision: &dyn VisionAnalyzer,
) -> Result<(EnrichedPhotoSet, PathBuf), StageError> {
    let policy = RetryPolicy::from_settings(settings);
    let photos = &photo_results.processed_photos;
    let workers = settings.worker_concurrency.min(photos.len()).max(1);

    let next = AtomicUsize::new(0);
    let results: Mutex<Vec<(usize, Result<EnrichedPhoto, StageError>)>> =
        Mutex::new(Vec::with_capacity(photos.len()));

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some(processed) = photos.get(index) else {
                    break;
                };
                let result = enrich_one(settings, processed, memo, vision, &policy);
                results
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push((index, result));
            });
        }
    });

    let mut results = results.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
    results.sort_by_key(|(index, _)| *index);

    let mut enriched_photos = Vec::with_capacity(results.len());
    for (index, result) in results {
        match result {
            Ok(enriched) => {
                tracing::info!(
                    photo = %enriched.photo_id,
                    scene = enriched.scene_type.as_str(),
                    cropped = enriched.crop_box.is_some(),
                    "Photo analysed"
                );
                enriched_photos.push(enriched);
            }
            Err(error) => {
                tracing::error!(
                    photo = %photos[index].photo_id,
                    %error,
                    "Photo analysis failed"
                );
                return Err(error);
            }
        }
    }

    let photo_set = EnrichedPhotoSet { enriched_photos };
    let artifact = write_json_artifact(settings, ARTIFACT, &photo_set)?;

    tracing::info!(photos = photo_set.enriched_photos.len(), "Stage 3a complete");
    log_scene_summary(&photo_set);
    Ok((photo_set, artifact))
}

/// Analyse one photo: memoized vision call, then crop application for
/// flipchart shots.
fn enrich_one(
    settings: &Settings,
    processed: &ProcessedPhoto,
    memo: &MemoStore,
    vision: &dyn VisionAnalyzer,
    policy: &RetryPolicy,
) -> Result<EnrichedPhoto, StageError> {
    let image_path = settings.resolve(&processed.processed_path);
    let bytes = fs::read(&image_path)?;

    let analysis = memo.memoize(&processed.content_hash, || {
        with_retry(policy, "vision_analyze", || {
            vision.analyze_photo(&bytes, &settings.vision_detail)
        })
    })?;

    let final_path = match (analysis.scene_type, &analysis.crop_box) {
        (SceneType::Flipchart, Some(crop_box)) => {
            ensure_cropped(settings, processed, &bytes, crop_box)?
        }
        _ => processed.processed_path.clone(),
    };

    Ok(EnrichedPhoto::from_analysis(
        &processed.photo_id,
        analysis,
        &settings.vision_model,
        final_path,
    ))
}

/// Write the cropped variant next to the stage-2 original if it does not
/// exist yet (it may have survived from a previous run, or been deleted
/// in a cache cleanup).
fn ensure_cropped(
    settings: &Settings,
    processed: &ProcessedPhoto,
    bytes: &[u8],
    crop_box: &CropBox,
) -> Result<PathBuf, StageError> {
    let relative = PathBuf::from(format!(
        ".cache/processed/{}_crop.jpg",
        processed.content_hash
    ));
    let absolute = settings.resolve(&relative);
    if absolute.exists() {
        return Ok(relative);
    }

    let img = image::load_from_memory(bytes).map_err(|e| StageError::Image {
        path: processed.processed_path.display().to_string(),
        reason: e.to_string(),
    })?;
    let cropped = crop_with_margin(&img, crop_box);

    let mut jpeg = Vec::new();
    cropped
        .write_to(&mut jpeg, image::ImageOutputFormat::Jpeg(92))
        .map_err(|e| StageError::Image {
            path: relative.display().to_string(),
            reason: e.to_string(),
        })?;
    fs::write(&absolute, jpeg)?;
    Ok(relative)
}

/// Apply the crop box with margin padding. Never exceeds image bounds.
fn crop_with_margin(img: &DynamicImage, crop_box: &CropBox) -> DynamicImage {
    let (w, h) = (img.width() as f64, img.height() as f64);
    let x_min = (crop_box.x_min - CROP_MARGIN).max(0.0);
    let y_min = (crop_box.y_min - CROP_MARGIN).max(0.0);
    let x_max = (crop_box.x_max + CROP_MARGIN).min(1.0);
    let y_max = (crop_box.y_max + CROP_MARGIN).min(1.0);

    let x = (x_min * w) as u32;
    let y = (y_min * h) as u32;
    let width = (((x_max - x_min) * w) as u32).max(1);
    let height = (((y_max - y_min) * h) as u32).max(1);
    img.crop_imm(x, y, width, height)
}

fn log_scene_summary(photo_set: &EnrichedPhotoSet) {
    let mut counts: std::collections::BTreeMap<&str, usize> = Default::default();
    for photo in &photo_set.enriched_photos {
        *counts.entry(photo.scene_type.as_str()).or_default() += 1;
    }
    for (scene, count) in counts {
        tracing::info!(scene, count, "Scene summary");
    }
}
