//! Stage 2: Process — normalize photos and fingerprint their content.
//!
//! Per photo: apply EXIF orientation, re-encode as a clean JPEG under
//! `.cache/processed/<sha256>.jpg`, record the content hash (stage 3a's
//! memo key), a resolution-based quality score, and perceptual
//! near-duplicate flags. Duplicates are flagged, never dropped.
//!
//! Reads:  .cache/manifest.json + fotos/
//! Writes: .cache/photo_results.json + .cache/processed/*.jpg

use std::fs;
use std::path::PathBuf;

use image::{DynamicImage, GenericImageView};

use crate::cache::sha256_hex;
use crate::config::Settings;
use crate::models::{PhotoResults, ProcessedPhoto, ProjectManifest};

use super::{write_json_artifact, StageError};

pub const ARTIFACT: &str = ".cache/photo_results.json";

const JPEG_QUALITY: u8 = 92;

/// Pixel count of a full-HD frame — photos at or above it score 1.0.
const REFERENCE_PIXELS: f64 = 1920.0 * 1080.0;

/// Perceptual similarity at or above which the later photo is flagged a
/// near-duplicate of the earlier one.
const DUPLICATE_SIMILARITY: f64 = 0.97;

pub fn run(
    settings: &Settings,
    manifest: &ProjectManifest,
) -> Result<(PhotoResults, PathBuf), StageError> {
    fs::create_dir_all(settings.processed_dir())?;

    let perceptual_hasher = img_hash::HasherConfig::new()
        .hash_alg(img_hash::HashAlg::DoubleGradient)
        .hash_size(16, 16)
        .to_hasher();

    let mut processed_photos: Vec<ProcessedPhoto> = Vec::new();
    let mut seen_hashes: Vec<(img_hash::ImageHash, String)> = Vec::new();

    for photo in &manifest.photos {
        let source = settings.resolve(&photo.path);
        let bytes = fs::read(&source)?;
        let decoded = image::load_from_memory(&bytes).map_err(|e| StageError::Image {
            path: photo.path.display().to_string(),
            reason: e.to_string(),
        })?;

        let orientation = read_orientation_tag(&bytes);
        let corrected = apply_exif_orientation(decoded, orientation);

        let mut jpeg = Vec::new();
        corrected
            .write_to(&mut jpeg, image::ImageOutputFormat::Jpeg(JPEG_QUALITY))
            .map_err(|e| StageError::Image {
                path: photo.path.display().to_string(),
                reason: e.to_string(),
            })?;
        let content_hash = sha256_hex(&jpeg);

        let relative = PathBuf::from(format!(".cache/processed/{content_hash}.jpg"));
        fs::write(settings.resolve(&relative), &jpeg)?;

        let perceptual = perceptual_hasher.hash_image(&corrected);
        let duplicate_of = seen_hashes
            .iter()
            .find(|(hash, _)| perceptual_similarity(hash, &perceptual) >= DUPLICATE_SIMILARITY)
            .map(|(_, id)| id.clone());
        if let Some(original) = &duplicate_of {
            tracing::info!(photo = %photo.id, original = %original, "Near-duplicate photo");
        }
        seen_hashes.push((perceptual.clone(), photo.id.clone()));

        let pixels = (corrected.width() as f64) * (corrected.height() as f64);
        processed_photos.push(ProcessedPhoto {
            photo_id: photo.id.clone(),
            processed_path: relative,
            content_hash,
            quality_score: (pixels / REFERENCE_PIXELS).min(1.0),
            perceptual_hash: perceptual.to_base64(),
            duplicate_of,
        });
    }

    let results = PhotoResults { processed_photos };
    let artifact = write_json_artifact(settings, ARTIFACT, &results)?;

    tracing::info!(
        photos = results.processed_photos.len(),
        duplicates = results
            .processed_photos
            .iter()
            .filter(|p| p.duplicate_of.is_some())
            .count(),
        "Stage 2 complete"
    );
    Ok((results, artifact))
}

fn read_orientation_tag(bytes: &[u8]) -> u32 {
    exif::Reader::new()
        .read_from_container(&mut std::io::Cursor::new(bytes))
        .ok()
        .and_then(|data| {
            data.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|f| f.value.get_uint(0))
        })
        .unwrap_or(1)
}

/// Rotate/flip pixels so the image is right-side-up regardless of how the
/// camera stored it.
fn apply_exif_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

fn perceptual_similarity(a: &img_hash::ImageHash, b: &img_hash::ImageHash) -> f64 {
    let distance = a.dist(b);
    let max_bits = (a.as_bytes().len() * 8).max(1) as f64;
    1.0 - (distance as f64 / max_bits)
}
