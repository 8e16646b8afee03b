//! Stage 2 artifact: processed photo records.
//!
//! `content_hash` is the SHA-256 of the orientation-corrected JPEG bytes —
//! the canonical per-unit memo key for stage 3a. It is deliberately a
//! content hash, not a path or photo id, so an unchanged photo never pays
//! for a second vision call even across full stage-cache wipes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stage 2 output for a single photo.
///
/// `processed_path` is relative to the project directory
/// (e.g. `.cache/processed/ab12….jpg`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedPhoto {
    pub photo_id: String,
    pub processed_path: PathBuf,
    pub content_hash: String,
    pub quality_score: f64,
    /// Base64 perceptual hash used for near-duplicate detection.
    pub perceptual_hash: String,
    /// Photo id of an earlier, visually near-identical photo. Duplicates
    /// stay in the set, flagged for review, never dropped.
    #[serde(default)]
    pub duplicate_of: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhotoResults {
    #[serde(default)]
    pub processed_photos: Vec<ProcessedPhoto>,
}

impl PhotoResults {
    pub fn by_photo_id(&self, photo_id: &str) -> Option<&ProcessedPhoto> {
        self.processed_photos.iter().find(|p| p.photo_id == photo_id)
    }
}
