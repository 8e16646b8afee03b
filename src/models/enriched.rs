//! Stage 3a artifact: vision-enriched photos.
//!
//! `PhotoAnalysis` is the raw structured output of the vision service and
//! doubles as the JSON schema sent with the request. `EnrichedPhoto` wraps
//! it with pipeline bookkeeping (photo id, processed path, model name).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Scene classification returned by the vision service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneType {
    /// A rectangular document fills the frame (flipchart, whiteboard,
    /// poster, pinboard). Only this type carries a crop box.
    Flipchart,
    Group,
    Activity,
    Result,
    Unknown,
}

impl SceneType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flipchart => "flipchart",
            Self::Group => "group",
            Self::Activity => "activity",
            Self::Result => "result",
            Self::Unknown => "unknown",
        }
    }
}

/// Normalized crop coordinates (0.0–1.0) relative to image dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl CropBox {
    /// Whether the box height exceeds its width (portrait document).
    pub fn is_portrait(&self) -> bool {
        (self.y_max - self.y_min) > (self.x_max - self.x_min)
    }
}

/// Raw structured output from the vision service for one photo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoAnalysis {
    pub scene_type: SceneType,
    pub description: String,
    #[serde(default)]
    pub ocr_text: Option<String>,
    #[serde(default)]
    pub topic_keywords: Vec<String>,
    /// Only populated when `scene_type` is flipchart.
    #[serde(default)]
    pub crop_box: Option<CropBox>,
}

/// Photo analysis result enriched with pipeline metadata.
///
/// `processed_path` is relative to the project directory and points to the
/// cropped image for flipchart photos, or the orientation-corrected
/// original for every other scene type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedPhoto {
    pub photo_id: String,
    pub scene_type: SceneType,
    pub description: String,
    #[serde(default)]
    pub ocr_text: Option<String>,
    #[serde(default)]
    pub topic_keywords: Vec<String>,
    #[serde(default)]
    pub crop_box: Option<CropBox>,
    pub processed_path: PathBuf,
    pub analysis_model: String,
}

impl EnrichedPhoto {
    pub fn from_analysis(
        photo_id: &str,
        analysis: PhotoAnalysis,
        model: &str,
        processed_path: PathBuf,
    ) -> Self {
        Self {
            photo_id: photo_id.to_string(),
            scene_type: analysis.scene_type,
            description: analysis.description,
            ocr_text: analysis.ocr_text,
            topic_keywords: analysis.topic_keywords,
            crop_box: analysis.crop_box,
            processed_path,
            analysis_model: model.to_string(),
        }
    }

    /// All text the matching engine embeds for this photo.
    pub fn semantic_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        parts.push(&self.description);
        for kw in &self.topic_keywords {
            parts.push(kw);
        }
        if let Some(ocr) = &self.ocr_text {
            parts.push(ocr);
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichedPhotoSet {
    #[serde(default)]
    pub enriched_photos: Vec<EnrichedPhoto>,
}

impl EnrichedPhotoSet {
    pub fn by_photo_id(&self, photo_id: &str) -> Option<&EnrichedPhoto> {
        self.enriched_photos.iter().find(|p| p.photo_id == photo_id)
    }
}
