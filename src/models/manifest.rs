//! Stage 1 artifact: the project manifest.
//!
//! Inventory of everything the pipeline works from — workshop metadata,
//! agenda sessions with time windows, photo records with timestamps, and
//! text notes. Downstream stages treat this as read-only input.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Workshop metadata extracted from the agenda document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkshopMeta {
    pub title: String,
    #[serde(default)]
    pub workshop_date: Option<NaiveDate>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub participants: Option<u32>,
}

/// One agenda session. `order` is 1-based and defines the session sequence;
/// time windows may be absent when the agenda carries no times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgendaSession {
    pub id: String,
    pub order: u32,
    pub name: String,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
}

/// How a photo is displayed after orientation correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoOrientation {
    Landscape,
    Portrait,
    Square,
}

impl PhotoOrientation {
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        if width > height {
            Self::Landscape
        } else if height > width {
            Self::Portrait
        } else {
            Self::Square
        }
    }
}

/// One photo file as inventoried by stage 1.
///
/// `path` is relative to the project directory. Width/height reflect the
/// displayed image (already swapped for EXIF orientations 6/8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    pub filename: String,
    pub path: PathBuf,
    #[serde(default)]
    pub timestamp_exif: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timestamp_file: Option<DateTime<Utc>>,
    pub width: u32,
    pub height: u32,
    pub orientation: PhotoOrientation,
}

impl Photo {
    /// EXIF capture timestamp preferred; file mtime as fallback. `None`
    /// when neither is usable — such photos get neutral temporal
    /// confidence in matching.
    pub fn best_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp_exif.or(self.timestamp_file)
    }
}

/// One text note from the project's text directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSnippet {
    pub id: String,
    pub filename: String,
    pub content: String,
    pub word_count: usize,
}

/// Complete stage 1 output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub meta: WorkshopMeta,
    #[serde(default)]
    pub sessions: Vec<AgendaSession>,
    #[serde(default)]
    pub photos: Vec<Photo>,
    #[serde(default)]
    pub text_snippets: Vec<TextSnippet>,
}
