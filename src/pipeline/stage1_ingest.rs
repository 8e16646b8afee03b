//! Stage 1: Ingest — parse the project directory into the manifest.
//!
//! Reads:  <project>/agenda/, <project>/fotos/, <project>/text/
//! Writes: <project>/.cache/manifest.json

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Tag};

use crate::config::Settings;
use crate::models::{Photo, PhotoOrientation, ProjectManifest, TextSnippet, WorkshopMeta};

use super::agenda::{default_sessions, parse_agenda};
use super::{write_json_artifact, StageError};

pub const ARTIFACT: &str = ".cache/manifest.json";

const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const TEXT_EXTENSIONS: &[&str] = &["md", "txt"];
const AGENDA_EXTENSIONS: &[&str] = &["txt", "md"];

/// EXIF orientation values that swap width/height for display.
const TRANSPOSING_ORIENTATIONS: &[u32] = &[6, 8];

pub fn run(settings: &Settings) -> Result<(ProjectManifest, PathBuf), StageError> {
    let (meta, sessions) = load_agenda(settings);
    let photos = inventory_photos(settings)?;
    if photos.is_empty() {
        return Err(StageError::NoPhotos);
    }
    let text_snippets = read_text_snippets(settings)?;

    let manifest = ProjectManifest {
        meta,
        sessions,
        photos,
        text_snippets,
    };
    let artifact = write_json_artifact(settings, ARTIFACT, &manifest)?;

    tracing::info!(
        title = %manifest.meta.title,
        sessions = manifest.sessions.len(),
        photos = manifest.photos.len(),
        text_snippets = manifest.text_snippets.len(),
        "Stage 1 complete"
    );
    Ok((manifest, artifact))
}

// ──────────────────────────────────────────────
// Agenda
// ──────────────────────────────────────────────

fn load_agenda(settings: &Settings) -> (WorkshopMeta, Vec<crate::models::AgendaSession>) {
    let dir = settings.agenda_dir();
    let files = sorted_files(&dir, AGENDA_EXTENSIONS);

    let Some(agenda_path) = files.first() else {
        tracing::warn!(dir = %dir.display(), "No agenda file found — using defaults");
        return (
            WorkshopMeta {
                title: "Workshop".into(),
                workshop_date: None,
                location: None,
                participants: None,
            },
            default_sessions(),
        );
    };
    if files.len() > 1 {
        tracing::warn!(
            used = %agenda_path.display(),
            "Multiple agenda files found — using the first"
        );
    }

    let stem = agenda_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match fs::read_to_string(agenda_path) {
        Ok(text) => parse_agenda(&text, &stem),
        Err(error) => {
            tracing::warn!(path = %agenda_path.display(), %error, "Agenda unreadable — using defaults");
            (
                WorkshopMeta {
                    title: "Workshop".into(),
                    workshop_date: None,
                    location: None,
                    participants: None,
                },
                default_sessions(),
            )
        }
    }
}

// ──────────────────────────────────────────────
// Photos
// ──────────────────────────────────────────────

fn inventory_photos(settings: &Settings) -> Result<Vec<Photo>, StageError> {
    let dir = settings.fotos_dir();
    if !dir.exists() {
        tracing::warn!(dir = %dir.display(), "Photos directory not found");
        return Ok(Vec::new());
    }

    let mut photos = Vec::new();
    for (index, path) in sorted_files(&dir, PHOTO_EXTENSIONS).iter().enumerate() {
        match read_photo_metadata(path, index as u32 + 1, &settings.project_dir) {
            Some(photo) => photos.push(photo),
            None => tracing::warn!(path = %path.display(), "Skipping unreadable photo"),
        }
    }
    Ok(photos)
}

fn read_photo_metadata(path: &Path, index: u32, project_dir: &Path) -> Option<Photo> {
    let (mut width, mut height) = image::image_dimensions(path).ok()?;
    let bytes = fs::read(path).ok()?;

    let exif_data = exif::Reader::new()
        .read_from_container(&mut std::io::Cursor::new(&bytes))
        .ok();
    let orientation_tag = exif_data
        .as_ref()
        .and_then(|e| e.get_field(Tag::Orientation, In::PRIMARY))
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1);
    let timestamp_exif = exif_data.as_ref().and_then(read_exif_timestamp);

    // Swap dimensions for rotationally transposed images so orientation
    // reflects how the image is actually displayed.
    if TRANSPOSING_ORIENTATIONS.contains(&orientation_tag) {
        std::mem::swap(&mut width, &mut height);
    }

    let timestamp_file: Option<DateTime<Utc>> = fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(Into::into);
    let relative_path = path.strip_prefix(project_dir).ok()?.to_path_buf();

    Some(Photo {
        id: format!("photo_{index:03}"),
        filename: path.file_name()?.to_string_lossy().into_owned(),
        path: relative_path,
        timestamp_exif,
        timestamp_file,
        width,
        height,
        orientation: PhotoOrientation::from_dimensions(width, height),
    })
}

/// Capture timestamps in priority order: DateTimeOriginal,
/// DateTimeDigitized, DateTime.
fn read_exif_timestamp(exif_data: &exif::Exif) -> Option<DateTime<Utc>> {
    for tag in [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime] {
        let Some(field) = exif_data.get_field(tag, In::PRIMARY) else {
            continue;
        };
        let exif::Value::Ascii(ref values) = field.value else {
            continue;
        };
        let Some(raw) = values.first() else { continue };
        let text = String::from_utf8_lossy(raw);
        if let Ok(naive) = NaiveDateTime::parse_from_str(text.trim(), "%Y:%m:%d %H:%M:%S") {
            return Some(naive.and_utc());
        }
    }
    None
}

// ──────────────────────────────────────────────
// Text snippets
// ──────────────────────────────────────────────

fn read_text_snippets(settings: &Settings) -> Result<Vec<TextSnippet>, StageError> {
    let dir = settings.text_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut snippets = Vec::new();
    for (index, path) in sorted_files(&dir, TEXT_EXTENSIONS).iter().enumerate() {
        match fs::read_to_string(path) {
            Ok(content) => {
                let word_count = content.split_whitespace().count();
                snippets.push(TextSnippet {
                    id: format!("text_{:03}", index + 1),
                    filename: path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
                    content,
                    word_count,
                });
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "Skipping unreadable text file");
            }
        }
    }
    Ok(snippets)
}

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

fn sorted_files(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| extensions.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}
