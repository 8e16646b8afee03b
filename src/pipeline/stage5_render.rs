//! Stage 5: Render — turn the page plan into the final HTML document.
//!
//! Print-oriented A4 markup with the processed images referenced
//! relatively, so the output directory can be zipped or printed to PDF as
//! a whole. Items under the review threshold carry a visible marker.
//!
//! Reads:  .cache/page_plan.json + .cache/content_plan.json +
//!         .cache/enriched_photos.json + .cache/manifest.json
//! Writes: output/fotoprotokoll_<slug>[_<date>].html

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use askama::Template;

use crate::config::Settings;
use crate::models::{
    ContentPlan, EnrichedPhotoSet, PagePlan, PageType, ProjectManifest, TextRole,
};

use super::StageError;

#[derive(Template)]
#[template(path = "report.html")]
struct ReportTemplate {
    lang: String,
    title: String,
    pages: Vec<PageView>,
}

struct PageView {
    css_class: &'static str,
    heading: String,
    body_lines: Vec<String>,
    photos: Vec<PhotoView>,
    needs_review: bool,
}

struct PhotoView {
    src: String,
    caption: String,
    size_class: &'static str,
}

pub fn run(
    settings: &Settings,
    manifest: &ProjectManifest,
    content_plan: &ContentPlan,
    page_plan: &PagePlan,
    photo_set: &EnrichedPhotoSet,
) -> Result<PathBuf, StageError> {
    let review_flags: HashMap<&str, bool> = content_plan
        .items
        .iter()
        .map(|item| (item.id.as_str(), item.needs_review))
        .collect();

    let pages = page_plan
        .pages
        .iter()
        .map(|page| {
            let heading = page
                .text_blocks
                .iter()
                .find(|b| b.role == TextRole::Heading)
                .map(|b| b.content.clone())
                .unwrap_or_default();
            let body_lines = page
                .text_blocks
                .iter()
                .filter(|b| b.role != TextRole::Heading)
                .map(|b| b.content.clone())
                .collect();
            let photos = page
                .photo_slots
                .iter()
                .filter_map(|slot| {
                    let enriched = photo_set.by_photo_id(&slot.photo_id)?;
                    Some(PhotoView {
                        // Relative to output/, which sits beside .cache/.
                        src: format!("../{}", enriched.processed_path.display()),
                        caption: slot.caption.clone(),
                        size_class: match slot.display_size {
                            crate::models::DisplaySize::FullWidth => "full-width",
                            crate::models::DisplaySize::HalfWidth => "half-width",
                            crate::models::DisplaySize::PortraitPair => "portrait-pair",
                        },
                    })
                })
                .collect();
            PageView {
                css_class: match page.page_type {
                    PageType::Cover => "cover",
                    PageType::SectionDivider => "divider",
                    PageType::Content => "content",
                },
                heading,
                body_lines,
                photos,
                needs_review: page
                    .content_item_ref
                    .as_deref()
                    .and_then(|id| review_flags.get(id).copied())
                    .unwrap_or(false),
            }
        })
        .collect();

    let template = ReportTemplate {
        lang: settings.language.clone(),
        title: manifest.meta.title.clone(),
        pages,
    };
    let html = template
        .render()
        .map_err(|e| StageError::Render(e.to_string()))?;

    let relative = output_ref(manifest);
    let absolute = settings.resolve(&relative);
    if let Some(parent) = absolute.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&absolute, html)?;

    tracing::info!(output = %absolute.display(), "Stage 5 complete");
    Ok(relative)
}

/// Output path from the manifest title and date, relative to the project
/// directory.
fn output_ref(manifest: &ProjectManifest) -> PathBuf {
    let slug = slugify(&manifest.meta.title);
    let name = match manifest.meta.workshop_date {
        Some(date) => format!("fotoprotokoll_{slug}_{}.html", date.format("%Y%m%d")),
        None => format!("fotoprotokoll_{slug}.html"),
    };
    PathBuf::from("output").join(name)
}

/// Safe ASCII filename slug with German transliteration.
fn slugify(text: &str) -> String {
    let mut lowered = text.to_lowercase();
    for (umlaut, replacement) in [("ä", "ae"), ("ö", "oe"), ("ü", "ue"), ("ß", "ss")] {
        lowered = lowered.replace(umlaut, replacement);
    }
    let mut slug = String::new();
    let mut last_was_separator = true;
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_was_separator = false;
        } else if !last_was_separator {
            slug.push('_');
            last_was_separator = true;
        }
    }
    let slug = slug.trim_matches('_').to_string();
    let truncated: String = slug.chars().take(50).collect();
    if truncated.is_empty() {
        "protokoll".to_string()
    } else {
        truncated
    }
}
