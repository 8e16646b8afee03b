//! Stage 4: Layout — arrange photos and text into pages.
//!
//! Cover page, optional section dividers, content pages with at most
//! `max_photos_per_page` photos each, and display sizes derived from
//! photo orientation. The item heading lands on its first content page;
//! captions come from the enriched descriptions.
//!
//! Reads:  .cache/manifest.json + .cache/content_plan.json +
//!         .cache/enriched_photos.json
//! Writes: .cache/page_plan.json

use std::path::PathBuf;

use crate::config::Settings;
use crate::models::{
    ContentItem, DisplaySize, EnrichedPhotoSet, LayoutVariant, Page, PagePlan, PageType,
    PhotoOrientation, PhotoSlot, ProjectManifest, TextBlock, TextRole,
};

use super::{write_json_artifact, StageError};

pub const ARTIFACT: &str = ".cache/page_plan.json";

pub fn run(
    settings: &Settings,
    manifest: &ProjectManifest,
    content_plan: &crate::models::ContentPlan,
    photo_set: &EnrichedPhotoSet,
) -> Result<(PagePlan, PathBuf), StageError> {
    let mut pages = Vec::new();
    let mut page_number = 1u32;

    pages.push(make_cover(page_number, manifest));
    page_number += 1;

    for item in &content_plan.items {
        if settings.section_dividers {
            pages.push(make_section_divider(page_number, item));
            page_number += 1;
        }
        let content_pages = make_content_pages(
            page_number,
            item,
            manifest,
            photo_set,
            settings.max_photos_per_page,
        );
        page_number += content_pages.len() as u32;
        pages.extend(content_pages);
    }

    let plan = PagePlan { pages };
    let artifact = write_json_artifact(settings, ARTIFACT, &plan)?;

    tracing::info!(pages = plan.pages.len(), "Stage 4 complete");
    Ok((plan, artifact))
}

// ──────────────────────────────────────────────
// Cover and dividers
// ──────────────────────────────────────────────

fn make_cover(page_number: u32, manifest: &ProjectManifest) -> Page {
    let meta = &manifest.meta;
    let mut text_blocks = vec![TextBlock {
        content: meta.title.clone(),
        role: TextRole::Heading,
    }];
    if let Some(date) = meta.workshop_date {
        text_blocks.push(TextBlock {
            content: date.format("%d.%m.%Y").to_string(),
            role: TextRole::Body,
        });
    }
    if let Some(location) = &meta.location {
        text_blocks.push(TextBlock {
            content: location.clone(),
            role: TextRole::Body,
        });
    }

    Page {
        page_number,
        page_type: PageType::Cover,
        layout_variant: LayoutVariant::TextOnly,
        content_item_ref: None,
        photo_slots: vec![],
        text_blocks,
    }
}

fn make_section_divider(page_number: u32, item: &ContentItem) -> Page {
    Page {
        page_number,
        page_type: PageType::SectionDivider,
        layout_variant: LayoutVariant::TextOnly,
        content_item_ref: Some(item.id.clone()),
        photo_slots: vec![],
        text_blocks: vec![TextBlock {
            content: item.heading.clone(),
            role: TextRole::Heading,
        }],
    }
}

// ──────────────────────────────────────────────
// Content pages
// ──────────────────────────────────────────────

/// Distribute one item's photos across content pages; the heading appears
/// on the first page only.
fn make_content_pages(
    start_page: u32,
    item: &ContentItem,
    manifest: &ProjectManifest,
    photo_set: &EnrichedPhotoSet,
    max_per_page: usize,
) -> Vec<Page> {
    if item.photo_ids.is_empty() {
        return vec![Page {
            page_number: start_page,
            page_type: PageType::Content,
            layout_variant: LayoutVariant::TextOnly,
            content_item_ref: Some(item.id.clone()),
            photo_slots: vec![],
            text_blocks: vec![TextBlock {
                content: item.heading.clone(),
                role: TextRole::Heading,
            }],
        }];
    }

    let mut pages = Vec::new();
    for (batch_index, batch) in item.photo_ids.chunks(max_per_page.max(1)).enumerate() {
        let text_blocks = if batch_index == 0 {
            vec![TextBlock {
                content: item.heading.clone(),
                role: TextRole::Heading,
            }]
        } else {
            vec![]
        };

        let photo_slots: Vec<PhotoSlot> = batch
            .iter()
            .map(|photo_id| make_photo_slot(photo_id, batch.len(), manifest, photo_set))
            .collect();

        pages.push(Page {
            page_number: start_page + batch_index as u32,
            page_type: PageType::Content,
            layout_variant: if photo_slots.len() == 1 {
                LayoutVariant::OnePhoto
            } else {
                LayoutVariant::TwoPhoto
            },
            content_item_ref: Some(item.id.clone()),
            photo_slots,
            text_blocks,
        });
    }
    pages
}

fn make_photo_slot(
    photo_id: &str,
    batch_size: usize,
    manifest: &ProjectManifest,
    photo_set: &EnrichedPhotoSet,
) -> PhotoSlot {
    let enriched = photo_set.by_photo_id(photo_id);
    let caption = enriched.map(|e| e.description.clone()).unwrap_or_default();
    let orientation = photo_orientation(photo_id, manifest, photo_set);

    let display_size = if batch_size == 1 {
        match orientation {
            PhotoOrientation::Portrait => DisplaySize::PortraitPair,
            _ => DisplaySize::FullWidth,
        }
    } else {
        match orientation {
            PhotoOrientation::Portrait => DisplaySize::PortraitPair,
            _ => DisplaySize::HalfWidth,
        }
    };

    PhotoSlot {
        photo_id: photo_id.to_string(),
        caption,
        display_size,
    }
}

/// Cropped flipcharts take their orientation from the crop box aspect;
/// everything else from the inventoried image dimensions.
fn photo_orientation(
    photo_id: &str,
    manifest: &ProjectManifest,
    photo_set: &EnrichedPhotoSet,
) -> PhotoOrientation {
    if let Some(crop_box) = photo_set.by_photo_id(photo_id).and_then(|e| e.crop_box) {
        return if crop_box.is_portrait() {
            PhotoOrientation::Portrait
        } else {
            PhotoOrientation::Landscape
        };
    }
    manifest
        .photos
        .iter()
        .find(|p| p.id == photo_id)
        .map(|p| p.orientation)
        .unwrap_or(PhotoOrientation::Landscape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentPlan, CropBox, EnrichedPhoto, Photo, SceneType, WorkshopMeta};
    use chrono::NaiveDate;

    fn photo(id: &str, orientation: PhotoOrientation) -> Photo {
        Photo {
            id: id.into(),
            filename: format!("{id}.jpg"),
            path: PathBuf::from(format!("fotos/{id}.jpg")),
            timestamp_exif: None,
            timestamp_file: None,
            width: 800,
            height: 600,
            orientation,
        }
    }

    fn enriched(photo_id: &str, description: &str, crop_box: Option<CropBox>) -> EnrichedPhoto {
        EnrichedPhoto {
            photo_id: photo_id.into(),
            scene_type: SceneType::Result,
            description: description.into(),
            ocr_text: None,
            topic_keywords: vec![],
            crop_box,
            processed_path: PathBuf::from(format!(".cache/processed/{photo_id}.jpg")),
            analysis_model: "gpt-4o".into(),
        }
    }

    fn item(id: &str, heading: &str, photo_ids: &[&str]) -> ContentItem {
        ContentItem {
            id: id.into(),
            session_ref: "session_001".into(),
            heading: heading.into(),
            photo_ids: photo_ids.iter().map(|s| s.to_string()).collect(),
            text_snippet_ref: None,
            temporal_confidence: 1.0,
            semantic_confidence: 0.8,
            combined_confidence: 0.92,
            needs_review: false,
        }
    }

    fn manifest_with(photos: Vec<Photo>) -> ProjectManifest {
        ProjectManifest {
            meta: WorkshopMeta {
                title: "Strategie-Workshop".into(),
                workshop_date: NaiveDate::from_ymd_opt(2026, 2, 9),
                location: Some("Berlin".into()),
                participants: None,
            },
            sessions: vec![],
            photos,
            text_snippets: vec![],
        }
    }

    fn settings() -> (tempfile::TempDir, Settings) {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings {
            project_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        (dir, s)
    }

    #[test]
    fn cover_carries_title_date_location() {
        let (_dir, settings) = settings();
        let manifest = manifest_with(vec![]);
        let plan = ContentPlan::default();
        let photo_set = EnrichedPhotoSet::default();

        let (page_plan, _) = run(&settings, &manifest, &plan, &photo_set).unwrap();

        let cover = &page_plan.pages[0];
        assert_eq!(cover.page_type, PageType::Cover);
        assert_eq!(cover.text_blocks[0].content, "Strategie-Workshop");
        assert_eq!(cover.text_blocks[1].content, "09.02.2026");
        assert_eq!(cover.text_blocks[2].content, "Berlin");
    }

    #[test]
    fn photos_batched_by_max_per_page() {
        let (_dir, settings) = settings();
        let manifest = manifest_with(vec![
            photo("photo_001", PhotoOrientation::Landscape),
            photo("photo_002", PhotoOrientation::Landscape),
            photo("photo_003", PhotoOrientation::Landscape),
            photo("photo_004", PhotoOrientation::Landscape),
            photo("photo_005", PhotoOrientation::Landscape),
        ]);
        let plan = ContentPlan {
            items: vec![item(
                "item_001",
                "Gruppenarbeit",
                &["photo_001", "photo_002", "photo_003", "photo_004", "photo_005"],
            )],
            ..ContentPlan::default()
        };
        let photo_set = EnrichedPhotoSet::default();

        let (page_plan, _) = run(&settings, &manifest, &plan, &photo_set).unwrap();

        // 1 cover + 3 content pages (2 + 2 + 1)
        assert_eq!(page_plan.pages.len(), 4);
        assert_eq!(page_plan.pages[1].photo_slots.len(), 2);
        assert_eq!(page_plan.pages[3].photo_slots.len(), 1);
        assert_eq!(page_plan.pages[1].layout_variant, LayoutVariant::TwoPhoto);
        assert_eq!(page_plan.pages[3].layout_variant, LayoutVariant::OnePhoto);
        // Heading only on the first content page
        assert!(!page_plan.pages[1].text_blocks.is_empty());
        assert!(page_plan.pages[2].text_blocks.is_empty());
        // Page numbers are sequential
        let numbers: Vec<u32> = page_plan.pages.iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }

    #[test]
    fn section_dividers_inserted_when_enabled() {
        let (_dir, mut settings) = settings();
        settings.section_dividers = true;
        let manifest = manifest_with(vec![photo("photo_001", PhotoOrientation::Landscape)]);
        let plan = ContentPlan {
            items: vec![item("item_001", "Begrüßung", &["photo_001"])],
            ..ContentPlan::default()
        };
        let photo_set = EnrichedPhotoSet::default();

        let (page_plan, _) = run(&settings, &manifest, &plan, &photo_set).unwrap();
        assert_eq!(page_plan.pages[1].page_type, PageType::SectionDivider);
        assert_eq!(page_plan.pages[1].text_blocks[0].content, "Begrüßung");
        assert_eq!(page_plan.pages[2].page_type, PageType::Content);
    }

    #[test]
    fn captions_come_from_enriched_descriptions() {
        let (_dir, settings) = settings();
        let manifest = manifest_with(vec![photo("photo_001", PhotoOrientation::Landscape)]);
        let plan = ContentPlan {
            items: vec![item("item_001", "Begrüßung", &["photo_001"])],
            ..ContentPlan::default()
        };
        let photo_set = EnrichedPhotoSet {
            enriched_photos: vec![enriched("photo_001", "Flipchart mit Agenda", None)],
        };

        let (page_plan, _) = run(&settings, &manifest, &plan, &photo_set).unwrap();
        assert_eq!(page_plan.pages[1].photo_slots[0].caption, "Flipchart mit Agenda");
    }

    #[test]
    fn single_landscape_photo_is_full_width() {
        let slot = make_photo_slot(
            "photo_001",
            1,
            &manifest_with(vec![photo("photo_001", PhotoOrientation::Landscape)]),
            &EnrichedPhotoSet::default(),
        );
        assert_eq!(slot.display_size, DisplaySize::FullWidth);
    }

    #[test]
    fn paired_portrait_photo_keeps_portrait_pair() {
        let slot = make_photo_slot(
            "photo_001",
            2,
            &manifest_with(vec![photo("photo_001", PhotoOrientation::Portrait)]),
            &EnrichedPhotoSet::default(),
        );
        assert_eq!(slot.display_size, DisplaySize::PortraitPair);
    }

    #[test]
    fn crop_box_aspect_overrides_orientation() {
        let manifest = manifest_with(vec![photo("photo_001", PhotoOrientation::Landscape)]);
        let photo_set = EnrichedPhotoSet {
            enriched_photos: vec![enriched(
                "photo_001",
                "Hochformat-Flipchart",
                Some(CropBox {
                    x_min: 0.3,
                    y_min: 0.05,
                    x_max: 0.7,
                    y_max: 0.95,
                }),
            )],
        };
        assert_eq!(
            photo_orientation("photo_001", &manifest, &photo_set),
            PhotoOrientation::Portrait
        );
    }

    #[test]
    fn item_without_photos_gets_text_only_page() {
        let (_dir, settings) = settings();
        let manifest = manifest_with(vec![]);
        let plan = ContentPlan {
            items: vec![item("item_001", "Leere Session", &[])],
            ..ContentPlan::default()
        };

        let (page_plan, _) = run(&settings, &manifest, &plan, &EnrichedPhotoSet::default()).unwrap();
        let page = &page_plan.pages[1];
        assert_eq!(page.layout_variant, LayoutVariant::TextOnly);
        assert!(page.photo_slots.is_empty());
        assert_eq!(page.text_blocks[0].content, "Leere Session");
    }
}
