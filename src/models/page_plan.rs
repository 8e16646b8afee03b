//! Stage 4 artifact: the page plan.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Cover,
    SectionDivider,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutVariant {
    OnePhoto,
    TwoPhoto,
    TextOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplaySize {
    FullWidth,
    HalfWidth,
    PortraitPair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextRole {
    Heading,
    Body,
    Caption,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoSlot {
    pub photo_id: String,
    pub caption: String,
    pub display_size: DisplaySize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub content: String,
    pub role: TextRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    pub page_type: PageType,
    pub layout_variant: LayoutVariant,
    #[serde(default)]
    pub content_item_ref: Option<String>,
    #[serde(default)]
    pub photo_slots: Vec<PhotoSlot>,
    #[serde(default)]
    pub text_blocks: Vec<TextBlock>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PagePlan {
    #[serde(default)]
    pub pages: Vec<Page>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_variant_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&LayoutVariant::OnePhoto).unwrap(),
            "\"one-photo\""
        );
        assert_eq!(
            serde_json::to_string(&DisplaySize::PortraitPair).unwrap(),
            "\"portrait-pair\""
        );
    }

    #[test]
    fn page_round_trips() {
        let page = Page {
            page_number: 2,
            page_type: PageType::Content,
            layout_variant: LayoutVariant::TwoPhoto,
            content_item_ref: Some("item_001".into()),
            photo_slots: vec![PhotoSlot {
                photo_id: "photo_001".into(),
                caption: "Flipchart".into(),
                display_size: DisplaySize::HalfWidth,
            }],
            text_blocks: vec![TextBlock {
                content: "Begrüßung".into(),
                role: TextRole::Heading,
            }],
        };
        let json = serde_json::to_string(&page).unwrap();
        let back: Page = serde_json::from_str(&json).unwrap();
        assert_eq!(back.page_number, 2);
        assert_eq!(back.page_type, PageType::Content);
        assert_eq!(back.photo_slots.len(), 1);
    }
}
