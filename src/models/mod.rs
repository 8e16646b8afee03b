//! Stage artifact data contracts.
//!
//! One concrete serde type per stage output. Every stage validates its
//! upstream artifact by deserializing into these types at the boundary and
//! fails fast with a descriptive error instead of limping into downstream
//! logic with malformed data.

pub mod content_plan;
pub mod enriched;
pub mod manifest;
pub mod page_plan;
pub mod photo_results;

pub use content_plan::{ContentItem, ContentPlan, MatchCandidate, UnassignedNote};
pub use enriched::{CropBox, EnrichedPhoto, EnrichedPhotoSet, PhotoAnalysis, SceneType};
pub use manifest::{AgendaSession, Photo, PhotoOrientation, ProjectManifest, TextSnippet, WorkshopMeta};
pub use page_plan::{DisplaySize, LayoutVariant, Page, PagePlan, PageType, PhotoSlot, TextBlock, TextRole};
pub use photo_results::{PhotoResults, ProcessedPhoto};
