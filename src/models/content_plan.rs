//! Stage 3b artifact: the content plan.
//!
//! Carries both views of the matching result: per-photo winning candidates
//! (for a later review UI) and per-session content items consumed by the
//! layout stage. Notes that clear no session's minimum confidence are
//! surfaced in `unassigned_notes` — never silently dropped.

use serde::{Deserialize, Serialize};

/// The winning assignment for one photo against one session.
///
/// `combined_confidence = w_t · temporal + w_s · semantic` with the
/// configured weights; `needs_review` marks scores under the configured
/// threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub photo_id: String,
    pub session_id: String,
    pub temporal_confidence: f64,
    pub semantic_confidence: f64,
    pub combined_confidence: f64,
    pub needs_review: bool,
}

/// One session's block in the final document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub session_ref: String,
    pub heading: String,
    #[serde(default)]
    pub photo_ids: Vec<String>,
    #[serde(default)]
    pub text_snippet_ref: Option<String>,
    pub temporal_confidence: f64,
    pub semantic_confidence: f64,
    pub combined_confidence: f64,
    pub needs_review: bool,
}

/// A note that cleared no session's minimum confidence, reported for
/// manual placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnassignedNote {
    pub snippet_id: String,
    pub best_session_id: Option<String>,
    pub best_confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentPlan {
    #[serde(default)]
    pub items: Vec<ContentItem>,
    #[serde(default)]
    pub photo_assignments: Vec<MatchCandidate>,
    #[serde(default)]
    pub unassigned_notes: Vec<UnassignedNote>,
}

impl ContentPlan {
    pub fn item_for_session(&self, session_id: &str) -> Option<&ContentItem> {
        self.items.iter().find(|i| i.session_ref == session_id)
    }
}
