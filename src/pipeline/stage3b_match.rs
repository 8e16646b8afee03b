//! Stage 3b: Match — assign photos and notes to agenda sessions.
//!
//! Every photo is scored against every session on two dimensions:
//!
//! * Temporal — 1.0 inside the session window, decaying linearly to 0 at
//!   a configured maximum distance outside it.
//! * Semantic — dot product of unit-length embeddings of the photo's
//!   derived text and the session name (cosine similarity, clamped to
//!   [0,1]).
//!
//! Combined confidence is the configured weighted sum. Each photo goes to
//! its highest-scoring session; ties break on earliest session start,
//! then lowest session id, so repeated runs produce identical output.
//! Untimestamped photos whose scores tie across sessions are distributed
//! round-robin in session order. Notes follow the same ranking but may
//! stay unassigned below a minimum confidence — surfaced, not dropped.
//!
//! Embedding calls are batched and memoized per text content hash, so
//! partial cache hits never re-embed already-seen items.
//!
//! Reads:  .cache/manifest.json + .cache/enriched_photos.json
//! Writes: .cache/content_plan.json

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveTime, Timelike, Utc};

use crate::cache::{sha256_hex, MemoStore};
use crate::config::Settings;
use crate::models::{
    AgendaSession, ContentItem, ContentPlan, EnrichedPhotoSet, MatchCandidate, ProjectManifest,
    UnassignedNote,
};
use crate::services::{with_retry, EmbeddingClient, RetryPolicy};

use super::{write_json_artifact, StageError};

pub const ARTIFACT: &str = ".cache/content_plan.json";

const EMBED_BATCH_SIZE: usize = 64;

/// Notes are truncated for embedding to stay within service input limits.
const NOTE_EMBED_CHAR_LIMIT: usize = 8000;

/// Open-ended last sessions get this effective duration.
const OPEN_END_MINUTES: u32 = 90;

/// Temporal confidence when a photo or session carries no usable time.
const NEUTRAL_TEMPORAL: f64 = 0.5;

/// Temporal confidence for a time-less session when other sessions do
/// have times — lowest priority for time-stamped photos.
const UNTIMED_SESSION_TEMPORAL: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
struct Scored {
    temporal: f64,
    semantic: f64,
    combined: f64,
}

pub fn run(
    settings: &Settings,
    manifest: &ProjectManifest,
    photo_set: &EnrichedPhotoSet,
    memo: &MemoStore,
    embedder: &dyn EmbeddingClient,
) -> Result<(ContentPlan, PathBuf), StageError> {
    let sessions = &manifest.sessions;
    if sessions.is_empty() {
        tracing::warn!("No sessions in manifest — producing empty content plan");
        let plan = ContentPlan::default();
        let artifact = write_json_artifact(settings, ARTIFACT, &plan)?;
        return Ok((plan, artifact));
    }

    // One deduplicated, memoized batch pass over every text we need.
    let session_texts: Vec<String> = sessions.iter().map(|s| s.name.clone()).collect();
    let photo_texts: Vec<String> = manifest
        .photos
        .iter()
        .map(|p| {
            photo_set
                .by_photo_id(&p.id)
                .map(|e| e.semantic_text())
                .unwrap_or_default()
        })
        .collect();
    let note_texts: Vec<String> = manifest
        .text_snippets
        .iter()
        .map(|n| truncate_chars(&n.content, NOTE_EMBED_CHAR_LIMIT))
        .collect();

    let mut all_texts: Vec<&str> = Vec::new();
    all_texts.extend(session_texts.iter().map(String::as_str));
    all_texts.extend(photo_texts.iter().map(String::as_str));
    all_texts.extend(note_texts.iter().map(String::as_str));
    let vectors = embed_memoized(settings, memo, embedder, &all_texts)?;

    let session_vecs = &vectors[..sessions.len()];
    let photo_vecs = &vectors[sessions.len()..sessions.len() + photo_texts.len()];
    let note_vecs = &vectors[sessions.len() + photo_texts.len()..];

    // ── Photo assignment ─────────────────────────────────

    let mut assignments: HashMap<&str, Vec<String>> =
        sessions.iter().map(|s| (s.id.as_str(), Vec::new())).collect();
    let mut photo_scores: HashMap<(usize, usize), Scored> = HashMap::new();
    let mut photo_assignments = Vec::with_capacity(manifest.photos.len());
    let mut round_robin = 0usize;

    for (p_idx, photo) in manifest.photos.iter().enumerate() {
        let scores: Vec<Scored> = sessions
            .iter()
            .enumerate()
            .map(|(s_idx, session)| {
                let temporal = temporal_score(
                    photo.best_timestamp(),
                    session,
                    sessions,
                    settings.temporal_max_distance_minutes,
                );
                let semantic = cosine_confidence(&photo_vecs[p_idx], &session_vecs[s_idx]);
                let scored = Scored {
                    temporal,
                    semantic,
                    combined: combined_confidence(settings, temporal, semantic),
                };
                photo_scores.insert((p_idx, s_idx), scored);
                scored
            })
            .collect();

        let tied = tied_best_indices(&scores);
        let winner = if photo.best_timestamp().is_none() && tied.len() > 1 {
            // No temporal evidence and nothing to discriminate — spread
            // evenly across the tied sessions in session order.
            let index = tied[round_robin % tied.len()];
            round_robin += 1;
            index
        } else {
            break_ties(&tied, sessions)
        };

        let best = scores[winner];
        let session = &sessions[winner];
        assignments
            .get_mut(session.id.as_str())
            .map(|v| v.push(photo.id.clone()));
        photo_assignments.push(MatchCandidate {
            photo_id: photo.id.clone(),
            session_id: session.id.clone(),
            temporal_confidence: best.temporal,
            semantic_confidence: best.semantic,
            combined_confidence: best.combined,
            needs_review: best.combined < settings.match_confidence_threshold,
        });
    }

    // ── Note assignment ──────────────────────────────────

    let (notes_by_session, unassigned_notes) =
        assign_notes(settings, manifest, sessions, session_vecs, note_vecs);

    // ── Content items ────────────────────────────────────

    let mut items = Vec::with_capacity(sessions.len());
    for (s_idx, session) in sessions.iter().enumerate() {
        let assigned = &assignments[session.id.as_str()];
        let photo_indices: Vec<usize> = manifest
            .photos
            .iter()
            .enumerate()
            .filter(|(_, p)| assigned.contains(&p.id))
            .map(|(i, _)| i)
            .collect();

        let agg_temporal = mean_or_neutral(
            photo_indices
                .iter()
                .map(|p_idx| photo_scores[&(*p_idx, s_idx)].temporal),
        );
        let agg_semantic = mean_or_neutral(
            photo_indices
                .iter()
                .map(|p_idx| photo_scores[&(*p_idx, s_idx)].semantic),
        );
        let combined = combined_confidence(settings, agg_temporal, agg_semantic);

        let item = ContentItem {
            id: format!("item_{:03}", s_idx + 1),
            session_ref: session.id.clone(),
            heading: session.name.clone(),
            photo_ids: assigned.clone(),
            text_snippet_ref: notes_by_session.get(session.id.as_str()).cloned(),
            temporal_confidence: round4(agg_temporal),
            semantic_confidence: round4(agg_semantic),
            combined_confidence: combined,
            needs_review: combined < settings.match_confidence_threshold,
        };
        tracing::info!(
            session = %session.id,
            heading = %session.name,
            photos = item.photo_ids.len(),
            confidence = item.combined_confidence,
            needs_review = item.needs_review,
            "Session matched"
        );
        items.push(item);
    }

    let plan = ContentPlan {
        items,
        photo_assignments,
        unassigned_notes,
    };
    let artifact = write_json_artifact(settings, ARTIFACT, &plan)?;

    tracing::info!(
        sessions = plan.items.len(),
        photos = plan.photo_assignments.len(),
        unassigned_notes = plan.unassigned_notes.len(),
        "Stage 3b complete"
    );
    Ok((plan, artifact))
}

// ──────────────────────────────────────────────
// Temporal scoring
// ──────────────────────────────────────────────

/// Score how well a photo timestamp aligns with a session time window.
///
/// 1.0 inside the window; outside it the score decays linearly, reaching
/// 0 at `max_distance_minutes` and flooring there. Missing evidence on
/// either side yields the neutral score.
fn temporal_score(
    timestamp: Option<DateTime<Utc>>,
    session: &AgendaSession,
    all_sessions: &[AgendaSession],
    max_distance_minutes: f64,
) -> f64 {
    let Some(timestamp) = timestamp else {
        return NEUTRAL_TEMPORAL;
    };
    if !all_sessions.iter().any(|s| s.start_time.is_some()) {
        return NEUTRAL_TEMPORAL;
    }
    let Some(start) = session.start_time else {
        return UNTIMED_SESSION_TEMPORAL;
    };

    let end = effective_end(session, all_sessions, start);
    let photo_minutes = minutes_of_day(timestamp.time());
    let start_minutes = minutes_of_time(start);
    let end_minutes = minutes_of_time(end);

    if (start_minutes..=end_minutes).contains(&photo_minutes) {
        return 1.0;
    }
    let distance = (photo_minutes - start_minutes)
        .abs()
        .min((photo_minutes - end_minutes).abs());
    (1.0 - distance / max_distance_minutes).max(0.0)
}

/// Session end: explicit end time, else the next timed session's start,
/// else a fixed open-ended duration (clamped to end of day).
fn effective_end(
    session: &AgendaSession,
    all_sessions: &[AgendaSession],
    start: NaiveTime,
) -> NaiveTime {
    if let Some(end) = session.end_time {
        return end;
    }
    let next_start = all_sessions
        .iter()
        .filter(|s| s.order > session.order && s.start_time.is_some())
        .min_by_key(|s| s.order)
        .and_then(|s| s.start_time);
    if let Some(next) = next_start {
        return next;
    }
    let total = (minutes_of_time(start) as u32 + OPEN_END_MINUTES).min(23 * 60 + 59);
    NaiveTime::from_hms_opt(total / 60, total % 60, 0).unwrap_or(start)
}

fn minutes_of_time(t: NaiveTime) -> f64 {
    (t.hour() * 60 + t.minute()) as f64
}

fn minutes_of_day(t: NaiveTime) -> f64 {
    minutes_of_time(t) + (t.second() as f64) / 60.0
}

// ──────────────────────────────────────────────
// Semantic scoring
// ──────────────────────────────────────────────

/// Cosine similarity of two unit vectors, clamped to [0,1] so the
/// confidence range invariant holds even for anti-correlated vectors.
fn cosine_confidence(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    round4(dot.clamp(0.0, 1.0))
}

pub(crate) fn combined_confidence(settings: &Settings, temporal: f64, semantic: f64) -> f64 {
    round4(settings.temporal_weight * temporal + settings.semantic_weight * semantic)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn mean_or_neutral(values: impl Iterator<Item = f64>) -> f64 {
    let collected: Vec<f64> = values.collect();
    if collected.is_empty() {
        NEUTRAL_TEMPORAL
    } else {
        collected.iter().sum::<f64>() / collected.len() as f64
    }
}

// ──────────────────────────────────────────────
// Assignment
// ──────────────────────────────────────────────

/// Indices of every session sharing the top combined confidence.
fn tied_best_indices(scores: &[Scored]) -> Vec<usize> {
    let best = scores
        .iter()
        .map(|s| s.combined)
        .fold(f64::MIN, f64::max);
    scores
        .iter()
        .enumerate()
        .filter(|(_, s)| s.combined == best)
        .map(|(i, _)| i)
        .collect()
}

/// Deterministic tie-break: earliest session start time (sessions without
/// a start sort last), then lowest session id.
fn break_ties(tied: &[usize], sessions: &[AgendaSession]) -> usize {
    *tied
        .iter()
        .min_by(|&&a, &&b| {
            let key = |i: usize| {
                (
                    sessions[i].start_time.is_none(),
                    sessions[i].start_time,
                    sessions[i].id.clone(),
                )
            };
            key(a).cmp(&key(b))
        })
        .unwrap_or(&0)
}

/// Rank each note against all sessions (neutral temporal evidence) and
/// keep the single best note per session; everything else is surfaced as
/// unassigned.
fn assign_notes(
    settings: &Settings,
    manifest: &ProjectManifest,
    sessions: &[AgendaSession],
    session_vecs: &[Vec<f32>],
    note_vecs: &[Vec<f32>],
) -> (HashMap<String, String>, Vec<UnassignedNote>) {
    let mut best_per_session: HashMap<String, (String, f64)> = HashMap::new();
    let mut unassigned = Vec::new();

    for (n_idx, note) in manifest.text_snippets.iter().enumerate() {
        let scores: Vec<Scored> = session_vecs
            .iter()
            .map(|s_vec| {
                let semantic = cosine_confidence(&note_vecs[n_idx], s_vec);
                Scored {
                    temporal: NEUTRAL_TEMPORAL,
                    semantic,
                    combined: combined_confidence(settings, NEUTRAL_TEMPORAL, semantic),
                }
            })
            .collect();

        let winner = break_ties(&tied_best_indices(&scores), sessions);
        let best = scores[winner];
        let session_id = sessions[winner].id.clone();

        if best.combined < settings.note_min_confidence {
            tracing::warn!(
                note = %note.id,
                best_session = %session_id,
                confidence = best.combined,
                "Note below minimum confidence — left unassigned"
            );
            unassigned.push(UnassignedNote {
                snippet_id: note.id.clone(),
                best_session_id: Some(session_id),
                best_confidence: best.combined,
            });
            continue;
        }

        match best_per_session.get(&session_id) {
            Some((_, held)) if *held >= best.combined => {
                // Session slot already taken by a stronger note.
                unassigned.push(UnassignedNote {
                    snippet_id: note.id.clone(),
                    best_session_id: Some(session_id),
                    best_confidence: best.combined,
                });
            }
            Some((displaced, _)) => {
                unassigned.push(UnassignedNote {
                    snippet_id: displaced.clone(),
                    best_session_id: Some(session_id.clone()),
                    best_confidence: best.combined,
                });
                best_per_session.insert(session_id, (note.id.clone(), best.combined));
            }
            None => {
                best_per_session.insert(session_id, (note.id.clone(), best.combined));
            }
        }
    }

    unassigned.sort_by(|a, b| a.snippet_id.cmp(&b.snippet_id));
    let by_session = best_per_session
        .into_iter()
        .map(|(session, (note, _))| (session, note))
        .collect();
    (by_session, unassigned)
}

// ──────────────────────────────────────────────
// Embedding with per-item memoization
// ──────────────────────────────────────────────

fn embed_memoized(
    settings: &Settings,
    memo: &MemoStore,
    embedder: &dyn EmbeddingClient,
    texts: &[&str],
) -> Result<Vec<Vec<f32>>, StageError> {
    let policy = RetryPolicy::from_settings(settings);
    let keys: Vec<String> = texts
        .iter()
        .map(|t| sha256_hex(format!("{}\n{t}", settings.embedding_model).as_bytes()))
        .collect();

    let mut resolved: Vec<Option<Vec<f32>>> =
        keys.iter().map(|key| memo.get_json(key)).collect();

    // Unique unresolved keys, first-seen order, so duplicate texts embed once.
    let mut pending: Vec<(String, String)> = Vec::new();
    for (i, vector) in resolved.iter().enumerate() {
        if vector.is_none() && !pending.iter().any(|(key, _)| *key == keys[i]) {
            pending.push((keys[i].clone(), texts[i].to_string()));
        }
    }

    let mut computed: HashMap<String, Vec<f32>> = HashMap::new();
    for chunk in pending.chunks(EMBED_BATCH_SIZE) {
        let batch: Vec<&str> = chunk.iter().map(|(_, text)| text.as_str()).collect();
        let vectors = with_retry(&policy, "embed_texts", || embedder.embed_texts(&batch))?;
        for ((key, _), vector) in chunk.iter().zip(vectors) {
            memo.put_json(key, &vector);
            computed.insert(key.clone(), vector);
        }
    }

    let mut out = Vec::with_capacity(texts.len());
    for (i, vector) in resolved.iter_mut().enumerate() {
        match vector.take().or_else(|| computed.get(&keys[i]).cloned()) {
            Some(v) => out.push(v),
            None => {
                // A key neither memoized nor computed means the service
                // returned fewer vectors than requested.
                return Err(StageError::Service(
                    crate::services::ServiceError::Permanent(
                        "Embedding service returned an incomplete batch".into(),
                    ),
                ));
            }
        }
    }
    Ok(out)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        EnrichedPhoto, Photo, PhotoOrientation, SceneType, TextSnippet, WorkshopMeta,
    };
    use crate::services::MockEmbeddingClient;
    use chrono::TimeZone;

    fn session(id: &str, order: u32, name: &str, start: Option<(u32, u32)>, end: Option<(u32, u32)>) -> AgendaSession {
        AgendaSession {
            id: id.into(),
            order,
            name: name.into(),
            start_time: start.and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0)),
            end_time: end.and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0)),
        }
    }

    fn photo(id: &str, ts: Option<(u32, u32)>) -> Photo {
        Photo {
            id: id.into(),
            filename: format!("{id}.jpg"),
            path: PathBuf::from(format!("fotos/{id}.jpg")),
            timestamp_exif: ts.map(|(h, m)| Utc.with_ymd_and_hms(2026, 2, 9, h, m, 0).unwrap()),
            timestamp_file: None,
            width: 800,
            height: 600,
            orientation: PhotoOrientation::Landscape,
        }
    }

    fn enriched(photo_id: &str, description: &str) -> EnrichedPhoto {
        EnrichedPhoto {
            photo_id: photo_id.into(),
            scene_type: SceneType::Result,
            description: description.into(),
            ocr_text: None,
            topic_keywords: vec![],
            crop_box: None,
            processed_path: PathBuf::from(format!(".cache/processed/{photo_id}.jpg")),
            analysis_model: "gpt-4o".into(),
        }
    }

    fn note(id: &str, content: &str) -> TextSnippet {
        TextSnippet {
            id: id.into(),
            filename: format!("{id}.md"),
            content: content.into(),
            word_count: content.split_whitespace().count(),
        }
    }

    fn manifest(
        sessions: Vec<AgendaSession>,
        photos: Vec<Photo>,
        notes: Vec<TextSnippet>,
    ) -> ProjectManifest {
        ProjectManifest {
            meta: WorkshopMeta {
                title: "Test".into(),
                workshop_date: None,
                location: None,
                participants: None,
            },
            sessions,
            photos,
            text_snippets: notes,
        }
    }

    fn settings_in(dir: &tempfile::TempDir) -> Settings {
        Settings {
            project_dir: dir.path().to_path_buf(),
            ..Settings::default()
        }
    }

    // ── Temporal scoring ─────────────────────────────────

    #[test]
    fn timestamp_inside_window_scores_one() {
        let s = session("session_001", 1, "Morgen", Some((10, 0)), Some((11, 0)));
        let ts = Utc.with_ymd_and_hms(2026, 2, 9, 10, 30, 0).unwrap();
        assert_eq!(temporal_score(Some(ts), &s, &[s.clone()], 60.0), 1.0);
    }

    #[test]
    fn linear_decay_reaches_half_at_half_max_distance() {
        let s = session("session_001", 1, "Morgen", Some((10, 0)), Some((11, 0)));
        let ts = Utc.with_ymd_and_hms(2026, 2, 9, 11, 30, 0).unwrap();
        let score = temporal_score(Some(ts), &s, &[s.clone()], 60.0);
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn decay_floors_at_zero_beyond_max_distance() {
        let s = session("session_001", 1, "Morgen", Some((10, 0)), Some((11, 0)));
        let at_max = Utc.with_ymd_and_hms(2026, 2, 9, 12, 0, 0).unwrap();
        assert_eq!(temporal_score(Some(at_max), &s, &[s.clone()], 60.0), 0.0);
        let beyond = Utc.with_ymd_and_hms(2026, 2, 9, 12, 30, 0).unwrap();
        assert_eq!(temporal_score(Some(beyond), &s, &[s.clone()], 60.0), 0.0);
    }

    #[test]
    fn missing_timestamp_is_neutral() {
        let s = session("session_001", 1, "Morgen", Some((10, 0)), Some((11, 0)));
        assert_eq!(temporal_score(None, &s, &[s.clone()], 60.0), NEUTRAL_TEMPORAL);
    }

    #[test]
    fn no_session_times_anywhere_is_neutral() {
        let s = session("session_001", 1, "Workshop", None, None);
        let ts = Utc.with_ymd_and_hms(2026, 2, 9, 10, 0, 0).unwrap();
        assert_eq!(temporal_score(Some(ts), &s, &[s.clone()], 60.0), NEUTRAL_TEMPORAL);
    }

    #[test]
    fn untimed_session_among_timed_ones_scores_low() {
        let timed = session("session_001", 1, "Morgen", Some((9, 0)), Some((10, 0)));
        let untimed = session("session_002", 2, "Sonstiges", None, None);
        let ts = Utc.with_ymd_and_hms(2026, 2, 9, 9, 30, 0).unwrap();
        let all = vec![timed, untimed.clone()];
        assert_eq!(
            temporal_score(Some(ts), &untimed, &all, 60.0),
            UNTIMED_SESSION_TEMPORAL
        );
    }

    #[test]
    fn open_ended_session_uses_next_start_as_end() {
        let first = session("session_001", 1, "Morgen", Some((9, 0)), None);
        let second = session("session_002", 2, "Mittag", Some((12, 0)), None);
        let all = vec![first.clone(), second];
        let ts = Utc.with_ymd_and_hms(2026, 2, 9, 11, 30, 0).unwrap();
        assert_eq!(temporal_score(Some(ts), &first, &all, 30.0), 1.0);
    }

    #[test]
    fn last_open_ended_session_gets_fixed_duration() {
        let only = session("session_001", 1, "Abschluss", Some((16, 0)), None);
        let inside = Utc.with_ymd_and_hms(2026, 2, 9, 17, 15, 0).unwrap();
        assert_eq!(temporal_score(Some(inside), &only, &[only.clone()], 30.0), 1.0);
        let outside = Utc.with_ymd_and_hms(2026, 2, 9, 18, 0, 0).unwrap();
        assert!(temporal_score(Some(outside), &only, &[only.clone()], 30.0) < 1.0);
    }

    // ── Combined confidence ──────────────────────────────

    #[test]
    fn weighted_combination_scenario() {
        let settings = Settings::default(); // weights 0.6 / 0.4, threshold 0.65
        let combined = combined_confidence(&settings, 1.0, 0.5);
        assert!((combined - 0.8).abs() < 1e-9);
        assert!(combined >= settings.match_confidence_threshold, "no review flag");
    }

    #[test]
    fn cosine_clamped_to_unit_interval() {
        assert_eq!(cosine_confidence(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert_eq!(cosine_confidence(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    // ── Full run ─────────────────────────────────────────

    #[test]
    fn photos_assigned_to_matching_windows() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let manifest = manifest(
            vec![
                session("session_001", 1, "Begrüßung", Some((9, 0)), Some((10, 0))),
                session("session_002", 2, "Gruppenarbeit", Some((13, 0)), Some((14, 0))),
            ],
            vec![photo("photo_001", Some((9, 30))), photo("photo_002", Some((13, 30)))],
            vec![],
        );
        let photo_set = EnrichedPhotoSet {
            enriched_photos: vec![
                enriched("photo_001", "Begrüßung"),
                enriched("photo_002", "Gruppenarbeit"),
            ],
        };
        let memo = MemoStore::open_in_memory().unwrap();
        let embedder = MockEmbeddingClient::default();

        let (plan, _) = run(&settings, &manifest, &photo_set, &memo, &embedder).unwrap();

        assert_eq!(plan.photo_assignments[0].session_id, "session_001");
        assert_eq!(plan.photo_assignments[1].session_id, "session_002");
        assert_eq!(plan.photo_assignments[0].temporal_confidence, 1.0);
        // Identical photo/session text → cosine 1.0 → combined 1.0
        assert_eq!(plan.photo_assignments[0].combined_confidence, 1.0);
        assert!(!plan.photo_assignments[0].needs_review);
        assert_eq!(plan.items[0].photo_ids, vec!["photo_001".to_string()]);
        assert_eq!(plan.items[1].photo_ids, vec!["photo_002".to_string()]);
    }

    #[test]
    fn matching_is_deterministic_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let manifest = manifest(
            vec![
                session("session_001", 1, "Begrüßung", Some((9, 0)), Some((10, 0))),
                session("session_002", 2, "Abschluss", Some((16, 0)), None),
            ],
            vec![
                photo("photo_001", Some((9, 15))),
                photo("photo_002", None),
                photo("photo_003", Some((16, 30))),
            ],
            vec![note("text_001", "Begrüßung und Ziele des Tages")],
        );
        let photo_set = EnrichedPhotoSet {
            enriched_photos: vec![
                enriched("photo_001", "Begrüßungsrunde"),
                enriched("photo_002", "Pinnwand"),
                enriched("photo_003", "Abschlussrunde"),
            ],
        };
        let memo = MemoStore::open_in_memory().unwrap();
        let embedder = MockEmbeddingClient::default();

        let (first, _) = run(&settings, &manifest, &photo_set, &memo, &embedder).unwrap();
        let (second, _) = run(&settings, &manifest, &photo_set, &memo, &embedder).unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn second_run_reuses_memoized_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let manifest = manifest(
            vec![session("session_001", 1, "Workshop", None, None)],
            vec![photo("photo_001", None)],
            vec![],
        );
        let photo_set = EnrichedPhotoSet {
            enriched_photos: vec![enriched("photo_001", "Flipchart")],
        };
        let memo = MemoStore::open_in_memory().unwrap();
        let embedder = MockEmbeddingClient::default();

        run(&settings, &manifest, &photo_set, &memo, &embedder).unwrap();
        let batches_after_first = embedder.call_count();
        assert!(batches_after_first >= 1);

        run(&settings, &manifest, &photo_set, &memo, &embedder).unwrap();
        assert_eq!(embedder.call_count(), batches_after_first, "zero new embedding calls");
    }

    #[test]
    fn partial_cache_hit_embeds_only_new_items() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let sessions = vec![session("session_001", 1, "Workshop", None, None)];
        let photos = vec![photo("photo_001", None)];
        let photo_set = EnrichedPhotoSet {
            enriched_photos: vec![enriched("photo_001", "Flipchart")],
        };
        let memo = MemoStore::open_in_memory().unwrap();
        let embedder = MockEmbeddingClient::default();

        let m1 = manifest(sessions.clone(), photos.clone(), vec![]);
        run(&settings, &m1, &photo_set, &memo, &embedder).unwrap();
        let items_after_first = embedder.items_embedded();

        // A new note appears; everything else is already memoized.
        let m2 = manifest(sessions, photos, vec![note("text_001", "Neue Notiz")]);
        run(&settings, &m2, &photo_set, &memo, &embedder).unwrap();
        assert_eq!(
            embedder.items_embedded(),
            items_after_first + 1,
            "only the new note may be embedded"
        );
    }

    #[test]
    fn duplicate_texts_embed_once() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        // Two sessions with the same name → one embedded item for both.
        let manifest = manifest(
            vec![
                session("session_001", 1, "Workshop", None, None),
                session("session_002", 2, "Workshop", None, None),
            ],
            vec![photo("photo_001", None)],
            vec![],
        );
        let photo_set = EnrichedPhotoSet {
            enriched_photos: vec![enriched("photo_001", "Karten")],
        };
        let memo = MemoStore::open_in_memory().unwrap();
        let embedder = MockEmbeddingClient::default();

        run(&settings, &manifest, &photo_set, &memo, &embedder).unwrap();
        assert_eq!(embedder.items_embedded(), 2, "session name deduplicated");
    }

    #[test]
    fn untimestamped_ties_distribute_round_robin() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let manifest = manifest(
            vec![
                session("session_001", 1, "Workshop", None, None),
                session("session_002", 2, "Workshop", None, None),
            ],
            vec![photo("photo_001", None), photo("photo_002", None)],
            vec![],
        );
        // Same description → identical semantics → full tie on both sessions.
        let photo_set = EnrichedPhotoSet {
            enriched_photos: vec![enriched("photo_001", "Karten"), enriched("photo_002", "Karten")],
        };
        let memo = MemoStore::open_in_memory().unwrap();
        let embedder = MockEmbeddingClient::default();

        let (plan, _) = run(&settings, &manifest, &photo_set, &memo, &embedder).unwrap();
        assert_eq!(plan.photo_assignments[0].session_id, "session_001");
        assert_eq!(plan.photo_assignments[1].session_id, "session_002");
    }

    #[test]
    fn timestamped_ties_break_on_earliest_start_then_id() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        // Identical names and no times → identical combined for both
        // sessions; the timestamped photo must go to the lowest id.
        let manifest = manifest(
            vec![
                session("session_002", 2, "Workshop", None, None),
                session("session_001", 1, "Workshop", None, None),
            ],
            vec![photo("photo_001", Some((9, 0)))],
            vec![],
        );
        let photo_set = EnrichedPhotoSet {
            enriched_photos: vec![enriched("photo_001", "Karten")],
        };
        let memo = MemoStore::open_in_memory().unwrap();
        let embedder = MockEmbeddingClient::default();

        let (plan, _) = run(&settings, &manifest, &photo_set, &memo, &embedder).unwrap();
        assert_eq!(plan.photo_assignments[0].session_id, "session_001");
    }

    #[test]
    fn note_assigned_to_best_session() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let manifest = manifest(
            vec![
                session("session_001", 1, "Begrüßung", None, None),
                session("session_002", 2, "Gruppenarbeit", None, None),
            ],
            vec![photo("photo_001", None)],
            vec![note("text_001", "Gruppenarbeit")],
        );
        let photo_set = EnrichedPhotoSet {
            enriched_photos: vec![enriched("photo_001", "Karten")],
        };
        let memo = MemoStore::open_in_memory().unwrap();
        let embedder = MockEmbeddingClient::default();

        let (plan, _) = run(&settings, &manifest, &photo_set, &memo, &embedder).unwrap();
        assert_eq!(plan.items[1].text_snippet_ref.as_deref(), Some("text_001"));
        assert!(plan.items[0].text_snippet_ref.is_none());
        assert!(plan.unassigned_notes.is_empty());
    }

    #[test]
    fn low_confidence_note_surfaced_as_unassigned() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            note_min_confidence: 0.99,
            ..settings_in(&dir)
        };
        let manifest = manifest(
            vec![session("session_001", 1, "Begrüßung", None, None)],
            vec![photo("photo_001", None)],
            vec![note("text_001", "Völlig anderes Thema")],
        );
        let photo_set = EnrichedPhotoSet {
            enriched_photos: vec![enriched("photo_001", "Karten")],
        };
        let memo = MemoStore::open_in_memory().unwrap();
        let embedder = MockEmbeddingClient::default();

        let (plan, _) = run(&settings, &manifest, &photo_set, &memo, &embedder).unwrap();
        assert!(plan.items[0].text_snippet_ref.is_none());
        assert_eq!(plan.unassigned_notes.len(), 1);
        let unassigned = &plan.unassigned_notes[0];
        assert_eq!(unassigned.snippet_id, "text_001");
        assert_eq!(unassigned.best_session_id.as_deref(), Some("session_001"));
        assert!(unassigned.best_confidence < 0.99);
    }

    #[test]
    fn no_sessions_yields_empty_plan() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let manifest = manifest(vec![], vec![photo("photo_001", None)], vec![]);
        let photo_set = EnrichedPhotoSet::default();
        let memo = MemoStore::open_in_memory().unwrap();
        let embedder = MockEmbeddingClient::default();

        let (plan, artifact) = run(&settings, &manifest, &photo_set, &memo, &embedder).unwrap();
        assert!(plan.items.is_empty());
        assert!(settings.resolve(&artifact).exists());
        assert_eq!(embedder.call_count(), 0);
    }

    #[test]
    fn session_without_photos_gets_neutral_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let manifest = manifest(
            vec![
                session("session_001", 1, "Begrüßung", Some((9, 0)), Some((10, 0))),
                session("session_002", 2, "Leer", Some((15, 0)), Some((16, 0))),
            ],
            vec![photo("photo_001", Some((9, 30)))],
            vec![],
        );
        let photo_set = EnrichedPhotoSet {
            enriched_photos: vec![enriched("photo_001", "Begrüßung")],
        };
        let memo = MemoStore::open_in_memory().unwrap();
        let embedder = MockEmbeddingClient::default();

        let (plan, _) = run(&settings, &manifest, &photo_set, &memo, &embedder).unwrap();
        let empty_item = &plan.items[1];
        assert!(empty_item.photo_ids.is_empty());
        assert_eq!(empty_item.temporal_confidence, NEUTRAL_TEMPORAL);
        assert_eq!(empty_item.semantic_confidence, NEUTRAL_TEMPORAL);
    }
}
