//! External service boundary.
//!
//! The pipeline talks to the vision and embedding services only through
//! the narrow capability traits below, so the retry wrapper and per-unit
//! memoizer wrap them uniformly and tests substitute deterministic fakes.

pub mod openai;
pub mod retry;

pub use openai::OpenAiClient;
pub use retry::{with_retry, RetryPolicy};

use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

use crate::models::PhotoAnalysis;

/// Failure taxonomy for external calls.
///
/// Transient failures (rate limiting, timeouts, flaky network) are retried
/// by [`with_retry`] up to its budget; permanent ones (bad credentials,
/// malformed request, unsupported input) propagate immediately and are
/// never cached.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Transient service failure: {0}")]
    Transient(String),

    #[error("Permanent service failure: {0}")]
    Permanent(String),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    ExhaustedRetries { attempts: u32, last: String },
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Vision analysis of a single photo: structured description, optional
/// extracted text, keywords, and a crop box for document shots.
pub trait VisionAnalyzer: Send + Sync {
    fn analyze_photo(&self, image_bytes: &[u8], detail: &str)
        -> Result<PhotoAnalysis, ServiceError>;
}

/// Batch text embedding: one unit-length vector per input string.
pub trait EmbeddingClient: Send + Sync {
    fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ServiceError>;
}

// ──────────────────────────────────────────────
// Deterministic fakes for tests and dry runs
// ──────────────────────────────────────────────

/// Mock vision analyzer — returns a configurable analysis and counts calls.
pub struct MockVisionAnalyzer {
    analysis: PhotoAnalysis,
    calls: AtomicUsize,
}

impl MockVisionAnalyzer {
    pub fn new(analysis: PhotoAnalysis) -> Self {
        Self {
            analysis,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl VisionAnalyzer for MockVisionAnalyzer {
    fn analyze_photo(
        &self,
        _image_bytes: &[u8],
        _detail: &str,
    ) -> Result<PhotoAnalysis, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.analysis.clone())
    }
}

/// Mock embedding client — deterministic unit vectors derived from the
/// text bytes, so identical texts embed identically across runs.
pub struct MockEmbeddingClient {
    dimension: usize,
    calls: AtomicUsize,
    items: AtomicUsize,
}

impl MockEmbeddingClient {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
            items: AtomicUsize::new(0),
        }
    }

    /// Batches issued.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Individual texts embedded across all batches.
    pub fn items_embedded(&self) -> usize {
        self.items.load(Ordering::SeqCst)
    }
}

impl Default for MockEmbeddingClient {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EmbeddingClient for MockEmbeddingClient {
    fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.items.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| deterministic_vector(t, self.dimension))
            .collect())
    }
}

/// Generate a deterministic unit vector from text (for testing).
pub fn deterministic_vector(text: &str, dim: usize) -> Vec<f32> {
    let bytes = text.as_bytes();
    let mut vec = vec![0.0f32; dim];
    for (i, slot) in vec.iter_mut().enumerate() {
        let byte_idx = i % bytes.len().max(1);
        *slot = (bytes.get(byte_idx).copied().unwrap_or(0) as f32 + i as f32) / 255.0;
    }

    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in &mut vec {
            *val /= norm;
        }
    }
    vec
}
