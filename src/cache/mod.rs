//! Stage-level and unit-level caching.
//!
//! Two layers with deliberately different keys and lifetimes:
//!
//! * [`manifest`]: one durable entry per stage mapping the stage's input
//!   hash to its artifact. Owned exclusively by [`ManifestStore`]; the
//!   executor requests mutations, nothing else writes it.
//! * [`memo`]: results of single expensive external calls keyed purely by
//!   content hash. Stage-level invalidation never touches it, which is
//!   what lets unchanged photos survive a `--force-stage` wipe unpaid.
//!
//! A corrupted or unreadable store is treated as empty (forces recompute),
//! logged, and never fatal on its own.

pub mod content_hash;
pub mod manifest;
pub mod memo;

pub use content_hash::{sha256_hex, InputSet};
pub use manifest::{CacheEntry, ManifestStore};
pub use memo::MemoStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Memo database error: {0}")]
    Database(#[from] rusqlite::Error),
}
