//! Fotoprotokoll — turns workshop photos, an agenda and notes into a
//! formatted photo report.
//!
//! The interesting part is not the document plumbing but the resumable
//! execution engine around it: content-addressed stage caching with a
//! durable manifest, per-unit memoization of paid external calls, bounded
//! retry with backoff, and a confidence-weighted engine matching photos
//! and notes to agenda sessions.

pub mod cache;
pub mod cli;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod services;

use tracing_subscriber::EnvFilter;

/// Initialize tracing for the binary. `RUST_LOG` overrides the default
/// info level.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
