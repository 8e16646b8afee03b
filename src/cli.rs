//! Command-line surface.
//!
//! One binary, three operations: run everything (default), force
//! recomputation from a named stage onward, or resume strictly from
//! cached artifacts.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "fotoprotokoll",
    version,
    about = "Generate a workshop photo report from photos, agenda and notes"
)]
pub struct Cli {
    /// Project directory (overrides FPG_PROJECT_DIR)
    #[arg(long, value_name = "DIR")]
    pub project_dir: Option<PathBuf>,

    /// Force recomputation from this stage onward (1, 2, 3a, 3b, 4, 5);
    /// earlier stages may still be skipped
    #[arg(long, value_name = "STAGE", conflicts_with = "cached")]
    pub force_stage: Option<String>,

    /// Resume using only cached artifacts; fails if any stage has no
    /// cache entry
    #[arg(long)]
    pub cached: bool,
}
