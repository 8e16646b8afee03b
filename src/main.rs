//! Binary entry point.

use clap::Parser;

use fotoprotokoll::cli::Cli;
use fotoprotokoll::config::Settings;
use fotoprotokoll::pipeline::{PipelineExecutor, StageId};
use fotoprotokoll::services::OpenAiClient;

fn main() {
    fotoprotokoll::init_tracing();
    let cli = Cli::parse();

    if let Err(error) = run(cli) {
        tracing::error!(%error, "Run failed");
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = Settings::load()?;
    if let Some(project_dir) = cli.project_dir {
        settings.project_dir = project_dir;
    }
    let force_stage = cli
        .force_stage
        .as_deref()
        .map(str::parse::<StageId>)
        .transpose()?;

    tracing::info!(
        version = fotoprotokoll::config::APP_VERSION,
        project_dir = %settings.project_dir.display(),
        "Fotoprotokoll starting"
    );

    let client = OpenAiClient::new(&settings)?;
    let mut executor = PipelineExecutor::new(&settings, &client, &client)?;

    let report = if cli.cached {
        executor.run_cached()?
    } else {
        executor.run(force_stage)?
    };

    for outcome in &report.outcomes {
        tracing::info!(
            stage = %outcome.stage,
            status = ?outcome.status,
            artifact = %outcome.artifact_ref.display(),
            "Stage outcome"
        );
    }
    println!("{}", settings.resolve(&report.output).display());
    Ok(())
}
