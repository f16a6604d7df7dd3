//! `run` command implementation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config_loader::ConfigLoader;
use contracts::{MediaInput, PipelineBlueprint, PipelineStatus};
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, RunOptions};

/// Configuration picked up from the working directory when `--config` is absent
const DEFAULT_CONFIG: &str = "cinesum.toml";

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    if !args.input.exists() {
        return Err(CliError::input_not_found(&args.input).into());
    }

    let mut blueprint = load_blueprint(args.config.as_deref())?;

    // Apply CLI overrides
    if let Some(secs) = args.stage_timeout {
        info!(secs, "Overriding stage timeout from CLI");
        blueprint.orchestrator.stage_timeout_secs = Some(secs);
    }
    ConfigLoader::validate(&blueprint).context("Configuration invalid after CLI overrides")?;

    info!(
        input = %args.input.display(),
        mode = ?blueprint.tools.mode,
        backend = ?blueprint.pipeline.video_backend,
        stage_timeout = ?blueprint.orchestrator.stage_timeout(),
        sinks = blueprint.sinks.len(),
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint, &args.input);
        return Ok(());
    }

    let options = RunOptions {
        blueprint,
        input: MediaInput::new(args.input.clone()),
        metrics_port: (args.metrics_port != 0).then_some(args.metrics_port),
    };

    info!("Starting pipeline...");
    let stats = Pipeline::new(options)
        .run()
        .await
        .context("Pipeline execution failed")?;
    stats.print_summary();

    match stats.status {
        PipelineStatus::Completed => {
            info!(run_id = stats.run_id, "CineSum finished");
            Ok(())
        }
        PipelineStatus::Failed => {
            let (stage, reason) = stats
                .failed_stage()
                .map(|(stage, reason)| (stage.label().to_string(), reason))
                .unwrap_or_else(|| ("unknown stage".to_string(), String::new()));
            Err(CliError::pipeline_failed(stage, reason).into())
        }
        status => Err(CliError::PipelineIncomplete { status }.into()),
    }
}

/// Load the blueprint from `path`, the default file, or built-in defaults
fn load_blueprint(path: Option<&Path>) -> Result<PipelineBlueprint> {
    let path = match path {
        Some(path) if !path.exists() => return Err(CliError::config_not_found(path).into()),
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if !default.exists() {
                warn!("No configuration file, using built-in defaults (simulated tools)");
                return Ok(PipelineBlueprint::default());
            }
            default
        }
    };

    info!(config = %path.display(), "Loading configuration");
    ConfigLoader::load_from_path(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &PipelineBlueprint, input: &Path) {
    println!("\n=== Configuration Summary ===\n");
    println!("Input: {}", input.display());
    println!("\nPipeline:");
    println!("  Video backend: {:?}", blueprint.pipeline.video_backend);
    println!("  Transcription model: {}", blueprint.pipeline.transcription_model);
    println!("  Summarization model: {}", blueprint.pipeline.summarization_model);

    println!("\nTools ({:?} mode):", blueprint.tools.mode);
    for (stage, spec) in &blueprint.tools.commands {
        println!("  - {} -> {} {}", stage, spec.program, spec.args.join(" "));
    }

    match blueprint.orchestrator.stage_timeout() {
        Some(timeout) => println!("\nStage timeout: {}s", timeout.as_secs()),
        None => println!("\nStage timeout: none"),
    }

    if !blueprint.sinks.is_empty() {
        println!("\nSinks ({}):", blueprint.sinks.len());
        for sink in &blueprint.sinks {
            println!("  - {} ({:?})", sink.name, sink.sink_type);
        }
    }

    println!();
}
