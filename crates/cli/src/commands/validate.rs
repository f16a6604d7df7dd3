//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{PipelineBlueprint, StageId, ToolMode};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    video_backend: String,
    tool_mode: String,
    command_count: usize,
    sink_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage_timeout_secs: Option<u64>,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    // Check file exists
    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    // Try to load and validate
    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    video_backend: format!("{:?}", blueprint.pipeline.video_backend),
                    tool_mode: format!("{:?}", blueprint.tools.mode),
                    command_count: blueprint.tools.commands.len(),
                    sink_count: blueprint.sinks.len(),
                    stage_timeout_secs: blueprint
                        .orchestrator
                        .stage_timeout()
                        .map(|t| t.as_secs()),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &PipelineBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.sinks.is_empty() {
        warnings.push("No sinks configured - events are only logged to the console".to_string());
    }

    if blueprint.tools.mode == ToolMode::Simulated {
        for stage in StageId::ALL {
            if blueprint.tools.commands.contains_key(stage.key()) {
                warnings.push(format!(
                    "Simulated mode: stage '{}' runs its configured command",
                    stage.key()
                ));
            }
        }
    }

    if blueprint.orchestrator.stage_timeout().is_none()
        && blueprint.tools.mode == ToolMode::Command
    {
        warnings.push("No stage timeout - a hung command blocks the run until cancelled".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Video backend: {}", summary.video_backend);
            println!("  Tool mode: {}", summary.tool_mode);
            println!("  Commands: {}", summary.command_count);
            println!("  Sinks: {}", summary.sink_count);
            match summary.stage_timeout_secs {
                Some(secs) => println!("  Stage timeout: {}s", secs),
                None => println!("  Stage timeout: none"),
            }
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn args_for(content: &str) -> (tempfile::NamedTempFile, ValidateArgs) {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{content}").unwrap();
        let args = ValidateArgs {
            config: file.path().to_path_buf(),
            json: false,
        };
        (file, args)
    }

    #[test]
    fn test_validate_defaults_warns_about_sinks() {
        let (_file, args) = args_for("[pipeline]\nvideo_backend = \"local\"\n");
        let result = validate_config(&args);

        assert!(result.valid);
        let warnings = result.warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains("No sinks")));
    }

    #[test]
    fn test_validate_cloud_without_key() {
        let (_file, args) = args_for(
            "[pipeline]\nvideo_backend = \"cloud\"\ncloud_endpoint = \"https://gen.example\"\n",
        );
        let result = validate_config(&args);

        assert!(!result.valid);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_validate_missing_file() {
        let args = ValidateArgs {
            config: PathBuf::from("/nonexistent/cinesum.toml"),
            json: true,
        };
        let result = validate_config(&args);
        assert!(!result.valid);
        assert!(run_validate(&args).is_err());
    }
}
