//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{PipelineBlueprint, StageId, ToolMode};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    pipeline: PipelineInfo,
    orchestrator: OrchestratorInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct PipelineInfo {
    video_backend: String,
    transcription_model: String,
    summarization_model: String,
    asset_host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    cloud_endpoint: String,
    api_key_set: bool,
}

#[derive(Serialize)]
struct OrchestratorInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    stage_timeout_secs: Option<u64>,
    event_capacity: usize,
}

#[derive(Serialize)]
struct ToolInfo {
    stage: &'static str,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retries: Option<u32>,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

/// Tool wiring per stage, as `build_toolset` will resolve it
fn tool_infos(blueprint: &PipelineBlueprint) -> Vec<ToolInfo> {
    StageId::ALL
        .into_iter()
        .map(|stage| match blueprint.tools.commands.get(stage.key()) {
            Some(spec) => ToolInfo {
                stage: stage.key(),
                kind: "command".to_string(),
                command: Some(format!("{} {}", spec.program, spec.args.join(" ")).trim().to_string()),
                retries: Some(spec.retries),
            },
            None => ToolInfo {
                stage: stage.key(),
                kind: match blueprint.tools.mode {
                    ToolMode::Simulated => "simulated".to_string(),
                    ToolMode::Command => "missing".to_string(),
                },
                command: None,
                retries: None,
            },
        })
        .collect()
}

fn build_config_info(blueprint: &PipelineBlueprint, args: &InfoArgs) -> ConfigInfo {
    let pipeline = &blueprint.pipeline;

    let tools = if args.tools {
        tool_infos(blueprint)
    } else {
        Vec::new()
    };

    let sinks = if args.sinks {
        blueprint
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: format!("{:?}", s.sink_type),
                queue_capacity: s.queue_capacity,
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        pipeline: PipelineInfo {
            video_backend: format!("{:?}", pipeline.video_backend),
            transcription_model: pipeline.transcription_model.clone(),
            summarization_model: pipeline.summarization_model.clone(),
            asset_host: pipeline.asset_host.clone(),
            cloud_endpoint: pipeline.cloud_endpoint.clone(),
            api_key_set: pipeline.api_key.is_some(),
        },
        orchestrator: OrchestratorInfo {
            stage_timeout_secs: blueprint.orchestrator.stage_timeout().map(|t| t.as_secs()),
            event_capacity: blueprint.orchestrator.event_capacity,
        },
        tools,
        sinks,
    }
}

fn print_config_info(blueprint: &PipelineBlueprint, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                 CineSum Configuration                        ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let pipeline = &blueprint.pipeline;
    println!("🎞  Pipeline");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Video backend: {:?}", pipeline.video_backend);
    println!("   ├─ Transcription model: {}", pipeline.transcription_model);
    println!("   ├─ Summarization model: {}", pipeline.summarization_model);
    println!("   ├─ Asset host: {}", pipeline.asset_host);
    if pipeline.cloud_endpoint.is_empty() {
        println!("   └─ Cloud endpoint: (not set)");
    } else {
        println!(
            "   └─ Cloud endpoint: {} (api key {})",
            pipeline.cloud_endpoint,
            if pipeline.api_key.is_some() { "set" } else { "missing" }
        );
    }

    println!("\n⚙️  Orchestrator");
    match blueprint.orchestrator.stage_timeout() {
        Some(timeout) => println!("   ├─ Stage timeout: {}s", timeout.as_secs()),
        None => println!("   ├─ Stage timeout: none"),
    }
    println!("   └─ Event capacity: {}", blueprint.orchestrator.event_capacity);

    // Tools
    println!("\n🛠  Tools ({:?} mode)", blueprint.tools.mode);
    if args.tools {
        let tools = tool_infos(blueprint);
        for (i, tool) in tools.iter().enumerate() {
            let prefix = if i == tools.len() - 1 { "└─" } else { "├─" };
            match (&tool.command, tool.retries) {
                (Some(command), Some(retries)) if retries > 0 => {
                    println!("   {} {}: {} (retries: {})", prefix, tool.stage, command, retries)
                }
                (Some(command), _) => println!("   {} {}: {}", prefix, tool.stage, command),
                (None, _) => println!("   {} {}: {}", prefix, tool.stage, tool.kind),
            }
        }
    } else {
        let sim = &blueprint.tools.simulated;
        println!(
            "   ├─ Simulated duration: {}-{} ms (tick {} ms)",
            sim.min_duration_ms, sim.max_duration_ms, sim.tick_ms
        );
        println!("   └─ {} stage command(s)", blueprint.tools.commands.len());
    }

    // Sinks
    if !blueprint.sinks.is_empty() {
        println!("\n📤 Sinks ({})", blueprint.sinks.len());
        for (i, sink) in blueprint.sinks.iter().enumerate() {
            let is_last = i == blueprint.sinks.len() - 1;
            let prefix = if is_last { "└─" } else { "├─" };
            if args.sinks {
                println!(
                    "   {} {} ({:?}, queue {}) {:?}",
                    prefix, sink.name, sink.sink_type, sink.queue_capacity, sink.params
                );
            } else {
                println!("   {} {} ({:?})", prefix, sink.name, sink.sink_type);
            }
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::CommandSpec;
    use std::collections::HashMap;

    #[test]
    fn test_tool_infos() {
        let mut blueprint = PipelineBlueprint::default();
        blueprint.tools.commands.insert(
            "summarization".to_string(),
            CommandSpec {
                program: "summarize".to_string(),
                args: vec!["{input}".to_string()],
                env: HashMap::new(),
                retries: 2,
                retry_backoff_ms: 500,
            },
        );

        let tools = tool_infos(&blueprint);
        assert_eq!(tools.len(), 5);
        assert_eq!(tools[0].kind, "simulated");
        assert_eq!(tools[2].kind, "command");
        assert_eq!(tools[2].command.as_deref(), Some("summarize {input}"));
        assert_eq!(tools[2].retries, Some(2));
    }
}
