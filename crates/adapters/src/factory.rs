//! ToolSet 构建
//!
//! 从 ToolsConfig 为每个 stage 选择工具实现。

use std::sync::Arc;

use contracts::{DynStageTool, StageId, ToolMode, ToolSet, ToolsConfig};
use tracing::{debug, info};

use crate::command::CommandTool;
use crate::error::{AdapterError, Result};
use crate::retry::{RetryPolicy, RetryTool};
use crate::simulated::SimulatedTool;

/// 根据配置构建完整的 ToolSet
///
/// - `simulated` 模式：配置了命令的 stage 使用 CommandTool，其余使用 SimulatedTool
/// - `command` 模式：每个 stage 必须配置命令
///
/// `retries > 0` 的命令会被 RetryTool 包装。
pub fn build_toolset(config: &ToolsConfig) -> Result<ToolSet> {
    let mut tools = ToolSet::new();

    for stage in StageId::ALL {
        let tool: Arc<dyn DynStageTool> = match (config.commands.get(stage.key()), config.mode) {
            (Some(spec), _) => {
                let command: Arc<dyn DynStageTool> = Arc::new(CommandTool::new(stage, spec.clone()));
                if spec.retries > 0 {
                    debug!(stage = %stage.key(), retries = spec.retries, "wrapping command with retry");
                    Arc::new(RetryTool::new(command, RetryPolicy::from_spec(spec)))
                } else {
                    command
                }
            }
            (None, ToolMode::Simulated) => {
                Arc::new(SimulatedTool::new(stage, config.simulated.clone()))
            }
            (None, ToolMode::Command) => return Err(AdapterError::MissingCommand { stage }),
        };
        debug!(stage = %stage.key(), tool = %tool.tool_name(), "tool registered");
        tools.insert(stage, tool);
    }

    info!(mode = ?config.mode, tools = ?tools, "toolset built");
    Ok(tools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::CommandSpec;
    use std::collections::HashMap;

    fn spec(program: &str, retries: u32) -> CommandSpec {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            retries,
            retry_backoff_ms: 100,
        }
    }

    #[test]
    fn test_default_config_is_simulated() {
        let tools = build_toolset(&ToolsConfig::default()).unwrap();
        assert!(tools.ensure_complete().is_ok());
        assert_eq!(
            tools.get(StageId::Summarization).unwrap().tool_name(),
            "simulated-summarization"
        );
    }

    #[test]
    fn test_commands_override_simulated() {
        let mut config = ToolsConfig::default();
        config
            .commands
            .insert("summarization".into(), spec("summarize.sh", 0));
        config
            .commands
            .insert("assembly".into(), spec("assemble.sh", 2));

        let tools = build_toolset(&config).unwrap();
        assert_eq!(
            tools.get(StageId::Summarization).unwrap().tool_name(),
            "summarization:summarize.sh"
        );
        assert_eq!(
            tools.get(StageId::Assembly).unwrap().tool_name(),
            "retry(assembly:assemble.sh)"
        );
        assert_eq!(
            tools.get(StageId::Transcription).unwrap().tool_name(),
            "simulated-transcription"
        );
    }

    #[test]
    fn test_command_mode_requires_every_stage() {
        let mut config = ToolsConfig {
            mode: ToolMode::Command,
            ..Default::default()
        };
        config
            .commands
            .insert("transcription".into(), spec("asr", 0));

        let err = build_toolset(&config).unwrap_err();
        assert!(matches!(
            err,
            AdapterError::MissingCommand {
                stage: StageId::Diarization
            }
        ));
    }
}
