//! 配置校验模块
//!
//! 校验规则：
//! - video_backend = cloud 时 api_key 与 cloud_endpoint 必填；local 时不得携带 api_key
//! - 模型名称非空
//! - event_capacity > 0
//! - command 模式下每个 stage 均有命令，且 program 非空、stage key 合法
//! - sink 名称非空且唯一，file sink 必须给出 path

use std::collections::HashSet;

use contracts::{
    ContractError, PipelineBlueprint, SinkType, StageId, ToolMode, VideoBackend,
};

/// 校验 PipelineBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    validate_backend(blueprint)?;
    validate_models(blueprint)?;
    validate_orchestrator(blueprint)?;
    validate_tools(blueprint)?;
    validate_sinks(blueprint)?;
    Ok(())
}

/// 校验视频后端与密钥
fn validate_backend(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let pipeline = &blueprint.pipeline;
    let has_key = pipeline
        .api_key
        .as_deref()
        .is_some_and(|key| !key.trim().is_empty());

    match pipeline.video_backend {
        VideoBackend::Cloud => {
            if !has_key {
                return Err(ContractError::config_validation(
                    "pipeline.api_key",
                    "api_key is required when video_backend is cloud",
                ));
            }
            if pipeline.cloud_endpoint.trim().is_empty() {
                return Err(ContractError::config_validation(
                    "pipeline.cloud_endpoint",
                    "cloud_endpoint is required when video_backend is cloud",
                ));
            }
        }
        VideoBackend::Local => {
            if pipeline.api_key.is_some() {
                return Err(ContractError::config_validation(
                    "pipeline.api_key",
                    "api_key is only accepted when video_backend is cloud",
                ));
            }
        }
    }
    Ok(())
}

/// 校验模型名称
fn validate_models(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let pipeline = &blueprint.pipeline;
    for (field, value) in [
        ("pipeline.summarization_model", &pipeline.summarization_model),
        ("pipeline.transcription_model", &pipeline.transcription_model),
    ] {
        if value.trim().is_empty() {
            return Err(ContractError::config_validation(
                field,
                "model name cannot be empty",
            ));
        }
    }
    Ok(())
}

/// 校验编排器设置
fn validate_orchestrator(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    if blueprint.orchestrator.event_capacity == 0 {
        return Err(ContractError::config_validation(
            "orchestrator.event_capacity",
            "event_capacity must be > 0",
        ));
    }
    Ok(())
}

/// 校验工具配置
fn validate_tools(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let tools = &blueprint.tools;

    for (key, spec) in &tools.commands {
        key.parse::<StageId>().map_err(|_| {
            ContractError::config_validation(
                format!("tools.commands.{key}"),
                format!(
                    "unknown stage '{key}', expected one of: {}",
                    StageId::ALL.map(StageId::key).join(", ")
                ),
            )
        })?;
        if spec.program.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("tools.commands.{key}.program"),
                "program cannot be empty",
            ));
        }
    }

    let sim = &tools.simulated;
    if sim.min_duration_ms > sim.max_duration_ms {
        return Err(ContractError::config_validation(
            "tools.simulated.min_duration_ms / tools.simulated.max_duration_ms",
            format!(
                "min_duration_ms ({}) must be <= max_duration_ms ({})",
                sim.min_duration_ms, sim.max_duration_ms
            ),
        ));
    }
    if sim.tick_ms == 0 {
        return Err(ContractError::config_validation(
            "tools.simulated.tick_ms",
            "tick_ms must be > 0",
        ));
    }

    if tools.mode == ToolMode::Command {
        for stage in StageId::ALL {
            if !tools.commands.contains_key(stage.key()) {
                return Err(ContractError::config_validation(
                    format!("tools.commands.{}", stage.key()),
                    "command mode requires a command for every stage",
                ));
            }
        }
    }

    Ok(())
}

/// 校验 sink 配置
fn validate_sinks(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in blueprint.sinks.iter().enumerate() {
        if sink.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{}].name", idx),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(&sink.name) {
            return Err(ContractError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
        if sink.queue_capacity == 0 {
            return Err(ContractError::config_validation(
                format!("sinks[{}].queue_capacity", sink.name),
                "queue_capacity must be > 0",
            ));
        }
        if sink.sink_type == SinkType::File && !sink.params.contains_key("path") {
            return Err(ContractError::config_validation(
                format!("sinks[{}].params.path", sink.name),
                "file sink requires a path",
            ));
        }
    }
    Ok(())
}
