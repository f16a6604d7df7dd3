//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置 → 工具集 → 编排器 → 分发器 全链路
//! - 模拟 e2e 测试（无需外部工具）
//! - 失败 / 取消 / 重置场景

#[cfg(test)]
mod contract_tests {
    use contracts::{PipelineRun, PipelineStatus, StageId, StageStatus};

    #[test]
    fn test_fresh_run_snapshot() {
        let run = PipelineRun::new();
        assert_eq!(run.status, PipelineStatus::Idle);
        assert_eq!(run.stages.len(), StageId::ALL.len());
        assert!(run
            .stages
            .iter()
            .zip(StageId::ALL)
            .all(|(s, id)| s.id == id && s.status == StageStatus::Pending && s.progress == 0.0));
        assert!(run.log.is_empty());
        assert!(run.check_invariants().is_ok());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use adapters::{build_toolset, ScriptedTool};
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        LogLevel, MediaInput, OrchestratorSettings, PipelineConfig, PipelineEvent,
        PipelineStatus, StageId, StageStatus, ToolSet,
    };
    use dispatcher::create_dispatcher;
    use orchestrator::Orchestrator;
    use serde_json::Value;

    const WAIT: Duration = Duration::from_secs(10);

    fn fast_config(history: &Path) -> String {
        format!(
            r#"
[orchestrator]
stage_timeout_secs = 5

[tools]
mode = "simulated"

[tools.simulated]
min_duration_ms = 30
max_duration_ms = 60
tick_ms = 5

[[sinks]]
name = "console"
sink_type = "log"

[[sinks]]
name = "history"
sink_type = "file"

[sinks.params]
path = "{}"
"#,
            history.display()
        )
    }

    fn read_history(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// Scripted tools for every stage, with `stage` replaced by `tool`
    fn scripted_toolset(stage: StageId, tool: ScriptedTool) -> ToolSet {
        let mut tools = ToolSet::new();
        for id in StageId::ALL {
            tools.insert(id, Arc::new(ScriptedTool::new(id.key()).with_steps([30.0, 70.0])));
        }
        tools.insert(stage, Arc::new(tool));
        tools
    }

    async fn wait(orchestrator: &Orchestrator) -> PipelineStatus {
        tokio::time::timeout(WAIT, orchestrator.wait())
            .await
            .expect("pipeline did not finish in time")
    }

    /// End-to-end test: config -> simulated tools -> Orchestrator -> Dispatcher
    ///
    /// 验证完整的数据流：
    /// 1. ConfigLoader 解析配置
    /// 2. 五个模拟 stage 按顺序执行
    /// 3. Dispatcher 将事件写入 JSONL 历史文件
    #[tokio::test]
    async fn test_e2e_simulated_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let history = dir.path().join("history.jsonl");
        let blueprint =
            ConfigLoader::load_from_str(&fast_config(&history), ConfigFormat::Toml).unwrap();

        let tools = build_toolset(&blueprint.tools).unwrap();
        let orchestrator = Orchestrator::new(
            tools,
            blueprint.pipeline.clone(),
            blueprint.orchestrator.clone(),
        )
        .unwrap();
        let dispatcher_handle = create_dispatcher(blueprint.sinks.clone(), orchestrator.subscribe())
            .unwrap()
            .spawn();

        orchestrator.start(Some(MediaInput::new("keynote.mp4"))).unwrap();
        assert_eq!(wait(&orchestrator).await, PipelineStatus::Completed);

        let run = orchestrator.snapshot();
        assert!(run.stages.iter().all(|s| s.status == StageStatus::Completed));
        assert!(run.stages.iter().all(|s| s.progress == 100.0));
        assert_eq!(run.log.last().unwrap().message, "Pipeline finished successfully.");
        // Canned transcription lines mention the configured model
        assert!(run.log.iter().any(|e| e.message.contains("'base'")));

        drop(orchestrator);
        let sink_metrics = tokio::time::timeout(WAIT, dispatcher_handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sink_metrics.len(), 2);
        assert!(sink_metrics.iter().all(|(_, m)| m.dropped_count == 0 && m.failure_count == 0));

        let records = read_history(&history);
        let (_, history_metrics) = sink_metrics.iter().find(|(n, _)| n == "history").unwrap();
        assert_eq!(records.len() as u64, history_metrics.write_count);

        assert_eq!(records.first().unwrap()["event"], "pipeline_status_changed");
        assert_eq!(records.first().unwrap()["status"], "processing");
        assert_eq!(records.last().unwrap()["status"], "completed");

        // Stages start in order
        let started: Vec<_> = records
            .iter()
            .filter(|r| r["event"] == "stage_status_changed" && r["state"]["status"] == "running")
            .map(|r| r["state"]["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            started,
            StageId::ALL.map(|s| s.key().to_string()).to_vec()
        );

        // Progress is monotonic and below 100 while running
        for stage in StageId::ALL {
            let progress: Vec<f64> = records
                .iter()
                .filter(|r| r["event"] == "progress_changed" && r["stage"] == stage.key())
                .map(|r| r["progress"].as_f64().unwrap())
                .collect();
            assert!(progress.windows(2).all(|w| w[0] < w[1]), "{stage}: {progress:?}");
            assert!(progress.iter().all(|p| *p < 100.0));
        }
    }

    /// A failing stage stops the run; later stages never start
    #[tokio::test]
    async fn test_e2e_failure_stops_pipeline() {
        let tools = scripted_toolset(
            StageId::Summarization,
            ScriptedTool::new("llm")
                .with_steps([40.0])
                .fail("model 'llama3' not found"),
        );
        let orchestrator = Orchestrator::new(
            tools,
            PipelineConfig::default(),
            OrchestratorSettings::default(),
        )
        .unwrap();
        let mut events = orchestrator.subscribe();

        orchestrator.start(Some(MediaInput::new("clip.mp4"))).unwrap();
        assert_eq!(wait(&orchestrator).await, PipelineStatus::Failed);

        let run = orchestrator.snapshot();
        let statuses: Vec<_> = run.stages.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                StageStatus::Completed,
                StageStatus::Completed,
                StageStatus::Failed,
                StageStatus::Pending,
                StageStatus::Pending,
            ]
        );
        let failed = run.stage(StageId::Summarization);
        assert_eq!(failed.progress, 40.0);
        assert_eq!(failed.detail.as_deref(), Some("model 'llama3' not found"));

        let errors: Vec<_> = run.log_at(LogLevel::Error).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Summarization failed: model 'llama3' not found");
        assert!(run.check_invariants().is_ok());

        // The terminal event is the last one observers see
        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        assert!(matches!(
            last,
            Some(PipelineEvent::PipelineStatusChanged {
                status: PipelineStatus::Failed,
                ..
            })
        ));
    }

    /// Cancel a hung stage, reset, and run again
    #[tokio::test]
    async fn test_e2e_cancel_reset_restart() {
        let hang = Arc::new(ScriptedTool::new("render").with_steps([15.0]).hang());
        let mut tools = scripted_toolset(StageId::Assembly, ScriptedTool::new("mux"));
        tools.insert(StageId::AssetGeneration, hang.clone());

        let orchestrator = Orchestrator::new(
            tools,
            PipelineConfig::default(),
            OrchestratorSettings::default(),
        )
        .unwrap();

        let first = orchestrator.start(Some(MediaInput::new("a.mp4"))).unwrap();
        let mut events = orchestrator.subscribe();
        loop {
            if let PipelineEvent::ProgressChanged { stage, .. } = events.recv().await.unwrap() {
                if stage == StageId::AssetGeneration {
                    break;
                }
            }
        }

        assert!(orchestrator.cancel());
        assert_eq!(wait(&orchestrator).await, PipelineStatus::Failed);
        let run = orchestrator.snapshot();
        assert_eq!(
            run.stage(StageId::AssetGeneration).detail.as_deref(),
            Some("cancelled")
        );
        assert!(orchestrator.start(Some(MediaInput::new("b.mp4"))).is_err());

        orchestrator.reset();
        let run = orchestrator.snapshot();
        assert_eq!(run.status, PipelineStatus::Idle);
        assert!(run.stages.iter().all(|s| s.status == StageStatus::Pending));
        assert_eq!(run.log.last().unwrap().message, "System ready.");

        // The hung tool is started again and hangs; cancel proves the second run is live
        let second = orchestrator.start(Some(MediaInput::new("b.mp4"))).unwrap();
        assert!(second > first);
        assert_eq!(hang.calls(), 1);
        let mut events = orchestrator.subscribe();
        loop {
            if let PipelineEvent::ProgressChanged { stage, .. } = events.recv().await.unwrap() {
                if stage == StageId::AssetGeneration {
                    break;
                }
            }
        }
        assert_eq!(hang.calls(), 2);
        assert!(orchestrator.cancel());
        assert_eq!(wait(&orchestrator).await, PipelineStatus::Failed);
    }

    /// Stage payloads travel through external commands
    #[cfg(unix)]
    #[tokio::test]
    async fn test_e2e_command_stage() {
        let toml = r#"
[tools]
mode = "simulated"

[tools.simulated]
min_duration_ms = 10
max_duration_ms = 20
tick_ms = 5

[tools.commands.summarization]
program = "sh"
args = ["-c", "echo 'PROGRESS 50 Summarizing'; echo 'INFO summarizing {input}'; echo 'RESULT {\"summary\":\"ok\"}'"]
"#;
        let blueprint = ConfigLoader::load_from_str(toml, ConfigFormat::Toml).unwrap();
        let mut tools = build_toolset(&blueprint.tools).unwrap();
        let next = Arc::new(ScriptedTool::new("render"));
        tools.insert(StageId::AssetGeneration, next.clone());

        let orchestrator = Orchestrator::new(
            tools,
            blueprint.pipeline.clone(),
            blueprint.orchestrator.clone(),
        )
        .unwrap();
        orchestrator.start(Some(MediaInput::new("/media/talk.mp4"))).unwrap();
        assert_eq!(wait(&orchestrator).await, PipelineStatus::Completed);

        let run = orchestrator.snapshot();
        assert!(run
            .log
            .iter()
            .any(|e| e.message == "summarizing /media/talk.mp4"
                && e.stage == Some(StageId::Summarization)));

        let inputs = next.inputs();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].previous.as_ref().unwrap()["summary"], "ok");
    }
}
