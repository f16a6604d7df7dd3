//! 模拟 stage 工具
//!
//! 用于无真实引擎环境的演示与开发：随机时长、固定间隔上报进度、输出预置日志。

use std::time::Duration;

use contracts::{
    ContractError, LogLevel, PipelineConfig, ProgressReporter, SimulatedSettings, StageId,
    StageInput, StageOutput, StageTool, VideoBackend, MAX_RUNNING_PROGRESS,
};
use serde_json::json;
use tracing::{debug, trace};

/// 模拟 stage 工具
///
/// 每次调用在 `[min_duration_ms, max_duration_ms]` 内随机选取时长，
/// 每 `tick_ms` 上报一次进度，上限 99。
#[derive(Debug, Clone)]
pub struct SimulatedTool {
    name: String,
    stage: StageId,
    settings: SimulatedSettings,
}

impl SimulatedTool {
    /// 创建模拟工具
    pub fn new(stage: StageId, settings: SimulatedSettings) -> Self {
        Self {
            name: format!("simulated-{}", stage.key()),
            stage,
            settings,
        }
    }

    /// 使用默认时序 (1.5s - 3.5s, 100ms tick)
    pub fn with_defaults(stage: StageId) -> Self {
        Self::new(stage, SimulatedSettings::default())
    }

    fn pick_duration(&self) -> Duration {
        let min = self.settings.min_duration_ms;
        let max = self.settings.max_duration_ms.max(min);
        let ms = if min == max {
            min
        } else {
            rand::random_range(min..=max)
        };
        Duration::from_millis(ms)
    }
}

/// 各 stage 的预置日志
pub fn canned_logs(
    stage: StageId,
    config: &PipelineConfig,
    media_name: &str,
) -> Vec<(LogLevel, String)> {
    use LogLevel::{Debug, Info};

    match stage {
        StageId::Transcription => vec![
            (
                Info,
                format!(
                    "Loading transcription model '{}'...",
                    config.transcription_model
                ),
            ),
            (Info, format!("Transcribing audio track of {media_name}...")),
            (Debug, "Audio duration: 4m 32s".to_string()),
        ],
        StageId::Diarization => vec![
            (Info, "Loading diarization pipeline...".to_string()),
            (Info, "Identifying speakers...".to_string()),
            (Info, "Found 2 unique speakers.".to_string()),
        ],
        StageId::Summarization => vec![
            (
                Info,
                format!(
                    "Connecting to summarization model '{}'...",
                    config.summarization_model
                ),
            ),
            (Info, "Generating semantic embeddings...".to_string()),
            (Info, "Extracted 5 key topics.".to_string()),
        ],
        StageId::AssetGeneration => {
            let target = match config.video_backend {
                VideoBackend::Local => format!("local generation host ({})", config.asset_host),
                VideoBackend::Cloud => format!("cloud endpoint ({})", config.cloud_endpoint),
            };
            vec![
                (Info, format!("Queueing generation prompts on {target}...")),
                (Info, "Generating background_topic_0.mp4...".to_string()),
                (Info, "Generating background_topic_1.mp4...".to_string()),
                (Debug, "VRAM Usage: 14.2GB / 24.0GB".to_string()),
            ]
        }
        StageId::Assembly => vec![
            (Info, "Initializing video compositor...".to_string()),
            (Info, "Concatenating 5 video clips...".to_string()),
            (Info, "Overlaying bullet points...".to_string()),
            (Debug, "Validating clip dimensions...".to_string()),
            (Debug, "Normalizing audio sample rates...".to_string()),
            (Info, "Writing final MP4 to disk...".to_string()),
        ],
    }
}

impl StageTool for SimulatedTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        input: StageInput,
        progress: ProgressReporter,
    ) -> Result<StageOutput, ContractError> {
        let media_name = input.media.file_name();
        for (level, message) in canned_logs(self.stage, &input.config, &media_name) {
            progress.log(level, message);
        }

        let duration = self.pick_duration();
        let tick = Duration::from_millis(self.settings.tick_ms.max(1));
        debug!(
            stage = %self.stage.key(),
            run_id = input.run_id,
            duration_ms = duration.as_millis() as u64,
            "simulated stage started"
        );

        let mut elapsed = Duration::ZERO;
        while elapsed < duration {
            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = progress.cancelled() => {
                    return Err(ContractError::Cancelled { stage: self.stage });
                }
            }
            elapsed += tick;

            let pct = (elapsed.as_secs_f64() / duration.as_secs_f64() * 100.0)
                .min(MAX_RUNNING_PROGRESS);
            trace!(stage = %self.stage.key(), progress = pct, "tick");
            progress.report_with_detail(pct, "Processing...")?;
        }

        Ok(StageOutput::with_payload(json!({
            "stage": self.stage.key(),
            "media": media_name,
            "simulated_ms": duration.as_millis() as u64,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{MediaInput, StageReport};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn fast_settings() -> SimulatedSettings {
        SimulatedSettings {
            min_duration_ms: 30,
            max_duration_ms: 30,
            tick_ms: 10,
        }
    }

    fn input(stage: StageId) -> StageInput {
        StageInput {
            run_id: 1,
            stage,
            media: MediaInput::new("/tmp/interview.mp4"),
            previous: None,
            config: Arc::new(PipelineConfig::default()),
        }
    }

    #[test]
    fn test_canned_logs_per_stage() {
        let config = PipelineConfig::default();
        for stage in StageId::ALL {
            let logs = canned_logs(stage, &config, "a.mp4");
            assert!(logs.iter().any(|(level, _)| *level == LogLevel::Info));
        }
        let transcription = canned_logs(StageId::Transcription, &config, "a.mp4");
        assert!(transcription[0].1.contains("'base'"));
    }

    #[test]
    fn test_asset_logs_follow_backend() {
        let mut config = PipelineConfig::default();
        let local = canned_logs(StageId::AssetGeneration, &config, "a.mp4");
        assert!(local[0].1.contains("127.0.0.1:8188"));

        config.video_backend = VideoBackend::Cloud;
        config.cloud_endpoint = "https://gen.example.com".into();
        let cloud = canned_logs(StageId::AssetGeneration, &config, "a.mp4");
        assert!(cloud[0].1.contains("https://gen.example.com"));
    }

    #[tokio::test]
    async fn test_simulated_run_reports_progress_below_100() {
        let tool = SimulatedTool::new(StageId::Diarization, fast_settings());
        let (reporter, mut rx) =
            ProgressReporter::channel(StageId::Diarization, CancellationToken::new());

        let output = tool.run(input(StageId::Diarization), reporter).await.unwrap();
        assert_eq!(output.payload.unwrap()["stage"], "diarization");

        let mut logs = 0;
        let mut last = 0.0;
        while let Ok(report) = rx.try_recv() {
            match report {
                StageReport::Log(entry) => {
                    assert_eq!(entry.stage, Some(StageId::Diarization));
                    logs += 1;
                }
                StageReport::Progress { progress, detail } => {
                    assert!(progress >= last && progress <= MAX_RUNNING_PROGRESS);
                    assert_eq!(detail.as_deref(), Some("Processing..."));
                    last = progress;
                }
            }
        }
        assert_eq!(logs, 3);
        assert_eq!(last, MAX_RUNNING_PROGRESS);
    }

    #[tokio::test]
    async fn test_simulated_run_observes_cancel() {
        let tool = SimulatedTool::new(
            StageId::Assembly,
            SimulatedSettings {
                min_duration_ms: 10_000,
                max_duration_ms: 10_000,
                tick_ms: 10,
            },
        );
        let cancel = CancellationToken::new();
        let (reporter, _rx) = ProgressReporter::channel(StageId::Assembly, cancel.clone());

        let handle = tokio::spawn(async move { tool.run(input(StageId::Assembly), reporter).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }
}
