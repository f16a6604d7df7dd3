//! Pipeline runner - wires tools, orchestrator and sinks for one run.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{LogLevel, MediaInput, PipelineBlueprint, PipelineEvent, SinkConfig, SinkType};
use observability::RunMetricsAggregator;
use orchestrator::Orchestrator;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::PipelineStats;

/// Upper bound for sinks to drain after the run ends
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for one pipeline run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Loaded and validated configuration
    pub blueprint: PipelineBlueprint,

    /// Media file to process
    pub input: MediaInput,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Runs one media file through the pipeline
pub struct Pipeline {
    options: RunOptions,
}

impl Pipeline {
    /// Create a new pipeline with the given options
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }

    /// Run to completion; Ctrl+C or SIGTERM cancels the run
    pub async fn run(self) -> Result<PipelineStats> {
        self.run_until(shutdown_signal()).await
    }

    /// Run to completion, cancelling the run when `shutdown` resolves first
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let blueprint = &self.options.blueprint;

        // Initialize Metrics (optional)
        if let Some(port) = self.options.metrics_port {
            observability::init_metrics_only(port)?;
            info!(port, "Metrics endpoint available");
        }

        let tools =
            adapters::build_toolset(&blueprint.tools).context("Failed to build stage tools")?;
        let orchestrator = Orchestrator::new(
            tools,
            blueprint.pipeline.clone(),
            blueprint.orchestrator.clone(),
        )
        .context("Failed to create orchestrator")?;

        // Setup Dispatcher
        let sinks = sink_configs(blueprint);
        let active_sinks = sinks.len();
        let dispatcher_handle = dispatcher::create_dispatcher(sinks, orchestrator.subscribe())
            .context("Failed to create dispatcher")?
            .spawn();
        let metrics_handle = tokio::spawn(collect_run_metrics(orchestrator.subscribe()));
        info!(active_sinks, "Dispatcher started");

        let input = self.options.input.clone();
        orchestrator.log(LogLevel::Info, format!("File loaded: {}", input.file_name()));
        let run_id = orchestrator
            .start(Some(input))
            .context("Failed to start pipeline")?;

        tokio::pin!(shutdown);
        let status = tokio::select! {
            status = orchestrator.wait() => status,
            _ = &mut shutdown => {
                warn!(run_id, "Received shutdown signal, cancelling pipeline...");
                orchestrator.cancel();
                orchestrator.wait().await
            }
        };
        let run = orchestrator.snapshot();
        info!(run_id, status = %status, "Pipeline run ended");

        // The event stream closes once the orchestrator and its run task are gone
        drop(orchestrator);
        let sink_metrics = match tokio::time::timeout(FLUSH_TIMEOUT, dispatcher_handle).await {
            Ok(result) => result.context("Dispatcher task failed")?,
            Err(_) => {
                warn!(timeout_secs = FLUSH_TIMEOUT.as_secs(), "Sinks did not drain in time");
                Vec::new()
            }
        };
        let aggregator = metrics_handle.await.context("Metrics task failed")?;

        let stats = PipelineStats {
            run_id,
            status,
            run,
            duration: start_time.elapsed(),
            active_sinks,
            summary: aggregator.summary(),
            sink_metrics,
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            status = %stats.status,
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }
}

/// Configured sinks, or a console log sink when none are configured
fn sink_configs(blueprint: &PipelineBlueprint) -> Vec<SinkConfig> {
    if !blueprint.sinks.is_empty() {
        return blueprint.sinks.clone();
    }

    debug!("No sinks configured, logging events to the console");
    vec![SinkConfig {
        name: "console".to_string(),
        sink_type: SinkType::Log,
        queue_capacity: 256,
        params: HashMap::new(),
    }]
}

/// Aggregate events until the run ends or the stream closes
async fn collect_run_metrics(mut events: broadcast::Receiver<PipelineEvent>) -> RunMetricsAggregator {
    let mut aggregator = RunMetricsAggregator::new();
    loop {
        match events.recv().await {
            Ok(event) => {
                aggregator.update(&event);
                if event.is_terminal() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Run metrics lagged behind event stream");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    aggregator
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{PipelineStatus, SimulatedSettings, StageId, StageStatus};

    fn fast_blueprint() -> PipelineBlueprint {
        let mut blueprint = PipelineBlueprint::default();
        blueprint.tools.simulated = SimulatedSettings {
            min_duration_ms: 20,
            max_duration_ms: 40,
            tick_ms: 5,
        };
        blueprint
    }

    fn options(blueprint: PipelineBlueprint) -> RunOptions {
        RunOptions {
            blueprint,
            input: MediaInput::new("lecture.mp4"),
            metrics_port: None,
        }
    }

    #[tokio::test]
    async fn test_simulated_run_completes() {
        let stats = Pipeline::new(options(fast_blueprint()))
            .run_until(std::future::pending())
            .await
            .unwrap();

        assert_eq!(stats.status, PipelineStatus::Completed);
        assert_eq!(stats.active_sinks, 1);
        assert_eq!(stats.summary.stages_completed, 5);
        assert!(stats.failed_stage().is_none());
        assert!(stats.run.log[0].message.starts_with("File loaded: lecture.mp4"));
        assert!(stats
            .run
            .stages
            .iter()
            .all(|s| s.status == StageStatus::Completed));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_run() {
        let mut blueprint = fast_blueprint();
        blueprint.tools.simulated = SimulatedSettings {
            min_duration_ms: 5_000,
            max_duration_ms: 5_000,
            tick_ms: 10,
        };

        let shutdown = tokio::time::sleep(Duration::from_millis(50));
        let stats = Pipeline::new(options(blueprint))
            .run_until(shutdown)
            .await
            .unwrap();

        assert_eq!(stats.status, PipelineStatus::Failed);
        let (stage, reason) = stats.failed_stage().unwrap();
        assert_eq!(stage, StageId::Transcription);
        assert_eq!(reason, "cancelled");
    }
}
