//! Run task: walks the stage order for one run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{
    ContractError, LogEntry, LogLevel, MediaInput, PipelineConfig, PipelineStatus,
    ProgressReporter, StageId, StageInput, StageOutput, StageReport, ToolSet, Transition,
};
use observability::record_stage_duration_ms;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::shared::Shared;

/// Everything one run task needs
pub(crate) struct RunContext {
    pub(crate) run_id: u64,
    pub(crate) input: MediaInput,
    pub(crate) shared: Arc<Shared>,
    pub(crate) tools: ToolSet,
    pub(crate) config: Arc<PipelineConfig>,
    pub(crate) stage_timeout: Option<Duration>,
    pub(crate) cancel: CancellationToken,
}

/// How one stage ended
enum StageEnd {
    Completed(StageOutput),
    Failed(ContractError),
    /// The run was reset underneath us
    Detached,
}

impl RunContext {
    /// Execute every stage in order. Returns the terminal status, or `Idle`
    /// if the run was reset before it finished.
    #[instrument(name = "pipeline_run", skip(self), fields(run_id = self.run_id, media = %self.input.file_name()))]
    pub(crate) async fn run(self) -> PipelineStatus {
        let started = Instant::now();
        let mut previous: Option<Value> = None;

        for stage in StageId::ALL {
            match self.run_stage(stage, previous.take()).await {
                StageEnd::Completed(output) => previous = output.payload,
                StageEnd::Failed(err) => {
                    return self.fail(stage, err);
                }
                StageEnd::Detached => {
                    debug!("run detached by reset");
                    return PipelineStatus::Idle;
                }
            }
        }

        let finished = self.commit([
            Transition::Log(LogEntry::info("Pipeline finished successfully.")),
            Transition::Finish,
        ]);
        if !finished {
            return PipelineStatus::Idle;
        }
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pipeline completed"
        );
        PipelineStatus::Completed
    }

    async fn run_stage(&self, stage: StageId, previous: Option<Value>) -> StageEnd {
        let entered = self.commit([
            Transition::StageStarted(stage),
            Transition::Log(
                LogEntry::info(format!("Starting {}...", stage.label())).for_stage(stage),
            ),
        ]);
        if !entered {
            return StageEnd::Detached;
        }
        if self.cancel.is_cancelled() {
            return StageEnd::Failed(ContractError::Cancelled { stage });
        }
        let Some(tool) = self.tools.get(stage) else {
            return StageEnd::Failed(ContractError::stage_failure(stage, "no tool registered"));
        };

        info!(stage = %stage.key(), tool = %tool.tool_name(), "stage started");
        let started = Instant::now();

        let (reporter, mut reports) = ProgressReporter::channel(stage, self.cancel.clone());
        let input = StageInput {
            run_id: self.run_id,
            stage,
            media: self.input.clone(),
            previous,
            config: self.config.clone(),
        };

        let stage_timeout = self.stage_timeout;
        let work = async {
            let fut = tool.run_boxed(input, reporter);
            match stage_timeout {
                Some(limit) => tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
                    Err(ContractError::Timeout { stage, limit })
                }),
                None => fut.await,
            }
        };
        tokio::pin!(work);

        let result = loop {
            tokio::select! {
                biased;
                Some(report) = reports.recv() => {
                    if !self.handle_report(stage, report) {
                        return StageEnd::Detached;
                    }
                }
                result = &mut work => break result,
                _ = self.cancel.cancelled() => break Err(ContractError::Cancelled { stage }),
            }
        };

        // Reports sent just before the tool returned
        while let Ok(report) = reports.try_recv() {
            if !self.handle_report(stage, report) {
                return StageEnd::Detached;
            }
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        record_stage_duration_ms(stage, elapsed_ms);

        match result {
            Ok(output) => {
                let committed = self.commit([
                    Transition::StageCompleted(stage),
                    Transition::Log(
                        LogEntry::info(format!("{} completed.", stage.label())).for_stage(stage),
                    ),
                ]);
                if !committed {
                    return StageEnd::Detached;
                }
                info!(stage = %stage.key(), elapsed_ms, "stage completed");
                StageEnd::Completed(output)
            }
            Err(err) => StageEnd::Failed(err),
        }
    }

    /// Apply one tool report. Returns false once the run is detached.
    fn handle_report(&self, stage: StageId, report: StageReport) -> bool {
        let transition = match report {
            StageReport::Progress { progress, detail } => Transition::Progress {
                stage,
                progress,
                detail,
            },
            StageReport::Log(mut entry) => {
                // ERROR entries belong to the orchestrator's failure record
                if entry.level == LogLevel::Error {
                    entry.level = LogLevel::Warn;
                }
                Transition::Log(entry)
            }
        };
        self.commit([transition])
    }

    /// Record the failure of `stage`: one ERROR entry, then the terminal
    /// stage and pipeline change, atomically.
    fn fail(&self, stage: StageId, err: ContractError) -> PipelineStatus {
        let reason = err.stage_detail();
        if err.is_cancelled() {
            warn!(stage = %stage.key(), "stage cancelled");
        } else {
            error!(stage = %stage.key(), error = %err, "stage failed");
        }

        let message = if err.is_cancelled() {
            format!("{} cancelled.", stage.label())
        } else {
            format!("{} failed: {}", stage.label(), reason)
        };
        let committed = self.commit([
            Transition::Log(LogEntry::error(message).for_stage(stage)),
            Transition::StageFailed { stage, reason },
        ]);
        if committed {
            PipelineStatus::Failed
        } else {
            PipelineStatus::Idle
        }
    }

    /// Apply transitions for this run. Returns false once the run is detached.
    fn commit<const N: usize>(&self, transitions: [Transition; N]) -> bool {
        match self.shared.apply_for(self.run_id, transitions) {
            Ok(applied) => applied,
            Err(err) => {
                // Only a bug in the stage walk can get here
                error!(error = %err, "rejected transition");
                false
            }
        }
    }
}
