//! LogSink - mirrors pipeline events into tracing

use contracts::{ContractError, EventSink, LogLevel, PipelineEvent};
use tracing::{debug, error, info, instrument, warn};

/// Sink that mirrors the run log and status changes into the process log
pub struct LogSink {
    name: String,
}

impl LogSink {
    /// Create a new LogSink with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn log_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::LogAppended { run_id, entry } => {
                let stage = entry.stage.map(|s| s.key()).unwrap_or("-");
                match entry.level {
                    LogLevel::Info => info!(sink = %self.name, run_id, stage, "{}", entry.message),
                    LogLevel::Warn => warn!(sink = %self.name, run_id, stage, "{}", entry.message),
                    LogLevel::Error => {
                        error!(sink = %self.name, run_id, stage, "{}", entry.message)
                    }
                    LogLevel::Debug => {
                        debug!(sink = %self.name, run_id, stage, "{}", entry.message)
                    }
                }
            }
            PipelineEvent::StageStatusChanged { run_id, state } => {
                info!(
                    sink = %self.name,
                    run_id,
                    stage = state.id.key(),
                    status = ?state.status,
                    progress = state.progress,
                    detail = state.detail.as_deref().unwrap_or(""),
                    "Stage status changed"
                );
            }
            PipelineEvent::ProgressChanged {
                run_id,
                stage,
                progress,
            } => {
                debug!(sink = %self.name, run_id, stage = stage.key(), progress, "Progress");
            }
            PipelineEvent::PipelineStatusChanged { run_id, status } => {
                info!(sink = %self.name, run_id, status = %status, "Pipeline status changed");
            }
        }
    }
}

impl EventSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, event),
        fields(sink = %self.name, kind = event.kind())
    )]
    async fn write(&mut self, event: &PipelineEvent) -> Result<(), ContractError> {
        self.log_event(event);
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        // Nothing to flush for log sink
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        debug!(sink = %self.name, "LogSink closed");
        Ok(())
    }
}
