//! Orchestrator handle
//!
//! Owns the run aggregate. Operations are synchronous and return
//! immediately; the stages themselves execute on a spawned tokio task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contracts::{
    ContractError, LogEntry, LogLevel, MediaInput, OrchestratorSettings, PipelineConfig,
    PipelineEvent, PipelineRun, PipelineStatus, ToolSet, Transition,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::runner::RunContext;
use crate::shared::Shared;

/// The run currently owning the aggregate
struct ActiveRun {
    run_id: u64,
    cancel: CancellationToken,
}

/// Pipeline orchestrator
///
/// # Example
///
/// ```ignore
/// let orchestrator = Orchestrator::new(tools, PipelineConfig::default(), settings)?;
/// orchestrator.start(Some(MediaInput::new("talk.mp4")))?;
/// assert_eq!(orchestrator.wait().await, PipelineStatus::Completed);
/// ```
pub struct Orchestrator {
    shared: Arc<Shared>,
    tools: ToolSet,
    config: Arc<PipelineConfig>,
    stage_timeout: Option<Duration>,
    next_run_id: AtomicU64,
    active: Mutex<Option<ActiveRun>>,
}

impl Orchestrator {
    /// Create an orchestrator.
    ///
    /// # Errors
    /// - a stage has no tool
    /// - `event_capacity` is 0
    pub fn new(
        tools: ToolSet,
        config: PipelineConfig,
        settings: OrchestratorSettings,
    ) -> Result<Self, ContractError> {
        tools.ensure_complete()?;
        if settings.event_capacity == 0 {
            return Err(ContractError::config_validation(
                "orchestrator.event_capacity",
                "event_capacity must be > 0",
            ));
        }

        debug!(tools = ?tools, timeout = ?settings.stage_timeout(), "orchestrator created");
        Ok(Self {
            shared: Arc::new(Shared::new(settings.event_capacity)),
            tools,
            config: Arc::new(config),
            stage_timeout: settings.stage_timeout(),
            next_run_id: AtomicU64::new(0),
            active: Mutex::new(None),
        })
    }

    /// Start a run and return its id.
    ///
    /// Requires a tokio runtime. Returns as soon as the run task is spawned.
    ///
    /// # Errors
    /// `InvalidState` (nothing is mutated) when
    /// - `input` is missing or empty
    /// - the pipeline is not Idle (Processing, or Completed/Failed without reset)
    /// - no tokio runtime is available
    pub fn start(&self, input: Option<MediaInput>) -> Result<u64, ContractError> {
        let input = input
            .filter(|media| !media.path().as_os_str().is_empty())
            .ok_or_else(|| ContractError::invalid_state("start", "no media input selected"))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ContractError::invalid_state("start", "no tokio runtime"))?;

        let mut active = self.active();
        let run_id = {
            let mut run = self.shared.lock();
            if run.status != PipelineStatus::Idle {
                return Err(ContractError::invalid_state(
                    "start",
                    match run.status {
                        PipelineStatus::Processing => "pipeline is already processing".to_string(),
                        status => format!("pipeline is {status}, reset required"),
                    },
                ));
            }

            let run_id = self.next_run_id.fetch_add(1, Ordering::AcqRel) + 1;
            self.shared.apply_locked(
                &mut run,
                Transition::Begin {
                    run_id,
                    input: input.clone(),
                },
            )?;
            self.shared.apply_locked(
                &mut run,
                Transition::Log(LogEntry::info(format!(
                    "Starting pipeline for {}...",
                    input.file_name()
                ))),
            )?;
            run_id
        };

        let cancel = CancellationToken::new();
        let context = RunContext {
            run_id,
            input,
            shared: self.shared.clone(),
            tools: self.tools.clone(),
            config: self.config.clone(),
            stage_timeout: self.stage_timeout,
            cancel: cancel.clone(),
        };
        runtime.spawn(context.run());
        *active = Some(ActiveRun { run_id, cancel });

        info!(run_id, "pipeline started");
        Ok(run_id)
    }

    /// Request cooperative cancellation of the run in flight.
    ///
    /// Returns false (and does nothing) unless the pipeline is Processing.
    pub fn cancel(&self) -> bool {
        let active = self.active();
        let Some(current) = active.as_ref() else {
            return false;
        };

        let run = self.shared.lock();
        if run.status != PipelineStatus::Processing || run.run_id != current.run_id {
            return false;
        }
        drop(run);

        if !current.cancel.is_cancelled() {
            warn!(run_id = current.run_id, "cancellation requested");
            current.cancel.cancel();
        }
        true
    }

    /// Return to a fresh Idle run. The log is kept.
    ///
    /// A run in flight is detached before it is cancelled, so its
    /// cancellation can no longer change the new state.
    pub fn reset(&self) {
        let mut active = self.active();
        let previous = active.take();

        let mut run = self.shared.lock();
        let result = self
            .shared
            .apply_locked(&mut run, Transition::Reset)
            .and_then(|_| {
                self.shared
                    .apply_locked(&mut run, Transition::Log(LogEntry::info("System ready.")))
            });
        drop(run);
        if let Err(err) = result {
            warn!(error = %err, "reset rejected");
        }

        if let Some(previous) = previous {
            previous.cancel.cancel();
            debug!(run_id = previous.run_id, "run detached");
        }
        info!("pipeline reset");
    }

    /// Truncate the log
    pub fn clear_log(&self) {
        if let Err(err) = self.shared.apply(Transition::ClearLog) {
            warn!(error = %err, "clear log rejected");
        }
    }

    /// Append a host line to the log (e.g. "File loaded: talk.mp4")
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        if let Err(err) = self
            .shared
            .apply(Transition::Log(LogEntry::new(level, message)))
        {
            warn!(error = %err, "log append rejected");
        }
    }

    /// Consistent copy of the current run
    pub fn snapshot(&self) -> PipelineRun {
        self.shared.snapshot()
    }

    pub fn status(&self) -> PipelineStatus {
        self.shared.lock().status
    }

    /// Ordered event stream from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.shared.subscribe()
    }

    /// Wait until the pipeline leaves Processing and return the new status.
    ///
    /// Returns immediately when nothing is running.
    pub async fn wait(&self) -> PipelineStatus {
        let mut events = self.subscribe();
        loop {
            let status = self.status();
            if status != PipelineStatus::Processing {
                return status;
            }

            match events.recv().await {
                Ok(PipelineEvent::PipelineStatusChanged { status, .. })
                    if status != PipelineStatus::Processing =>
                {
                    return self.status();
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "wait lagged behind event stream");
                }
                Err(broadcast::error::RecvError::Closed) => return self.status(),
            }
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(active) = self.active().take() {
            active.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("tools", &self.tools)
            .field("status", &self.status())
            .field("stage_timeout", &self.stage_timeout)
            .finish()
    }
}
