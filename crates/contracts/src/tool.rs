//! StageTool trait - external stage collaborator abstraction
//!
//! Defines the contract between the orchestrator and whatever performs a
//! stage's real work (transcription engine, diarization model, LLM service,
//! asset generator, assembly utility).

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{ContractError, LogEntry, LogLevel, MediaInput, PipelineConfig, StageId};

/// Boxed future used by the object-safe tool wrapper
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything a tool receives for one invocation
#[derive(Debug, Clone)]
pub struct StageInput {
    /// Run being executed
    pub run_id: u64,

    /// Stage being executed
    pub stage: StageId,

    /// Media the run was started with
    pub media: MediaInput,

    /// Payload produced by the previous stage, if any
    pub previous: Option<Value>,

    /// Opaque configuration bundle, passed through unmodified
    pub config: Arc<PipelineConfig>,
}

/// Successful tool result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    /// Payload handed to the next stage
    pub payload: Option<Value>,
}

impl StageOutput {
    /// Success without payload
    pub fn empty() -> Self {
        Self::default()
    }

    /// Success carrying a payload for the next stage
    pub fn with_payload(payload: Value) -> Self {
        Self {
            payload: Some(payload),
        }
    }
}

/// Message sent from a running tool back to the orchestrator
#[derive(Debug, Clone)]
pub enum StageReport {
    Progress {
        progress: f64,
        detail: Option<String>,
    },
    Log(LogEntry),
}

/// Progress sink handed to a tool.
///
/// Also the tool's cancellation checkpoint: once the run is cancelled,
/// [`ProgressReporter::report`] and [`ProgressReporter::checkpoint`] return
/// [`ContractError::Cancelled`], which the tool propagates with `?`.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    stage: StageId,
    tx: mpsc::UnboundedSender<StageReport>,
    cancel: CancellationToken,
}

impl ProgressReporter {
    pub fn new(
        stage: StageId,
        tx: mpsc::UnboundedSender<StageReport>,
        cancel: CancellationToken,
    ) -> Self {
        Self { stage, tx, cancel }
    }

    /// Create a reporter together with the receiving end
    pub fn channel(
        stage: StageId,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<StageReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(stage, tx, cancel), rx)
    }

    /// Stage this reporter belongs to
    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// Fail with `Cancelled` if the run has been cancelled
    pub fn checkpoint(&self) -> Result<(), ContractError> {
        if self.cancel.is_cancelled() {
            return Err(ContractError::Cancelled { stage: self.stage });
        }
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Report progress in `[0, 100)`
    pub fn report(&self, progress: f64) -> Result<(), ContractError> {
        self.send_progress(progress, None)
    }

    /// Report progress with a detail line ("Processing...")
    pub fn report_with_detail(
        &self,
        progress: f64,
        detail: impl Into<String>,
    ) -> Result<(), ContractError> {
        self.send_progress(progress, Some(detail.into()))
    }

    /// Append a line to the run log, tagged with this stage
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::new(level, message).for_stage(self.stage);
        // Receiver gone means the run was reset; nothing left to inform
        let _ = self.tx.send(StageReport::Log(entry));
    }

    fn send_progress(&self, progress: f64, detail: Option<String>) -> Result<(), ContractError> {
        self.checkpoint()?;
        let _ = self.tx.send(StageReport::Progress { progress, detail });
        Ok(())
    }
}

/// Stage tool trait
///
/// All stage adapters implement this trait.
#[trait_variant::make(StageTool: Send)]
pub trait LocalStageTool {
    /// Tool name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Execute the stage.
    ///
    /// Progress must be reported monotonically in `[0, 100)`; the
    /// orchestrator itself marks 100 on success.
    ///
    /// # Errors
    /// Returns the failure with a diagnostic message
    async fn run(
        &self,
        input: StageInput,
        progress: ProgressReporter,
    ) -> Result<StageOutput, ContractError>;
}

/// Object-safe form of [`StageTool`], so heterogeneous tools can share a [`ToolSet`]
pub trait DynStageTool: Send + Sync {
    fn tool_name(&self) -> &str;

    fn run_boxed(
        &self,
        input: StageInput,
        progress: ProgressReporter,
    ) -> BoxFuture<'_, Result<StageOutput, ContractError>>;
}

impl<T: StageTool + Sync> DynStageTool for T {
    fn tool_name(&self) -> &str {
        StageTool::name(self)
    }

    fn run_boxed(
        &self,
        input: StageInput,
        progress: ProgressReporter,
    ) -> BoxFuture<'_, Result<StageOutput, ContractError>> {
        Box::pin(self.run(input, progress))
    }
}

/// One tool per stage
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<StageId, Arc<dyn DynStageTool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with<T>(mut self, stage: StageId, tool: T) -> Self
    where
        T: StageTool + Sync + 'static,
    {
        self.insert(stage, Arc::new(tool));
        self
    }

    /// Register (or replace) the tool for a stage
    pub fn insert(&mut self, stage: StageId, tool: Arc<dyn DynStageTool>) {
        self.tools.insert(stage, tool);
    }

    pub fn get(&self, stage: StageId) -> Option<Arc<dyn DynStageTool>> {
        self.tools.get(&stage).cloned()
    }

    /// Stages without a tool, in execution order
    pub fn missing(&self) -> Vec<StageId> {
        StageId::ALL
            .into_iter()
            .filter(|stage| !self.tools.contains_key(stage))
            .collect()
    }

    /// Error unless every stage has a tool
    pub fn ensure_complete(&self) -> Result<(), ContractError> {
        let missing = self.missing();
        if missing.is_empty() {
            return Ok(());
        }
        Err(ContractError::config_validation(
            "tools",
            format!(
                "no tool registered for: {}",
                missing
                    .iter()
                    .map(|s| s.key())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        ))
    }
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.tools.iter().map(|(k, v)| (k.key(), v.tool_name())))
            .finish()
    }
}
