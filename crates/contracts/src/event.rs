//! PipelineEvent - Orchestrator output
//!
//! Ordered event stream delivered to observers.

use serde::{Deserialize, Serialize};

use crate::{LogEntry, PipelineStatus, StageId, StageState};

/// Event emitted by a [`crate::PipelineRun`] transition.
///
/// Every event carries the `run_id` of the run that produced it so observers
/// can discard events from a run that has since been reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A stage changed status (carries the full new state)
    StageStatusChanged { run_id: u64, state: StageState },

    /// A running stage reported progress
    ProgressChanged {
        run_id: u64,
        stage: StageId,
        progress: f64,
    },

    /// A line was appended to the run log
    LogAppended { run_id: u64, entry: LogEntry },

    /// The overall pipeline status changed
    PipelineStatusChanged { run_id: u64, status: PipelineStatus },
}

impl PipelineEvent {
    /// Run that emitted this event
    pub fn run_id(&self) -> u64 {
        match self {
            PipelineEvent::StageStatusChanged { run_id, .. }
            | PipelineEvent::ProgressChanged { run_id, .. }
            | PipelineEvent::LogAppended { run_id, .. }
            | PipelineEvent::PipelineStatusChanged { run_id, .. } => *run_id,
        }
    }

    /// Short event name for logging/metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::StageStatusChanged { .. } => "stage_status_changed",
            PipelineEvent::ProgressChanged { .. } => "progress_changed",
            PipelineEvent::LogAppended { .. } => "log_appended",
            PipelineEvent::PipelineStatusChanged { .. } => "pipeline_status_changed",
        }
    }

    /// True for the event that ends a run (Completed or Failed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineEvent::PipelineStatusChanged { status, .. } if status.is_terminal()
        )
    }
}
