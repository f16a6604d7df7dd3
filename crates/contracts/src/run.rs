//! PipelineRun - the run aggregate and its transition function.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::{ContractError, LogEntry, PipelineEvent, StageId, StageState, StageStatus};

/// Highest progress a running stage may report. 100 belongs to `Completed`.
pub const MAX_RUNNING_PROGRESS: f64 = 99.0;

/// Overall pipeline status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Idle,
    Processing,
    Completed,
    Failed,
}

impl PipelineStatus {
    /// Completed or Failed
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineStatus::Completed | PipelineStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStatus::Idle => "idle",
            PipelineStatus::Processing => "processing",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media reference handed to `start`. The orchestrator never opens it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInput {
    pub path: PathBuf,
}

impl MediaInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name for display, falling back to the full path
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// A requested state change of the aggregate
#[derive(Debug, Clone)]
pub enum Transition {
    /// Idle -> Processing
    Begin { run_id: u64, input: MediaInput },
    /// Pending -> Running for the next stage in order
    StageStarted(StageId),
    /// Progress report from a running stage (clamped, monotonic)
    Progress {
        stage: StageId,
        progress: f64,
        detail: Option<String>,
    },
    /// Running -> Completed/100
    StageCompleted(StageId),
    /// Running -> Failed; the pipeline fails with it
    StageFailed { stage: StageId, reason: String },
    /// Processing -> Completed once every stage completed
    Finish,
    /// Append a log line
    Log(LogEntry),
    /// Truncate the whole log
    ClearLog,
    /// Discard the run; the log survives
    Reset,
}

/// The run aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Run identifier, 0 while Idle
    pub run_id: u64,

    /// Overall status
    pub status: PipelineStatus,

    /// One record per stage, in execution order
    pub stages: Vec<StageState>,

    /// Append-only log
    pub log: Vec<LogEntry>,

    /// Media the run was started with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<MediaInput>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRun {
    /// Fresh Idle run with every stage Pending/0
    pub fn new() -> Self {
        Self {
            run_id: 0,
            status: PipelineStatus::Idle,
            stages: StageId::ALL.iter().map(|id| StageState::pending(*id)).collect(),
            log: Vec::new(),
            input: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// State of one stage
    pub fn stage(&self, stage: StageId) -> &StageState {
        &self.stages[stage.index()]
    }

    /// The stage currently running, if any
    pub fn running_stage(&self) -> Option<StageId> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::Running)
            .map(|s| s.id)
    }

    /// Log entries at a given level
    pub fn log_at(&self, level: crate::LogLevel) -> impl Iterator<Item = &LogEntry> {
        self.log.iter().filter(move |entry| entry.level == level)
    }

    /// Apply a transition.
    ///
    /// Returns the events describing the change, in order. An illegal
    /// transition returns `InvalidState` and leaves `self` untouched.
    pub fn apply(&mut self, transition: Transition) -> Result<Vec<PipelineEvent>, ContractError> {
        match transition {
            Transition::Begin { run_id, input } => self.begin(run_id, input),
            Transition::StageStarted(stage) => self.start_stage(stage),
            Transition::Progress {
                stage,
                progress,
                detail,
            } => self.progress(stage, progress, detail),
            Transition::StageCompleted(stage) => self.complete_stage(stage),
            Transition::StageFailed { stage, reason } => self.fail_stage(stage, reason),
            Transition::Finish => self.finish(),
            Transition::Log(entry) => Ok(self.append_log(entry)),
            Transition::ClearLog => {
                self.log.clear();
                Ok(Vec::new())
            }
            Transition::Reset => Ok(self.reset()),
        }
    }

    /// Check the stage ordering invariant:
    /// `Completed* (Running | Failed)? Pending*`, with Running only while
    /// Processing and Failed only once the pipeline failed.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut idx = 0;
        let stages = &self.stages;

        while idx < stages.len() && stages[idx].status == StageStatus::Completed {
            if stages[idx].progress != 100.0 {
                return Err(format!("{} completed below 100", stages[idx].id));
            }
            idx += 1;
        }

        if idx < stages.len() {
            match stages[idx].status {
                StageStatus::Running => {
                    if self.status != PipelineStatus::Processing {
                        return Err(format!("{} running while {}", stages[idx].id, self.status));
                    }
                    if stages[idx].progress > MAX_RUNNING_PROGRESS {
                        return Err(format!("{} running at 100", stages[idx].id));
                    }
                    idx += 1;
                }
                StageStatus::Failed => {
                    if self.status != PipelineStatus::Failed {
                        return Err(format!("{} failed while {}", stages[idx].id, self.status));
                    }
                    idx += 1;
                }
                _ => {}
            }
        }

        for stage in &stages[idx..] {
            if stage.status != StageStatus::Pending {
                return Err(format!(
                    "{} is {:?} after the active boundary",
                    stage.id, stage.status
                ));
            }
        }

        let all_completed = stages.iter().all(|s| s.status == StageStatus::Completed);
        if self.status == PipelineStatus::Completed && !all_completed {
            return Err("pipeline completed with unfinished stages".to_string());
        }

        Ok(())
    }
}

impl PipelineRun {
    fn invalid(&self, operation: &str, reason: impl Into<String>) -> ContractError {
        ContractError::invalid_state(operation, reason)
    }

    fn require_processing(&self, operation: &str) -> Result<(), ContractError> {
        if self.status != PipelineStatus::Processing {
            return Err(self.invalid(operation, format!("pipeline is {}", self.status)));
        }
        Ok(())
    }

    fn require_running(&self, operation: &str, stage: StageId) -> Result<(), ContractError> {
        self.require_processing(operation)?;
        let state = self.stage(stage);
        if state.status != StageStatus::Running {
            return Err(self.invalid(
                operation,
                format!("stage {} is {:?}, not running", stage, state.status),
            ));
        }
        Ok(())
    }

    fn stage_event(&self, stage: StageId) -> PipelineEvent {
        PipelineEvent::StageStatusChanged {
            run_id: self.run_id,
            state: self.stage(stage).clone(),
        }
    }

    fn status_event(&self) -> PipelineEvent {
        PipelineEvent::PipelineStatusChanged {
            run_id: self.run_id,
            status: self.status,
        }
    }

    fn begin(&mut self, run_id: u64, input: MediaInput) -> Result<Vec<PipelineEvent>, ContractError> {
        if self.status != PipelineStatus::Idle {
            return Err(self.invalid(
                "start",
                format!("pipeline is {}, reset required", self.status),
            ));
        }
        self.run_id = run_id;
        self.status = PipelineStatus::Processing;
        self.input = Some(input);
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        Ok(vec![self.status_event()])
    }

    fn start_stage(&mut self, stage: StageId) -> Result<Vec<PipelineEvent>, ContractError> {
        self.require_processing("start stage")?;
        if let Some(running) = self.running_stage() {
            return Err(self.invalid("start stage", format!("stage {running} is still running")));
        }
        if self.stage(stage).status != StageStatus::Pending {
            return Err(self.invalid("start stage", format!("stage {stage} is not pending")));
        }
        if let Some(blocking) = self.stages[..stage.index()]
            .iter()
            .find(|s| s.status != StageStatus::Completed)
        {
            return Err(self.invalid(
                "start stage",
                format!("stage {} has not completed", blocking.id),
            ));
        }

        let state = &mut self.stages[stage.index()];
        state.status = StageStatus::Running;
        state.progress = 0.0;
        state.detail = Some("Initializing...".to_string());
        Ok(vec![self.stage_event(stage)])
    }

    fn progress(
        &mut self,
        stage: StageId,
        progress: f64,
        detail: Option<String>,
    ) -> Result<Vec<PipelineEvent>, ContractError> {
        self.require_running("report progress", stage)?;
        if progress.is_nan() {
            return Ok(Vec::new());
        }

        let clamped = progress.clamp(0.0, MAX_RUNNING_PROGRESS);
        let state = &mut self.stages[stage.index()];
        // Progress never moves backwards; a swallowed report changes nothing
        if clamped <= state.progress {
            return Ok(Vec::new());
        }
        state.progress = clamped;
        if let Some(detail) = detail {
            state.detail = Some(detail);
        }

        Ok(vec![PipelineEvent::ProgressChanged {
            run_id: self.run_id,
            stage,
            progress: clamped,
        }])
    }

    fn complete_stage(&mut self, stage: StageId) -> Result<Vec<PipelineEvent>, ContractError> {
        self.require_running("complete stage", stage)?;
        let state = &mut self.stages[stage.index()];
        state.status = StageStatus::Completed;
        state.progress = 100.0;
        state.detail = Some("Done".to_string());
        Ok(vec![self.stage_event(stage)])
    }

    fn fail_stage(&mut self, stage: StageId, reason: String) -> Result<Vec<PipelineEvent>, ContractError> {
        self.require_running("fail stage", stage)?;
        let state = &mut self.stages[stage.index()];
        state.status = StageStatus::Failed;
        state.detail = Some(reason);
        self.status = PipelineStatus::Failed;
        self.finished_at = Some(Utc::now());
        Ok(vec![self.stage_event(stage), self.status_event()])
    }

    fn finish(&mut self) -> Result<Vec<PipelineEvent>, ContractError> {
        self.require_processing("finish")?;
        if let Some(unfinished) = self
            .stages
            .iter()
            .find(|s| s.status != StageStatus::Completed)
        {
            return Err(self.invalid(
                "finish",
                format!("stage {} has not completed", unfinished.id),
            ));
        }
        self.status = PipelineStatus::Completed;
        self.finished_at = Some(Utc::now());
        Ok(vec![self.status_event()])
    }

    fn append_log(&mut self, entry: LogEntry) -> Vec<PipelineEvent> {
        self.log.push(entry.clone());
        vec![PipelineEvent::LogAppended {
            run_id: self.run_id,
            entry,
        }]
    }

    fn reset(&mut self) -> Vec<PipelineEvent> {
        let log = std::mem::take(&mut self.log);
        *self = PipelineRun {
            log,
            ..PipelineRun::new()
        };

        let mut events: Vec<_> = StageId::ALL.iter().map(|s| self.stage_event(*s)).collect();
        events.push(self.status_event());
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogLevel;

    fn begun() -> PipelineRun {
        let mut run = PipelineRun::new();
        run.apply(Transition::Begin {
            run_id: 1,
            input: MediaInput::new("talk.mp4"),
        })
        .unwrap();
        run
    }

    fn complete(run: &mut PipelineRun, stage: StageId) {
        run.apply(Transition::StageStarted(stage)).unwrap();
        run.apply(Transition::StageCompleted(stage)).unwrap();
    }

    #[test]
    fn test_new_run_is_idle() {
        let run = PipelineRun::new();
        assert_eq!(run.status, PipelineStatus::Idle);
        assert_eq!(run.stages.len(), 5);
        assert!(run
            .stages
            .iter()
            .all(|s| s.status == StageStatus::Pending && s.progress == 0.0));
        assert!(run.check_invariants().is_ok());
    }

    #[test]
    fn test_begin_twice_is_invalid() {
        let mut run = begun();
        let before = run.clone();
        let err = run
            .apply(Transition::Begin {
                run_id: 2,
                input: MediaInput::new("other.mp4"),
            })
            .unwrap_err();
        assert!(matches!(err, ContractError::InvalidState { .. }));
        assert_eq!(run, before);
    }

    #[test]
    fn test_stage_must_start_in_order() {
        let mut run = begun();
        let err = run
            .apply(Transition::StageStarted(StageId::Diarization))
            .unwrap_err();
        assert!(err.to_string().contains("has not completed"), "got: {err}");

        run.apply(Transition::StageStarted(StageId::Transcription))
            .unwrap();
        let err = run
            .apply(Transition::StageStarted(StageId::Transcription))
            .unwrap_err();
        assert!(err.to_string().contains("still running"), "got: {err}");
    }

    #[test]
    fn test_progress_is_clamped_and_monotonic() {
        let mut run = begun();
        run.apply(Transition::StageStarted(StageId::Transcription))
            .unwrap();

        let events = run
            .apply(Transition::Progress {
                stage: StageId::Transcription,
                progress: 150.0,
                detail: None,
            })
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(run.stage(StageId::Transcription).progress, MAX_RUNNING_PROGRESS);

        // Backwards report is swallowed
        let events = run
            .apply(Transition::Progress {
                stage: StageId::Transcription,
                progress: 10.0,
                detail: Some("Processing...".into()),
            })
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(run.stage(StageId::Transcription).progress, MAX_RUNNING_PROGRESS);
        assert_eq!(
            run.stage(StageId::Transcription).detail.as_deref(),
            Some("Initializing...")
        );

        let events = run
            .apply(Transition::Progress {
                stage: StageId::Transcription,
                progress: f64::NAN,
                detail: None,
            })
            .unwrap();
        assert!(events.is_empty());
        assert!(run.check_invariants().is_ok());
    }

    #[test]
    fn test_failure_halts_pipeline() {
        let mut run = begun();
        complete(&mut run, StageId::Transcription);
        complete(&mut run, StageId::Diarization);
        run.apply(Transition::StageStarted(StageId::Summarization))
            .unwrap();
        let events = run
            .apply(Transition::StageFailed {
                stage: StageId::Summarization,
                reason: "connection refused".into(),
            })
            .unwrap();

        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());
        assert_eq!(run.status, PipelineStatus::Failed);
        assert_eq!(
            run.stage(StageId::Summarization).detail.as_deref(),
            Some("connection refused")
        );
        assert_eq!(run.stage(StageId::AssetGeneration).status, StageStatus::Pending);
        assert!(run.check_invariants().is_ok());

        // Nothing may start after a failure
        assert!(run
            .apply(Transition::StageStarted(StageId::AssetGeneration))
            .is_err());
    }

    #[test]
    fn test_finish_requires_all_stages() {
        let mut run = begun();
        complete(&mut run, StageId::Transcription);
        assert!(run.apply(Transition::Finish).is_err());

        for stage in &StageId::ALL[1..] {
            complete(&mut run, *stage);
        }
        run.apply(Transition::Finish).unwrap();
        assert_eq!(run.status, PipelineStatus::Completed);
        assert!(run.stages.iter().all(|s| s.progress == 100.0));
        assert!(run.check_invariants().is_ok());
    }

    #[test]
    fn test_reset_keeps_log() {
        let mut run = begun();
        run.apply(Transition::Log(LogEntry::info("Starting pipeline...")))
            .unwrap();
        complete(&mut run, StageId::Transcription);

        run.apply(Transition::Reset).unwrap();
        assert_eq!(run.log.len(), 1);
        assert_eq!(
            PipelineRun {
                log: Vec::new(),
                ..run.clone()
            },
            PipelineRun::new()
        );

        run.apply(Transition::ClearLog).unwrap();
        assert_eq!(run, PipelineRun::new());
    }

    #[test]
    fn test_invariant_detects_gap() {
        let mut run = begun();
        run.stages[2].status = StageStatus::Completed;
        run.stages[2].progress = 100.0;
        assert!(run.check_invariants().is_err());
    }

    #[test]
    fn test_log_filter() {
        let mut run = PipelineRun::new();
        run.apply(Transition::Log(LogEntry::info("a"))).unwrap();
        run.apply(Transition::Log(LogEntry::error("b"))).unwrap();
        assert_eq!(run.log_at(LogLevel::Error).count(), 1);
    }
}
