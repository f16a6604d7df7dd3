//! Scripted stage tool
//!
//! Deterministic tool for tests and dry runs: fixed progress steps, fixed log
//! lines, and a scripted outcome.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use contracts::{
    ContractError, LogLevel, ProgressReporter, StageInput, StageOutput, StageTool,
};
use serde_json::Value;

#[derive(Debug, Clone)]
enum Outcome {
    Succeed,
    Fail(String),
    /// Fail the first `times` calls, then succeed
    FailTimes { times: u32, message: String },
    /// Block until cancelled
    Hang,
}

/// Scripted stage tool
#[derive(Debug)]
pub struct ScriptedTool {
    name: String,
    steps: Vec<f64>,
    step_delay: Duration,
    logs: Vec<(LogLevel, String)>,
    payload: Option<Value>,
    outcome: Outcome,
    calls: AtomicU32,
    inputs: Mutex<Vec<StageInput>>,
}

impl ScriptedTool {
    /// Tool that reports 50% and succeeds
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: vec![50.0],
            step_delay: Duration::ZERO,
            logs: Vec::new(),
            payload: None,
            outcome: Outcome::Succeed,
            calls: AtomicU32::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Progress values reported in order
    pub fn with_steps(mut self, steps: impl Into<Vec<f64>>) -> Self {
        self.steps = steps.into();
        self
    }

    /// Sleep before each progress step
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Log line emitted at the start of every call
    pub fn with_log(mut self, level: LogLevel, message: impl Into<String>) -> Self {
        self.logs.push((level, message.into()));
        self
    }

    /// Payload returned on success
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Fail every call with `message`
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.outcome = Outcome::Fail(message.into());
        self
    }

    /// Fail the first `times` calls with `message`
    pub fn fail_times(mut self, times: u32, message: impl Into<String>) -> Self {
        self.outcome = Outcome::FailTimes {
            times,
            message: message.into(),
        };
        self
    }

    /// Report the steps, then block until the run is cancelled
    pub fn hang(mut self) -> Self {
        self.outcome = Outcome::Hang;
        self
    }

    /// Number of calls so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Acquire)
    }

    /// Inputs received so far, in call order
    pub fn inputs(&self) -> Vec<StageInput> {
        self.inputs
            .lock()
            .map(|inputs| inputs.clone())
            .unwrap_or_default()
    }
}

impl StageTool for ScriptedTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        input: StageInput,
        progress: ProgressReporter,
    ) -> Result<StageOutput, ContractError> {
        let call = self.calls.fetch_add(1, Ordering::AcqRel) + 1;
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push(input);
        }

        for (level, message) in &self.logs {
            progress.log(*level, message.clone());
        }

        for step in &self.steps {
            if !self.step_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.step_delay) => {}
                    _ = progress.cancelled() => {}
                }
            }
            progress.report(*step)?;
        }

        match &self.outcome {
            Outcome::Succeed => {}
            Outcome::Fail(message) => {
                return Err(ContractError::stage_failure(progress.stage(), message.clone()));
            }
            Outcome::FailTimes { times, message } if call <= *times => {
                return Err(ContractError::stage_failure(progress.stage(), message.clone()));
            }
            Outcome::FailTimes { .. } => {}
            Outcome::Hang => {
                progress.cancelled().await;
                progress.checkpoint()?;
            }
        }

        Ok(StageOutput {
            payload: self.payload.clone(),
        })
    }
}
