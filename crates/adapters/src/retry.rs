//! Adapter-level retry.
//!
//! Wraps any stage tool and re-runs it after transient failures with
//! exponential backoff. Cancellation is never retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use contracts::{
    CommandSpec, ContractError, DynStageTool, LogLevel, ProgressReporter, StageInput, StageOutput,
    StageTool,
};
use tracing::{info, warn};

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff before the first retry (doubles per attempt)
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
        }
    }

    /// Policy described by a command entry
    pub fn from_spec(spec: &CommandSpec) -> Self {
        Self::new(spec.retries, Duration::from_millis(spec.retry_backoff_ms))
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

/// Stage tool that retries its inner tool
pub struct RetryTool {
    name: String,
    inner: Arc<dyn DynStageTool>,
    policy: RetryPolicy,
    attempts: AtomicU32,
}

impl RetryTool {
    pub fn new(inner: Arc<dyn DynStageTool>, policy: RetryPolicy) -> Self {
        let name = format!("retry({})", inner.tool_name());
        Self {
            name,
            inner,
            policy,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Total attempts made across all invocations.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for RetryTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryTool")
            .field("inner", &self.inner.tool_name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl StageTool for RetryTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        input: StageInput,
        progress: ProgressReporter,
    ) -> Result<StageOutput, ContractError> {
        let mut retry = 0;
        loop {
            self.attempts.fetch_add(1, Ordering::AcqRel);
            let err = match self
                .inner
                .run_boxed(input.clone(), progress.clone())
                .await
            {
                Ok(output) => {
                    if retry > 0 {
                        info!(tool = %self.name, retries = retry, "tool succeeded after retry");
                    }
                    return Ok(output);
                }
                Err(err) => err,
            };

            if err.is_cancelled() || retry >= self.policy.max_retries {
                return Err(err);
            }

            retry += 1;
            let backoff = self.policy.backoff(retry);
            warn!(
                tool = %self.name,
                error = %err,
                retry,
                backoff_ms = backoff.as_millis() as u64,
                "tool failed, retrying"
            );
            progress.log(
                LogLevel::Warn,
                format!(
                    "Attempt {} failed: {}. Retrying in {}ms ({}/{})...",
                    retry,
                    err.stage_detail(),
                    backoff.as_millis(),
                    retry,
                    self.policy.max_retries
                ),
            );

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = progress.cancelled() => {
                    return Err(ContractError::Cancelled { stage: progress.stage() });
                }
            }
        }
    }
}
