//! Error types for CLI operations.

use std::path::Path;

use contracts::PipelineStatus;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Media file not found
    #[error("Input file not found: {path}")]
    InputNotFound { path: String },

    /// The run ended in a failed stage
    #[error("Pipeline failed at {stage}: {reason}")]
    PipelineFailed { stage: String, reason: String },

    /// The run did not reach a terminal status
    #[error("Pipeline ended unexpectedly with status {status}")]
    PipelineIncomplete { status: PipelineStatus },
}

impl CliError {
    pub fn config_not_found(path: &Path) -> Self {
        Self::ConfigNotFound {
            path: path.display().to_string(),
        }
    }

    pub fn input_not_found(path: &Path) -> Self {
        Self::InputNotFound {
            path: path.display().to_string(),
        }
    }

    pub fn pipeline_failed(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PipelineFailed {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}
