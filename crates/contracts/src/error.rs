//! Layered error definitions
//!
//! Categorized by source: config / state / stage / sink / general

use std::time::Duration;

use thiserror::Error;

use crate::StageId;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== State Errors =====
    /// Operation requested in a state that forbids it
    #[error("cannot {operation}: {reason}")]
    InvalidState { operation: String, reason: String },

    // ===== Stage Errors =====
    /// Stage tool reported failure
    #[error("stage '{stage}' failed: {message}")]
    StageFailure { stage: StageId, message: String },

    /// Run was cancelled while this stage was active
    #[error("stage '{stage}' cancelled")]
    Cancelled { stage: StageId },

    /// Stage exceeded its deadline
    #[error("stage '{stage}' timed out after {limit:?}")]
    Timeout { stage: StageId, limit: Duration },

    /// Tool adapter error (process spawn, protocol, ...)
    #[error("tool '{tool}' error: {message}")]
    Tool { tool: String, message: String },

    // ===== Sink Errors =====
    /// Event sink write failure
    #[error("sink '{sink}' write error: {message}")]
    SinkWrite { sink: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create invalid state error
    pub fn invalid_state(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create stage failure error
    pub fn stage_failure(stage: StageId, message: impl Into<String>) -> Self {
        Self::StageFailure {
            stage,
            message: message.into(),
        }
    }

    /// Create tool error
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// True for a cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Text recorded as the failed stage's `detail`.
    ///
    /// Tool failures keep the tool's own message verbatim; cancellation is
    /// always `"cancelled"` so callers can tell it apart from real errors.
    pub fn stage_detail(&self) -> String {
        match self {
            Self::Cancelled { .. } => "cancelled".to_string(),
            Self::StageFailure { message, .. } | Self::Tool { message, .. } => message.clone(),
            Self::Timeout { limit, .. } => format!("timed out after {limit:?}"),
            other => other.to_string(),
        }
    }
}
