//! # Stage Adapters
//!
//! Stage tool implementations behind the `StageTool` contract.
//!
//! Responsibilities:
//! - Simulated tools reproducing the demo timing and log lines
//! - External command tools speaking a line-oriented progress protocol
//! - Adapter-level retry with exponential backoff
//! - Building a complete `ToolSet` from `ToolsConfig`
//!
//! ## Usage Example
//!
//! ```ignore
//! use adapters::build_toolset;
//!
//! let tools = build_toolset(&blueprint.tools)?;
//! let orchestrator = Orchestrator::new(tools, blueprint.pipeline, blueprint.orchestrator)?;
//! ```
//!
//! ## Scripted Testing
//!
//! ```ignore
//! use adapters::ScriptedTool;
//!
//! let tool = ScriptedTool::new("summarizer").fail("connection refused");
//! ```

mod command;
mod error;
mod factory;
mod retry;
mod scripted;
mod simulated;

// Re-exports
pub use command::{parse_line, CommandTool, ToolLine};
pub use error::{AdapterError, Result};
pub use factory::build_toolset;
pub use retry::{RetryPolicy, RetryTool};
pub use scripted::ScriptedTool;
pub use simulated::{canned_logs, SimulatedTool};
