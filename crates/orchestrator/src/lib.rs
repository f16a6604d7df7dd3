//! # Orchestrator
//!
//! Pipeline 运行引擎。
//!
//! 负责：
//! - 按固定顺序串行执行五个 stage
//! - 发布 stage 状态、进度、日志事件
//! - start / reset / cancel / clear_log 操作
//! - 单 stage 超时与协作式取消
//!
//! ## 使用示例
//!
//! ```ignore
//! use orchestrator::Orchestrator;
//!
//! let orchestrator = Orchestrator::new(tools, blueprint.pipeline, blueprint.orchestrator)?;
//! let mut events = orchestrator.subscribe();
//!
//! orchestrator.start(Some(MediaInput::new("talk.mp4")))?;
//! let status = orchestrator.wait().await;
//! ```

mod orchestrator;
mod runner;
mod shared;

// Re-exports
pub use contracts::{MediaInput, PipelineEvent, PipelineRun, PipelineStatus};
pub use orchestrator::Orchestrator;
