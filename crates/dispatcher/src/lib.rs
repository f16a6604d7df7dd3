//! # Dispatcher
//!
//! 事件分发模块。
//!
//! 负责：
//! - 消费 Orchestrator 的 `PipelineEvent` 流
//! - Fan-out 到多个 sinks
//! - 隔离慢 sink，不阻塞编排器

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod sinks;

pub use contracts::{EventSink, PipelineEvent};
pub use dispatcher::{create_dispatcher, Dispatcher, DispatcherBuilder, DispatcherConfig};
pub use error::DispatcherError;
pub use handle::SinkHandle;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use sinks::{FileSink, LogSink};
