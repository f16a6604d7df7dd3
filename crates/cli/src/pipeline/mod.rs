//! Pipeline wiring for the `run` command.

mod runner;
mod stats;

pub use runner::{Pipeline, RunOptions};
pub use stats::PipelineStats;
