//! # Contracts
//!
//! Frozen interface contracts shared by every CineSum crate.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Run Model
//! - A run walks the fixed stage order in [`StageId::ALL`]
//! - [`PipelineRun`] is the single aggregate; all mutation goes through [`PipelineRun::apply`]
//! - Observers see [`PipelineEvent`]s and cloned snapshots, never the live aggregate

mod blueprint;
mod error;
mod event;
mod log;
mod run;
mod sink;
mod stage;
mod tool;

pub use blueprint::*;
pub use error::*;
pub use event::*;
pub use log::*;
pub use run::*;
pub use sink::*;
pub use stage::*;
pub use tool::*;
