//! Command implementations.

mod info;
mod run;
mod stages;
mod validate;

pub use info::run_info;
pub use run::run_pipeline;
pub use stages::run_stages;
pub use validate::run_validate;
