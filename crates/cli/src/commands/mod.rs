//! Command implementations.

mod common;
mod info;
mod reconcile;
mod run;
mod validate;

pub use info::run_info;
pub use reconcile::run_reconcile;
pub use run::run_pipeline;
pub use validate::run_validate;
