//! Run orchestration modules.
//!
//! Covers working-directory preparation, the per-run log tail monitor, and
//! the [`Factory`](factory::Factory) that drives project lifecycles.

pub mod factory;
pub mod log_monitor;
pub mod workspace;
