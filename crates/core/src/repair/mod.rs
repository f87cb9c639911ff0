//! Repair of items whose stored output is broken.
//!
//! [`Repairer`] performs one-shot repairs and is shared with the processing
//! scheduler. [`RepairScheduler`] runs its own bounded pool with a fixed
//! stagger between launches, independent of the processing pool's limit.

mod config;
mod runner;
mod types;

pub use config::RepairConfig;
pub use runner::{RepairScheduler, Repairer, REPAIR_POOL};
pub use types::{RepairError, RepairOutcome, RepairSummary};
