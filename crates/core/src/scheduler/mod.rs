//! Concurrent scheduler: discovery rounds plus a bounded processing pool.
//!
//! # Example
//!
//! ```ignore
//! use docflow_core::scheduler::{ConcurrentScheduler, SchedulerConfig};
//!
//! let scheduler = ConcurrentScheduler::new(config, catalog, processor, repairer, events, controller);
//! let summary = scheduler.run().await?;
//! println!("{} completed in {} rounds", summary.counters.completed, summary.rounds);
//! ```

mod config;
mod discovery;
mod runner;
mod types;

pub use config::SchedulerConfig;
pub use discovery::{looks_inconsistent, DiscoveryReport};
pub use runner::{ConcurrentScheduler, PROCESSING_POOL};
pub use types::{Candidate, RunSummary, SchedulerError, SchedulerStatus};
