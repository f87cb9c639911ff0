//! Single-item processor.
//!
//! This module provides the `ItemProcessor` which owns the lifecycle of one
//! item's remote pipeline run:
//! - Status check: which stages are already done
//! - Initiation: ask the backend to run the outstanding stages
//! - Streaming: consume the push-stream until a terminal signal
//!
//! Completion can be decided several ways (see [`CompletionSource`]); every
//! raw stream event goes through [`classify`] first.
//!
//! # Example
//!
//! ```ignore
//! use docflow_core::processor::{ItemProcessor, ProcessorConfig};
//!
//! let processor = ItemProcessor::new(backend, ProcessorConfig::default(), events, controller);
//! match processor.process(&item).await? {
//!     RunOutcome::Completed { persistent_id, source } => println!("done via {:?}", source),
//!     RunOutcome::Unresolved { .. } => println!("no terminal event"),
//!     RunOutcome::AlreadyRunning => {}
//! }
//! ```

mod classify;
mod config;
mod runner;
mod types;

pub use classify::{classify, Completion, ProgressUpdate, Signal, PUBLISH_PENDING_STATUS};
pub use config::{FallbackPolicy, ProcessorConfig};
pub use runner::ItemProcessor;
pub use types::{CompletionSource, ProcessError, ProcessorState, RunOutcome};
