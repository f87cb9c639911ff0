//! Remote processing backend abstraction.
//!
//! This module provides the `PipelineBackend` and `WorkCatalog` traits the
//! orchestrator drives, plus an HTTP implementation that consumes the
//! processing push-stream as Server-Sent Events.

mod http;
mod sse;
mod types;

pub use http::HttpBackend;
pub use sse::{SseDecoder, SseFrame};
pub use types::*;
