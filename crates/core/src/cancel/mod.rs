//! Cancellation: stop signal, connection table and active-run counters.

mod controller;
mod counter;
mod registry;

pub use controller::CancellationController;
pub use counter::{ActiveCounter, ActiveGuard};
pub use registry::{ConnectionHandle, ConnectionRegistry};
