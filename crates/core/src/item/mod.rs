//! Work items, pipeline stages and per-run progress records.

mod identifiers;
mod types;

pub use identifiers::IdentifierMap;
pub use types::*;
