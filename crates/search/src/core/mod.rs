//! Storage-side traits consumed by the search layer.

mod capabilities;
mod storage;

pub use capabilities::{BackendCapabilities, CapabilityProvider};
pub use storage::{ResourceKey, ResourceStore};
