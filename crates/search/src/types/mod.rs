//! Record types shared by the backends.
//!
//! - [`ResourceRecord`] - one stored version of a resource
//! - [`SearchIndexEntry`], [`IndexComponent`] - pre-extracted search values
//! - [`CompartmentAssignment`] - compartment membership

mod resource_record;
mod search_index;

pub use resource_record::{RequestMethod, ResourceRecord, ResourceRequest};
pub use search_index::{CompartmentAssignment, IndexComponent, SearchIndexEntry};
