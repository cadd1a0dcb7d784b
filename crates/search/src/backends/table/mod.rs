//! Table store backend implementation.
//!
//! A partitioned key/value table (partition key, row key, flat typed
//! properties) with no joins and no secondary indexes. Each resource is one
//! entity:
//!
//! | Property | Content |
//! |----------|---------|
//! | `PartitionKey` | resource type |
//! | `RowKey` | resource id, or `<id>_<version>` for superseded versions |
//! | `ResourceId`, `VersionId` | identity |
//! | `RawResource` | resource JSON |
//! | `RequestMethod`, `RequestUri` | originating request |
//! | `LastModified` | last update time |
//! | `IsDeleted`, `IsHistory` | version state |
//! | `IndexData` | index entries and compartments as JSON |
//! | `s_<param>_<n>[_<component>]_<field>` | flattened index values |
//!
//! Only filters over these properties can be expressed: chained searches,
//! missing checks, compartments and most string operators are reported as
//! unsupported.
//!
//! # Example
//!
//! ```
//! use helios_search::backends::table::TableStoreBackend;
//! use helios_search::{CapabilityProvider, ExpressionKind};
//!
//! let backend = TableStoreBackend::in_memory();
//! assert!(!backend.capabilities().supports(ExpressionKind::Chained));
//! ```

mod backend;
mod client;
mod entity;
mod filter;
mod generator;
mod search_impl;
mod storage;

pub use backend::{TableStoreBackend, TableStoreConfig};
pub use client::{MemoryTableClient, TableClient, TableContinuation, TableSegment};
pub use entity::{EntityValue, TableEntity, properties};
pub use filter::{Comparator, TableFilter};
pub use generator::{TableGenerator, index_prefix, index_property};
pub use search_impl::TablePlan;

/// Backend name reported in errors and continuation tokens.
pub(crate) const BACKEND_NAME: &str = "table-store";
