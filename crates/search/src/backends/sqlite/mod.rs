//! SQLite backend implementation.
//!
//! A relational backend that supports every expression kind. It runs
//! in-memory (for tests) or on a file.
//!
//! # Example
//!
//! ```no_run
//! use helios_search::backends::sqlite::SqliteBackend;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::in_memory()?;
//! backend.init_schema()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! ```sql
//! -- Every stored version; superseded versions have is_history = 1
//! CREATE TABLE resources (
//!     surrogate_id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     resource_type TEXT NOT NULL,
//!     resource_id TEXT NOT NULL,
//!     version_id TEXT NOT NULL,
//!     raw TEXT NOT NULL,
//!     request_method TEXT NOT NULL,
//!     request_uri TEXT NOT NULL,
//!     last_updated TEXT NOT NULL,
//!     is_deleted INTEGER NOT NULL DEFAULT 0,
//!     is_history INTEGER NOT NULL DEFAULT 0,
//!     index_data TEXT NOT NULL DEFAULT '{}'
//! );
//!
//! -- One row per component of every index entry
//! CREATE TABLE search_index (
//!     resource_surrogate_id INTEGER NOT NULL,
//!     param_name TEXT NOT NULL,
//!     composite_group INTEGER NOT NULL,
//!     component_index INTEGER NOT NULL,
//!     value_string TEXT,
//!     -- ... one column per indexed field
//! );
//!
//! CREATE TABLE compartment_assignment (
//!     resource_surrogate_id INTEGER NOT NULL,
//!     compartment_type TEXT NOT NULL,
//!     compartment_id TEXT NOT NULL
//! );
//! ```

mod backend;
mod generator;
mod schema;
mod search_impl;
mod storage;

pub use backend::{SqliteBackend, SqliteBackendConfig};
pub use generator::{SqlFragment, SqlGenerator, SqlParam};
pub use search_impl::SqlitePlan;
