//! Helios FHIR Server Search Layer
//!
//! This crate turns FHIR search requests into backend-native queries. A
//! search is parsed into a backend-independent [`Expression`] tree; each
//! backend ships a generator that walks the tree and emits its own query
//! form, rejecting the constructs it cannot express.
//!
//! # Features
//!
//! - **Expression IR**: parameters, comparisons, string matches, chains,
//!   missing checks, and/or combinations, compartments
//! - **Composite parameters**: `token$quantity` style values expand into
//!   component predicates bound to the same index entry
//! - **Multiple backends**: SQLite (everything) and a partitioned table
//!   store (a restricted subset)
//! - **Graceful degradation**: unsupported conjuncts are dropped and
//!   reported instead of failing the whole search
//! - **Opaque continuation tokens** bound to the backend and query
//!
//! # Architecture
//!
//! - [`expression`] - the expression tree, visitor and composite parsing
//! - [`search`] - compile context, continuation tokens, the [`SearchService`]
//! - [`backends`] - SQLite and table store generators and executors
//! - [`core`] - record storage and capability traits
//! - [`types`] - stored records and their index entries
//! - [`config`] - page size limits
//! - [`error`] - error types for all operations
//!
//! # Quick Start
//!
//! ```no_run
//! # #[cfg(feature = "sqlite")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use helios_search::backends::sqlite::SqliteBackend;
//! use helios_search::expression::{Expression, FieldName};
//! use helios_search::{SearchOptions, SearchService};
//! use tokio_util::sync::CancellationToken;
//!
//! let backend = SqliteBackend::in_memory()?;
//! backend.init_schema()?;
//! let service = SearchService::new(Arc::new(backend));
//!
//! let expr = Expression::search_parameter(
//!     "family",
//!     Expression::string_equals(FieldName::String, "Smith", true),
//! );
//! let result = service
//!     .search(Some(&expr), &SearchOptions::new().with_max_item_count(20), &CancellationToken::new())
//!     .await?;
//!
//! for record in result.records {
//!     println!("{}", record.versioned_url());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod error;
pub mod expression;
pub mod search;
pub mod types;

// Re-export commonly used types at crate root
pub use config::SearchConfig;
pub use error::{BackendError, ResourceError, SearchError, StorageError, StorageResult};
pub use expression::{Expression, ExpressionKind, ExpressionVisitor};
pub use types::{ResourceRecord, SearchIndexEntry};

// Re-export core traits
pub use core::{BackendCapabilities, CapabilityProvider, ResourceKey, ResourceStore};

// Re-export the search surface
pub use search::{
    CompileRequest, QueryOutcome, SearchBackend, SearchMode, SearchOptions, SearchResult,
    SearchService, UnsupportedParameter,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
