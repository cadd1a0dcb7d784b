//! Search orchestration.
//!
//! - [`SearchService`] - runs a search against a backend and wraps the result
//! - [`SearchBackend`] - the compile/execute contract every backend implements
//! - [`QueryContext`] - the accumulator generators thread through a traversal
//! - [`continuation`] - the opaque continuation token codec

mod backend;
pub mod context;
pub mod continuation;
mod service;

pub use backend::{CompileRequest, QueryOutcome, SearchBackend, SearchMode};
pub use context::{Combinable, FieldOverride, QueryContext};
pub use continuation::TokenSigner;
pub use service::{
    RecordStream, SearchOptions, SearchResult, SearchService, UnsupportedParameter,
};
