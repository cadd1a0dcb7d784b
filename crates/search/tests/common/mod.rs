//! Shared test infrastructure for the search layer.
//!
//! Fixtures build indexed [`ResourceRecord`]s; the harness pages through
//! searches on any backend.

#![allow(dead_code)]

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::*;
