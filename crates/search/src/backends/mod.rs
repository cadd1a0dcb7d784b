//! Search backend implementations.
//!
//! | Backend | Feature | Expressible |
//! |---------|---------|-------------|
//! | SQLite | `sqlite` | every expression kind |
//! | Table store | always | parameters, binary, exact strings, and/or |
//!
//! Both implement [`SearchBackend`](crate::search::SearchBackend),
//! [`ResourceStore`](crate::core::ResourceStore) and
//! [`CapabilityProvider`](crate::core::CapabilityProvider).

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub mod table;
