//! Record retrieval and write primitives.
//!
//! Backends persist [`ResourceRecord`]s and hand them back to the search
//! layer. Writes keep at most one live row per resource; older versions stay
//! addressable as history rows when the caller asks for it.

use std::fmt;

use async_trait::async_trait;

use crate::error::{ResourceError, StorageResult};
use crate::types::ResourceRecord;

/// Identifies a resource, optionally at a specific version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub resource_type: String,
    pub id: String,
    pub version_id: Option<String>,
}

impl ResourceKey {
    /// Key of the current version.
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version_id: None,
        }
    }

    /// Key of a specific version.
    pub fn versioned(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        version_id: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version_id: Some(version_id.into()),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version_id {
            Some(v) => write!(f, "{}/{}/_history/{}", self.resource_type, self.id, v),
            None => write!(f, "{}/{}", self.resource_type, self.id),
        }
    }
}

/// Stores and retrieves resource records.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetches a record.
    ///
    /// Without a version, returns the live row (which may be a deletion
    /// tombstone). With a version, returns that version whether it is stored
    /// as a history row or is the live row.
    async fn get(&self, key: &ResourceKey) -> StorageResult<Option<ResourceRecord>>;

    /// Writes `record` as the live version of its resource.
    ///
    /// With `keep_history` the previous live version is kept as a history
    /// row; otherwise it is overwritten.
    async fn upsert(&self, record: ResourceRecord, keep_history: bool) -> StorageResult<()>;

    /// Like [`get`](Self::get), but a missing record is an error.
    async fn read(&self, key: &ResourceKey) -> StorageResult<ResourceRecord> {
        self.get(key).await?.ok_or_else(|| {
            let resource_type = key.resource_type.clone();
            let id = key.id.clone();
            match &key.version_id {
                Some(version_id) => ResourceError::VersionNotFound {
                    resource_type,
                    id,
                    version_id: version_id.clone(),
                },
                None => ResourceError::NotFound { resource_type, id },
            }
            .into()
        })
    }
}
