//! Table store client abstraction.
//!
//! [`TableClient`] is the narrow set of primitives the backend needs from a
//! partitioned key/value table service: point reads, insert-or-replace and a
//! segmented filtered query. [`MemoryTableClient`] implements it in memory.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;

use super::entity::TableEntity;
use super::filter::TableFilter;

/// Native continuation of a segmented query: the key to resume from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableContinuation {
    pub next_partition_key: String,
    pub next_row_key: String,
}

/// One segment of a query.
#[derive(Debug, Clone, Default)]
pub struct TableSegment {
    pub entities: Vec<TableEntity>,
    /// Where the next segment starts; `None` once the table is exhausted.
    /// A continuation does not promise that another entity matches.
    pub continuation: Option<TableContinuation>,
}

/// Primitives of a partitioned table service.
#[async_trait]
pub trait TableClient: Send + Sync {
    /// Reads one entity by key.
    async fn get_entity(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> StorageResult<Option<TableEntity>>;

    /// Inserts an entity, replacing any entity with the same key.
    async fn insert_or_replace(&self, entity: TableEntity) -> StorageResult<()>;

    /// Runs a filtered query, returning at most `take` entities in key order.
    ///
    /// `select` projects the returned properties; `continuation` resumes a
    /// previous segment.
    async fn query_segmented(
        &self,
        filter: Option<&TableFilter>,
        take: usize,
        select: Option<&[String]>,
        continuation: Option<&TableContinuation>,
    ) -> StorageResult<TableSegment>;
}

/// In-memory table ordered by `(PartitionKey, RowKey)`.
///
/// Each segment scans at most `segment_size` entities, like a remote service
/// that returns partial segments.
#[derive(Debug, Clone)]
pub struct MemoryTableClient {
    entities: Arc<RwLock<BTreeMap<(String, String), TableEntity>>>,
    segment_size: usize,
}

impl Default for MemoryTableClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTableClient {
    /// Default maximum number of entities scanned per segment.
    pub const DEFAULT_SEGMENT_SIZE: usize = 1000;

    pub fn new() -> Self {
        Self::with_segment_size(Self::DEFAULT_SEGMENT_SIZE)
    }

    pub fn with_segment_size(segment_size: usize) -> Self {
        Self {
            entities: Arc::new(RwLock::new(BTreeMap::new())),
            segment_size: segment_size.max(1),
        }
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }
}

#[async_trait]
impl TableClient for MemoryTableClient {
    async fn get_entity(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> StorageResult<Option<TableEntity>> {
        let entities = self.entities.read();
        Ok(entities
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned())
    }

    async fn insert_or_replace(&self, entity: TableEntity) -> StorageResult<()> {
        let key = (entity.partition_key.clone(), entity.row_key.clone());
        self.entities.write().insert(key, entity);
        Ok(())
    }

    async fn query_segmented(
        &self,
        filter: Option<&TableFilter>,
        take: usize,
        select: Option<&[String]>,
        continuation: Option<&TableContinuation>,
    ) -> StorageResult<TableSegment> {
        let entities = self.entities.read();
        let start = continuation
            .map(|c| (c.next_partition_key.clone(), c.next_row_key.clone()))
            .unwrap_or_default();
        let matches = |e: &TableEntity| filter.is_none_or(|f| f.matches(e));

        let mut segment = TableSegment::default();
        let mut scanned = 0;
        let mut iter = entities.range(start..);
        for (_, entity) in iter.by_ref() {
            scanned += 1;
            if matches(entity) {
                let entity = match select {
                    Some(columns) => entity.clone().project(columns),
                    None => entity.clone(),
                };
                segment.entities.push(entity);
            }
            if segment.entities.len() >= take || scanned >= self.segment_size {
                break;
            }
        }

        // Resume at the next unscanned entity; it may not match.
        segment.continuation = iter
            .next()
            .map(|((pk, rk), _)| TableContinuation {
                next_partition_key: pk.clone(),
                next_row_key: rk.clone(),
            });

        Ok(segment)
    }
}
