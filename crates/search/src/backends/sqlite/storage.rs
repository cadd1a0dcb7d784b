//! Record storage for the SQLite backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, Transaction, params, params_from_iter};
use serde::{Deserialize, Serialize};

use crate::core::{ResourceKey, ResourceStore};
use crate::error::{BackendError, StorageError, StorageResult};
use crate::types::{
    CompartmentAssignment, RequestMethod, ResourceRecord, ResourceRequest, SearchIndexEntry,
};

use super::SqliteBackend;
use super::generator::{SqlParam, format_timestamp, index_column};

/// Search index entries and compartments, kept alongside the row so a record
/// can be rebuilt without re-reading the index tables.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexData {
    #[serde(default)]
    search_indices: Vec<SearchIndexEntry>,
    #[serde(default)]
    compartments: Vec<CompartmentAssignment>,
}

/// Columns selected for a record, qualified with `alias`.
pub(super) fn record_columns(alias: &str) -> String {
    [
        "surrogate_id",
        "resource_type",
        "resource_id",
        "version_id",
        "raw",
        "request_method",
        "request_uri",
        "last_updated",
        "is_deleted",
        "is_history",
        "index_data",
    ]
    .iter()
    .map(|c| format!("{}.{}", alias, c))
    .collect::<Vec<_>>()
    .join(", ")
}

/// A `resources` row as read, before decoding.
pub(super) struct RawRecord {
    pub surrogate_id: i64,
    resource_type: String,
    resource_id: String,
    version_id: String,
    raw: String,
    request_method: String,
    request_uri: String,
    last_updated: String,
    is_deleted: bool,
    is_history: bool,
    index_data: String,
}

impl RawRecord {
    pub(super) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            surrogate_id: row.get(0)?,
            resource_type: row.get(1)?,
            resource_id: row.get(2)?,
            version_id: row.get(3)?,
            raw: row.get(4)?,
            request_method: row.get(5)?,
            request_uri: row.get(6)?,
            last_updated: row.get(7)?,
            is_deleted: row.get(8)?,
            is_history: row.get(9)?,
            index_data: row.get(10)?,
        })
    }

    pub(super) fn into_record(self) -> StorageResult<ResourceRecord> {
        let method = RequestMethod::parse(&self.request_method).ok_or_else(|| {
            StorageError::Backend(BackendError::SerializationError {
                message: format!("unknown request method '{}'", self.request_method),
            })
        })?;
        let last_modified = DateTime::parse_from_rfc3339(&self.last_updated)
            .map_err(|e| {
                StorageError::Backend(BackendError::SerializationError {
                    message: format!("invalid timestamp '{}': {}", self.last_updated, e),
                })
            })?
            .with_timezone(&Utc);
        let index: IndexData = serde_json::from_str(&self.index_data)?;

        Ok(ResourceRecord {
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            version_id: self.version_id,
            raw_resource: serde_json::from_str(&self.raw)?,
            request: ResourceRequest::new(method, self.request_uri),
            last_modified,
            is_deleted: self.is_deleted,
            is_history: self.is_history,
            search_indices: index.search_indices,
            compartments: index.compartments,
        })
    }
}

/// Inserts `record` as a live row with its index and compartment rows.
fn insert_record(tx: &Transaction<'_>, record: &ResourceRecord) -> StorageResult<i64> {
    let index_data = serde_json::to_string(&IndexData {
        search_indices: record.search_indices.clone(),
        compartments: record.compartments.clone(),
    })?;

    tx.execute(
        "INSERT INTO resources (resource_type, resource_id, version_id, raw, request_method,
            request_uri, last_updated, is_deleted, is_history, index_data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
        params![
            record.resource_type,
            record.resource_id,
            record.version_id,
            serde_json::to_string(&record.raw_resource)?,
            record.request.method.as_str(),
            record.request.uri,
            format_timestamp(&record.last_modified),
            record.is_deleted,
            index_data,
        ],
    )?;
    let surrogate_id = tx.last_insert_rowid();

    for (group, entry) in record.search_indices.iter().enumerate() {
        for (component_index, component) in entry.components.iter().enumerate() {
            let mut columns = vec![
                "resource_surrogate_id".to_string(),
                "param_name".to_string(),
                "composite_group".to_string(),
                "component_index".to_string(),
            ];
            let mut values = vec![
                SqlParam::Integer(surrogate_id),
                SqlParam::string(entry.parameter.as_str()),
                SqlParam::Integer(group as i64),
                SqlParam::Integer(component_index as i64),
            ];
            for (field, value) in component.iter() {
                columns.push(index_column(field));
                values.push(SqlParam::from_value(value));
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            tx.execute(
                &format!(
                    "INSERT INTO search_index ({}) VALUES ({})",
                    columns.join(", "),
                    placeholders
                ),
                params_from_iter(values.iter()),
            )?;
        }
    }

    for compartment in &record.compartments {
        tx.execute(
            "INSERT INTO compartment_assignment (resource_surrogate_id, compartment_type, compartment_id)
             VALUES (?1, ?2, ?3)",
            params![
                surrogate_id,
                compartment.compartment_type,
                compartment.compartment_id
            ],
        )?;
    }

    Ok(surrogate_id)
}

#[async_trait]
impl ResourceStore for SqliteBackend {
    async fn get(&self, key: &ResourceKey) -> StorageResult<Option<ResourceRecord>> {
        let conn = self.get_connection()?;
        let columns = record_columns("r");

        let raw = match &key.version_id {
            None => conn
                .query_row(
                    &format!(
                        "SELECT {} FROM resources r
                         WHERE r.resource_type = ?1 AND r.resource_id = ?2 AND r.is_history = 0",
                        columns
                    ),
                    params![key.resource_type, key.id],
                    RawRecord::from_row,
                )
                .optional()?,
            Some(version_id) => conn
                .query_row(
                    &format!(
                        "SELECT {} FROM resources r
                         WHERE r.resource_type = ?1 AND r.resource_id = ?2 AND r.version_id = ?3
                         ORDER BY r.surrogate_id DESC LIMIT 1",
                        columns
                    ),
                    params![key.resource_type, key.id, version_id],
                    RawRecord::from_row,
                )
                .optional()?,
        };

        raw.map(RawRecord::into_record).transpose()
    }

    async fn upsert(&self, record: ResourceRecord, keep_history: bool) -> StorageResult<()> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        if keep_history {
            tx.execute(
                "UPDATE resources SET is_history = 1
                 WHERE resource_type = ?1 AND resource_id = ?2 AND is_history = 0",
                params![record.resource_type, record.resource_id],
            )?;
        } else {
            tx.execute(
                "DELETE FROM resources
                 WHERE resource_type = ?1 AND resource_id = ?2 AND is_history = 0",
                params![record.resource_type, record.resource_id],
            )?;
        }

        let surrogate_id = insert_record(&tx, &record)?;
        tx.commit()?;

        tracing::debug!(
            resource = %record.versioned_url(),
            surrogate_id,
            keep_history,
            "Stored resource version"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::FieldName;
    use crate::types::IndexComponent;
    use serde_json::json;

    fn backend() -> SqliteBackend {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.init_schema().unwrap();
        backend
    }

    fn patient(version: &str, family: &str) -> ResourceRecord {
        ResourceRecord::new(
            "Patient",
            "p1",
            version,
            json!({"resourceType": "Patient", "id": "p1", "name": [{"family": family}]}),
        )
        .with_index(SearchIndexEntry::single(
            "family",
            IndexComponent::new().with(FieldName::String, family),
        ))
        .with_compartment("Patient", "p1")
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let backend = backend();
        backend.upsert(patient("1", "Smith"), true).await.unwrap();

        let record = backend
            .get(&ResourceKey::new("Patient", "p1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.version_id, "1");
        assert_eq!(record.raw_resource["name"][0]["family"], "Smith");
        assert_eq!(record.search_indices.len(), 1);
        assert_eq!(record.compartments.len(), 1);
        assert!(!record.is_history);
    }

    #[tokio::test]
    async fn test_upsert_keeps_history() {
        let backend = backend();
        backend.upsert(patient("1", "Smith"), true).await.unwrap();
        backend.upsert(patient("2", "Jones"), true).await.unwrap();

        let current = backend
            .get(&ResourceKey::new("Patient", "p1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.version_id, "2");

        let old = backend
            .get(&ResourceKey::versioned("Patient", "p1", "1"))
            .await
            .unwrap()
            .unwrap();
        assert!(old.is_history);
        assert_eq!(old.raw_resource["name"][0]["family"], "Smith");

        let live_as_version = backend
            .get(&ResourceKey::versioned("Patient", "p1", "2"))
            .await
            .unwrap()
            .unwrap();
        assert!(!live_as_version.is_history);
    }

    #[tokio::test]
    async fn test_upsert_without_history_replaces() {
        let backend = backend();
        backend.upsert(patient("1", "Smith"), false).await.unwrap();
        backend.upsert(patient("2", "Jones"), false).await.unwrap();

        assert!(
            backend
                .get(&ResourceKey::versioned("Patient", "p1", "1"))
                .await
                .unwrap()
                .is_none()
        );

        let conn = backend.get_connection().unwrap();
        let index_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM search_index", [], |row| row.get(0))
            .unwrap();
        assert_eq!(index_rows, 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let backend = backend();
        assert!(
            backend
                .get(&ResourceKey::new("Patient", "nope"))
                .await
                .unwrap()
                .is_none()
        );
    }
}
