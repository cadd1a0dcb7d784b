//! Record storage for the table store backend.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{ResourceKey, ResourceStore};
use crate::error::{BackendError, StorageError, StorageResult};
use crate::types::{
    CompartmentAssignment, RequestMethod, ResourceRecord, ResourceRequest, SearchIndexEntry,
};

use super::backend::TableStoreBackend;
use super::client::TableClient;
use super::entity::{EntityValue, TableEntity, properties};
use super::generator::{index_prefix, index_property};

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexData {
    #[serde(default)]
    search_indices: Vec<SearchIndexEntry>,
    #[serde(default)]
    compartments: Vec<CompartmentAssignment>,
}

/// Row key of a superseded version.
pub(super) fn history_row_key(id: &str, version_id: &str) -> String {
    format!("{}_{}", id, version_id)
}

fn malformed(entity: &TableEntity, property: &str) -> StorageError {
    StorageError::Backend(BackendError::SerializationError {
        message: format!(
            "entity {}/{} has a missing or malformed {}",
            entity.partition_key, entity.row_key, property
        ),
    })
}

fn string_property(entity: &TableEntity, property: &str) -> StorageResult<String> {
    entity
        .get(property)
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| malformed(entity, property))
}

fn bool_property(entity: &TableEntity, property: &str) -> StorageResult<bool> {
    entity
        .get(property)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| malformed(entity, property))
}

/// Flattens a record into a live entity.
pub(super) fn record_to_entity(record: &ResourceRecord) -> StorageResult<TableEntity> {
    let index_data = serde_json::to_string(&IndexData {
        search_indices: record.search_indices.clone(),
        compartments: record.compartments.clone(),
    })?;

    let mut entity = TableEntity::new(&record.resource_type, &record.resource_id)
        .with(
            properties::RESOURCE_ID,
            EntityValue::String(record.resource_id.clone()),
        )
        .with(
            properties::VERSION_ID,
            EntityValue::String(record.version_id.clone()),
        )
        .with(
            properties::RAW_RESOURCE,
            EntityValue::String(serde_json::to_string(&record.raw_resource)?),
        )
        .with(
            properties::REQUEST_METHOD,
            EntityValue::String(record.request.method.as_str().to_string()),
        )
        .with(
            properties::REQUEST_URI,
            EntityValue::String(record.request.uri.clone()),
        )
        .with(
            properties::LAST_MODIFIED,
            EntityValue::DateTime(record.last_modified),
        )
        .with(properties::IS_DELETED, EntityValue::Bool(record.is_deleted))
        .with(properties::IS_HISTORY, EntityValue::Bool(false))
        .with(properties::INDEX_DATA, EntityValue::String(index_data));

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for entry in &record.search_indices {
        let position = seen.entry(entry.parameter.as_str()).or_insert(0);
        let prefix = index_prefix(&entry.parameter, *position);
        *position += 1;

        for (component_index, component) in entry.components.iter().enumerate() {
            let component_index = entry.is_composite().then_some(component_index);
            for (field, value) in component.iter() {
                entity.properties.insert(
                    index_property(&prefix, component_index, field),
                    EntityValue::from(value),
                );
            }
        }
    }

    Ok(entity)
}

/// Rebuilds a record from an entity.
pub(super) fn entity_to_record(entity: &TableEntity) -> StorageResult<ResourceRecord> {
    let method = string_property(entity, properties::REQUEST_METHOD)?;
    let method =
        RequestMethod::parse(&method).ok_or_else(|| malformed(entity, properties::REQUEST_METHOD))?;
    let last_modified = entity
        .get(properties::LAST_MODIFIED)
        .and_then(|v| v.as_datetime())
        .ok_or_else(|| malformed(entity, properties::LAST_MODIFIED))?;
    let index: IndexData =
        serde_json::from_str(&string_property(entity, properties::INDEX_DATA)?)?;

    Ok(ResourceRecord {
        resource_type: entity.partition_key.clone(),
        resource_id: string_property(entity, properties::RESOURCE_ID)?,
        version_id: string_property(entity, properties::VERSION_ID)?,
        raw_resource: serde_json::from_str(&string_property(entity, properties::RAW_RESOURCE)?)?,
        request: ResourceRequest::new(method, string_property(entity, properties::REQUEST_URI)?),
        last_modified,
        is_deleted: bool_property(entity, properties::IS_DELETED)?,
        is_history: bool_property(entity, properties::IS_HISTORY)?,
        search_indices: index.search_indices,
        compartments: index.compartments,
    })
}

#[async_trait]
impl<C: TableClient> ResourceStore for TableStoreBackend<C> {
    async fn get(&self, key: &ResourceKey) -> StorageResult<Option<ResourceRecord>> {
        let Some(version_id) = &key.version_id else {
            return self
                .client()
                .get_entity(&key.resource_type, &key.id)
                .await?
                .map(|e| entity_to_record(&e))
                .transpose();
        };

        let history_key = history_row_key(&key.id, version_id);
        if let Some(entity) = self
            .client()
            .get_entity(&key.resource_type, &history_key)
            .await?
        {
            return entity_to_record(&entity).map(Some);
        }

        // The requested version may still be the current one.
        match self.client().get_entity(&key.resource_type, &key.id).await? {
            Some(entity) => {
                let record = entity_to_record(&entity)?;
                Ok((&record.version_id == version_id).then_some(record))
            }
            None => Ok(None),
        }
    }

    async fn upsert(&self, record: ResourceRecord, keep_history: bool) -> StorageResult<()> {
        if keep_history {
            if let Some(mut current) = self
                .client()
                .get_entity(&record.resource_type, &record.resource_id)
                .await?
            {
                let version_id = string_property(&current, properties::VERSION_ID)?;
                current.row_key = history_row_key(&record.resource_id, &version_id);
                current
                    .properties
                    .insert(properties::IS_HISTORY.to_string(), EntityValue::Bool(true));
                self.client().insert_or_replace(current).await?;
            }
        }

        self.client()
            .insert_or_replace(record_to_entity(&record)?)
            .await?;

        tracing::debug!(
            resource = %record.versioned_url(),
            keep_history,
            "Stored resource entity"
        );
        Ok(())
    }
}
