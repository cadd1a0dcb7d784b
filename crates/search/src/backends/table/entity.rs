//! Table store entities.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::expression::SearchValue;

/// Reserved property names.
pub mod properties {
    pub const PARTITION_KEY: &str = "PartitionKey";
    pub const ROW_KEY: &str = "RowKey";
    pub const RESOURCE_ID: &str = "ResourceId";
    pub const VERSION_ID: &str = "VersionId";
    pub const RAW_RESOURCE: &str = "RawResource";
    pub const REQUEST_METHOD: &str = "RequestMethod";
    pub const REQUEST_URI: &str = "RequestUri";
    pub const LAST_MODIFIED: &str = "LastModified";
    pub const IS_DELETED: &str = "IsDeleted";
    pub const IS_HISTORY: &str = "IsHistory";
    pub const INDEX_DATA: &str = "IndexData";
}

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityValue {
    String(String),
    Int64(i64),
    Double(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
}

impl EntityValue {
    /// Orders two values of compatible types; `None` when incomparable.
    pub fn compare(&self, other: &EntityValue) -> Option<Ordering> {
        match (self, other) {
            (EntityValue::String(a), EntityValue::String(b)) => Some(a.cmp(b)),
            (EntityValue::Int64(a), EntityValue::Int64(b)) => Some(a.cmp(b)),
            (EntityValue::Double(a), EntityValue::Double(b)) => a.partial_cmp(b),
            (EntityValue::Int64(a), EntityValue::Double(b)) => (*a as f64).partial_cmp(b),
            (EntityValue::Double(a), EntityValue::Int64(b)) => a.partial_cmp(&(*b as f64)),
            (EntityValue::Bool(a), EntityValue::Bool(b)) => Some(a.cmp(b)),
            (EntityValue::DateTime(a), EntityValue::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EntityValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EntityValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            EntityValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }
}

impl From<&SearchValue> for EntityValue {
    fn from(value: &SearchValue) -> Self {
        match value {
            SearchValue::String(s) => EntityValue::String(s.clone()),
            SearchValue::Integer(i) => EntityValue::Int64(*i),
            SearchValue::Decimal(d) => EntityValue::Double(d.to_f64().unwrap_or(f64::NAN)),
            SearchValue::DateTime(dt) => EntityValue::DateTime(*dt),
            SearchValue::Boolean(b) => EntityValue::Bool(*b),
        }
    }
}

/// OData literal syntax.
impl fmt::Display for EntityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityValue::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            EntityValue::Int64(i) => write!(f, "{}L", i),
            EntityValue::Double(d) => write!(f, "{:?}", d),
            EntityValue::Bool(b) => write!(f, "{}", b),
            EntityValue::DateTime(dt) => write!(
                f,
                "datetime'{}'",
                dt.to_rfc3339_opts(SecondsFormat::Micros, true)
            ),
        }
    }
}

/// A row of the table store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntity {
    pub partition_key: String,
    pub row_key: String,
    pub properties: BTreeMap<String, EntityValue>,
}

impl TableEntity {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Sets a property.
    pub fn with(mut self, name: impl Into<String>, value: EntityValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Reads a property. The keys are exposed as string properties.
    pub fn get(&self, name: &str) -> Option<EntityValue> {
        match name {
            properties::PARTITION_KEY => Some(EntityValue::String(self.partition_key.clone())),
            properties::ROW_KEY => Some(EntityValue::String(self.row_key.clone())),
            _ => self.properties.get(name).cloned(),
        }
    }

    /// Keeps only the named properties (keys are always kept).
    pub fn project(mut self, select: &[String]) -> Self {
        self.properties.retain(|name, _| select.iter().any(|s| s == name));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_compare_numeric_across_types() {
        assert_eq!(
            EntityValue::Int64(10).compare(&EntityValue::Double(10.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            EntityValue::Double(9.5).compare(&EntityValue::Int64(10)),
            Some(Ordering::Less)
        );
        assert_eq!(
            EntityValue::String("10".into()).compare(&EntityValue::Int64(10)),
            None
        );
    }

    #[test]
    fn test_odata_literals() {
        assert_eq!(EntityValue::String("O'Brien".into()).to_string(), "'O''Brien'");
        assert_eq!(EntityValue::Int64(5).to_string(), "5L");
        assert_eq!(EntityValue::Double(10.0).to_string(), "10.0");
        assert_eq!(EntityValue::Bool(false).to_string(), "false");
    }

    #[test]
    fn test_from_search_value() {
        assert_eq!(
            EntityValue::from(&SearchValue::Decimal(Decimal::new(105, 1))),
            EntityValue::Double(10.5)
        );
    }

    #[test]
    fn test_keys_are_readable_properties() {
        let entity = TableEntity::new("Patient", "p1").with("IsHistory", EntityValue::Bool(false));
        assert_eq!(
            entity.get(properties::PARTITION_KEY),
            Some(EntityValue::String("Patient".into()))
        );
        assert_eq!(entity.get("IsHistory"), Some(EntityValue::Bool(false)));
        assert_eq!(entity.get("Missing"), None);

        let projected = entity.project(&["LastModified".to_string()]);
        assert!(projected.properties.is_empty());
        assert_eq!(projected.row_key, "p1");
    }
}
