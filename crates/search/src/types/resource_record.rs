//! Stored resource records.
//!
//! A [`ResourceRecord`] is one version of a resource as the backends persist
//! it: the raw JSON payload plus the metadata the search layer filters on
//! (type, id, version, timestamps, soft-delete and history flags) and the
//! pre-extracted search index entries and compartment assignments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::search_index::{CompartmentAssignment, SearchIndexEntry};

/// HTTP method that produced a resource version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl RequestMethod {
    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
            RequestMethod::Patch => "PATCH",
            RequestMethod::Delete => "DELETE",
        }
    }

    /// Parses an upper-case method name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "POST" => Some(RequestMethod::Post),
            "PUT" => Some(RequestMethod::Put),
            "PATCH" => Some(RequestMethod::Patch),
            "DELETE" => Some(RequestMethod::Delete),
            _ => None,
        }
    }
}

/// The request that produced a resource version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub method: RequestMethod,
    pub uri: String,
}

impl ResourceRequest {
    pub fn new(method: RequestMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
        }
    }
}

/// One stored version of a resource.
///
/// # Examples
///
/// ```
/// use helios_search::types::{IndexComponent, ResourceRecord, SearchIndexEntry};
/// use helios_search::expression::FieldName;
/// use serde_json::json;
///
/// let record = ResourceRecord::new("Patient", "p1", "1", json!({"resourceType": "Patient"}))
///     .with_index(SearchIndexEntry::single(
///         "name",
///         IndexComponent::new().with(FieldName::String, "Smith"),
///     ));
///
/// assert_eq!(record.url(), "Patient/p1");
/// assert!(!record.is_history);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource_type: String,
    pub resource_id: String,
    pub version_id: String,
    pub raw_resource: Value,
    pub request: ResourceRequest,
    pub last_modified: DateTime<Utc>,
    pub is_deleted: bool,
    pub is_history: bool,
    #[serde(default)]
    pub search_indices: Vec<SearchIndexEntry>,
    #[serde(default)]
    pub compartments: Vec<CompartmentAssignment>,
}

impl ResourceRecord {
    /// Creates a live, non-deleted record stamped with the current time.
    pub fn new(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        version_id: impl Into<String>,
        raw_resource: Value,
    ) -> Self {
        let resource_type = resource_type.into();
        let resource_id = resource_id.into();
        let uri = format!("{}/{}", resource_type, resource_id);
        Self {
            resource_type,
            resource_id,
            version_id: version_id.into(),
            raw_resource,
            request: ResourceRequest::new(RequestMethod::Put, uri),
            last_modified: Utc::now(),
            is_deleted: false,
            is_history: false,
            search_indices: Vec::new(),
            compartments: Vec::new(),
        }
    }

    /// Adds a search index entry.
    pub fn with_index(mut self, entry: SearchIndexEntry) -> Self {
        self.search_indices.push(entry);
        self
    }

    /// Assigns the record to a compartment.
    pub fn with_compartment(
        mut self,
        compartment_type: impl Into<String>,
        compartment_id: impl Into<String>,
    ) -> Self {
        self.compartments
            .push(CompartmentAssignment::new(compartment_type, compartment_id));
        self
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = last_modified;
        self
    }

    pub fn with_request(mut self, request: ResourceRequest) -> Self {
        self.request = request;
        self
    }

    /// Marks the record as a deletion tombstone.
    pub fn deleted(mut self) -> Self {
        self.is_deleted = true;
        self.request.method = RequestMethod::Delete;
        self
    }

    /// Relative URL `Type/id`.
    pub fn url(&self) -> String {
        format!("{}/{}", self.resource_type, self.resource_id)
    }

    /// Relative versioned URL `Type/id/_history/version`.
    pub fn versioned_url(&self) -> String {
        format!(
            "{}/{}/_history/{}",
            self.resource_type, self.resource_id, self.version_id
        )
    }

    /// Index entries of one parameter, in insertion order.
    pub fn indices_for<'a>(
        &'a self,
        parameter: &'a str,
    ) -> impl Iterator<Item = &'a SearchIndexEntry> + 'a {
        self.search_indices
            .iter()
            .filter(move |e| e.parameter == parameter)
    }
}
