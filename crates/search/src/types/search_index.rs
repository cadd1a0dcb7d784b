//! Pre-extracted search index entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::expression::{FieldName, SearchValue};

/// Indexed values of one component of a search index entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexComponent {
    values: BTreeMap<FieldName, SearchValue>,
}

impl IndexComponent {
    /// Creates an empty component.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field value.
    pub fn with(mut self, field: FieldName, value: impl Into<SearchValue>) -> Self {
        self.values.insert(field, value.into());
        self
    }

    /// Returns the value of a field, if set.
    pub fn get(&self, field: FieldName) -> Option<&SearchValue> {
        self.values.get(&field)
    }

    /// Iterates set fields in `FieldName` order.
    pub fn iter(&self) -> impl Iterator<Item = (FieldName, &SearchValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }
}

/// One indexed value of a search parameter.
///
/// Non-composite parameters have exactly one component. Composite parameters
/// have one component per composite part, and the position of a component is
/// its component index. A composite definition may have a single part, so
/// composite-ness is recorded rather than derived from the component count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchIndexEntry {
    pub parameter: String,
    pub components: Vec<IndexComponent>,
    #[serde(default)]
    composite: bool,
}

impl SearchIndexEntry {
    /// A non-composite entry.
    pub fn single(parameter: impl Into<String>, component: IndexComponent) -> Self {
        Self {
            parameter: parameter.into(),
            components: vec![component],
            composite: false,
        }
    }

    /// A composite entry.
    pub fn composite(parameter: impl Into<String>, components: Vec<IndexComponent>) -> Self {
        Self {
            parameter: parameter.into(),
            components,
            composite: true,
        }
    }

    /// Whether components are addressed by component index.
    pub fn is_composite(&self) -> bool {
        self.composite
    }
}

/// Membership of a record in a compartment, e.g. `Patient/p1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompartmentAssignment {
    pub compartment_type: String,
    pub compartment_id: String,
}

impl CompartmentAssignment {
    pub fn new(compartment_type: impl Into<String>, compartment_id: impl Into<String>) -> Self {
        Self {
            compartment_type: compartment_type.into(),
            compartment_id: compartment_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_component_fields() {
        let component = IndexComponent::new()
            .with(FieldName::Quantity, Decimal::new(105, 1))
            .with(FieldName::QuantityCode, "mg");

        assert_eq!(
            component.get(FieldName::Quantity),
            Some(&SearchValue::Decimal(Decimal::new(105, 1)))
        );
        assert_eq!(component.get(FieldName::QuantitySystem), None);
        assert_eq!(component.iter().count(), 2);
    }

    #[test]
    fn test_composite_entry() {
        let entry = SearchIndexEntry::composite(
            "code-value-quantity",
            vec![
                IndexComponent::new().with(FieldName::TokenCode, "443849008"),
                IndexComponent::new().with(FieldName::Quantity, Decimal::from(10)),
            ],
        );
        assert!(entry.is_composite());
        assert!(!SearchIndexEntry::single("name", IndexComponent::new()).is_composite());
    }

    #[test]
    fn test_single_part_composite_stays_composite() {
        let entry = SearchIndexEntry::composite(
            "combo",
            vec![IndexComponent::new().with(FieldName::TokenCode, "abc")],
        );
        assert!(entry.is_composite());

        let json = serde_json::to_string(&entry).unwrap();
        let back: SearchIndexEntry = serde_json::from_str(&json).unwrap();
        assert!(back.is_composite());
    }
}
