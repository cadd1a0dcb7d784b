//! Indexed resource fixtures.

use rust_decimal::Decimal;
use serde_json::json;

use helios_search::expression::{ComponentType, CompositeParameter, Expression, FieldName};
use helios_search::types::{IndexComponent, ResourceRecord, SearchIndexEntry};

pub const SNOMED: &str = "http://snomed.info/sct";
pub const UCUM: &str = "http://unitsofmeasure.org";

/// A patient indexed by `family` and `gender`.
pub fn patient(id: &str, family: &str, gender: &str) -> ResourceRecord {
    ResourceRecord::new(
        "Patient",
        id,
        "1",
        json!({"resourceType": "Patient", "id": id, "name": [{"family": family}], "gender": gender}),
    )
    .with_index(SearchIndexEntry::single(
        "family",
        IndexComponent::new().with(FieldName::String, family),
    ))
    .with_index(SearchIndexEntry::single(
        "gender",
        IndexComponent::new()
            .with(FieldName::TokenSystem, "http://hl7.org/fhir/administrative-gender")
            .with(FieldName::TokenCode, gender),
    ))
}

/// An observation with a `code-value-quantity` composite entry and a
/// `subject` reference to `Patient/<subject>`.
pub fn observation(id: &str, subject: &str, code: &str, value: i64) -> ResourceRecord {
    ResourceRecord::new(
        "Observation",
        id,
        "1",
        json!({
            "resourceType": "Observation",
            "id": id,
            "code": {"coding": [{"system": SNOMED, "code": code}]},
            "valueQuantity": {"value": value, "system": UCUM, "code": "cm"},
            "subject": {"reference": format!("Patient/{}", subject)}
        }),
    )
    .with_index(SearchIndexEntry::single(
        "code",
        IndexComponent::new()
            .with(FieldName::TokenSystem, SNOMED)
            .with(FieldName::TokenCode, code),
    ))
    .with_index(SearchIndexEntry::composite(
        "code-value-quantity",
        vec![
            IndexComponent::new()
                .with(FieldName::TokenSystem, SNOMED)
                .with(FieldName::TokenCode, code),
            IndexComponent::new()
                .with(FieldName::Quantity, Decimal::from(value))
                .with(FieldName::QuantitySystem, UCUM)
                .with(FieldName::QuantityCode, "cm"),
        ],
    ))
    .with_index(SearchIndexEntry::single(
        "subject",
        IndexComponent::new()
            .with(FieldName::ReferenceResourceType, "Patient")
            .with(FieldName::ReferenceResourceId, subject),
    ))
    .with_compartment("Patient", subject)
}

/// `code-value-quantity` composite search.
pub fn code_value_quantity(value: &str) -> Expression {
    CompositeParameter::new(
        "code-value-quantity",
        vec![ComponentType::Token, ComponentType::Quantity],
    )
    .parse(value)
    .expect("valid composite value")
}

/// `_type=<resource_type>`
pub fn of_type(resource_type: &str) -> Expression {
    Expression::search_parameter(
        "_type",
        Expression::string_equals(FieldName::String, resource_type, false),
    )
}

/// `gender=<code>`
pub fn gender(code: &str) -> Expression {
    Expression::search_parameter(
        "gender",
        Expression::string_equals(FieldName::TokenCode, code, false),
    )
}
