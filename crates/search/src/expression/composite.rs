//! Composite search parameter decomposition.
//!
//! A composite parameter combines several typed components in one value,
//! separated by `$`. For example
//! `code-value-quantity=http://snomed.info/sct|443849008$ge10|http://unitsofmeasure.org|20`
//! combines a token (the code) with a quantity (the value). Each component is
//! decomposed into one or more field predicates tagged with its component
//! index, and the predicates are joined with `And` under a single
//! [`Expression::SearchParameter`] so generators match them within the same
//! indexed entry.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

use super::{BinaryOperator, Expression, FieldName, SearchValue, StringOperator};

/// Type of one composite component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Token,
    Quantity,
    String,
    Number,
    Uri,
    Reference,
}

/// Definition of a composite search parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeParameter {
    /// Parameter name, e.g. `code-value-quantity`.
    pub name: String,
    /// Component types, in order.
    pub components: Vec<ComponentType>,
}

impl CompositeParameter {
    /// Creates a composite parameter definition.
    pub fn new(name: impl Into<String>, components: Vec<ComponentType>) -> Self {
        Self {
            name: name.into(),
            components,
        }
    }

    /// Decomposes a `$`-separated composite value into an expression.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::InvalidComposite`] if the number of parts does
    /// not match the definition or a part is empty, and
    /// [`SearchError::InvalidSearchValue`] if a part cannot be parsed.
    pub fn parse(&self, value: &str) -> Result<Expression, SearchError> {
        if self.components.is_empty() {
            return Err(self.invalid("definition has no components"));
        }

        let parts: Vec<&str> = value.split('$').collect();
        if parts.len() != self.components.len() {
            return Err(self.invalid(format!(
                "expected {} components, found {}",
                self.components.len(),
                parts.len()
            )));
        }

        let mut predicates = Vec::new();
        for (index, (part, component)) in parts.iter().zip(&self.components).enumerate() {
            if part.is_empty() {
                return Err(self.invalid(format!("component {} is empty", index)));
            }
            self.decompose(*component, index, part, &mut predicates)?;
        }

        Ok(Expression::search_parameter(
            self.name.clone(),
            Expression::and(predicates)?,
        ))
    }

    fn decompose(
        &self,
        component: ComponentType,
        index: usize,
        part: &str,
        out: &mut Vec<Expression>,
    ) -> Result<(), SearchError> {
        match component {
            ComponentType::Token => match part.split_once('|') {
                Some(("", code)) => {
                    out.push(Expression::missing_field(FieldName::TokenSystem, Some(index)));
                    out.push(exact(FieldName::TokenCode, index, code));
                }
                Some((system, "")) => out.push(exact(FieldName::TokenSystem, index, system)),
                Some((system, code)) => {
                    out.push(exact(FieldName::TokenSystem, index, system));
                    out.push(exact(FieldName::TokenCode, index, code));
                }
                None => out.push(exact(FieldName::TokenCode, index, part)),
            },
            ComponentType::Quantity => {
                let mut pieces = part.splitn(3, '|');
                let number = pieces.next().unwrap_or_default();
                let (operator, number) = BinaryOperator::split_prefix(&self.name, number)?;
                out.push(Expression::component_binary(
                    FieldName::Quantity,
                    index,
                    operator,
                    self.parse_decimal(number)?,
                ));
                if let Some(system) = pieces.next().filter(|s| !s.is_empty()) {
                    out.push(exact(FieldName::QuantitySystem, index, system));
                }
                if let Some(code) = pieces.next().filter(|s| !s.is_empty()) {
                    out.push(exact(FieldName::QuantityCode, index, code));
                }
            }
            ComponentType::Number => {
                let (operator, number) = BinaryOperator::split_prefix(&self.name, part)?;
                out.push(Expression::component_binary(
                    FieldName::Number,
                    index,
                    operator,
                    self.parse_decimal(number)?,
                ));
            }
            ComponentType::String => out.push(Expression::string(
                StringOperator::StartsWith,
                FieldName::String,
                Some(index),
                part,
                true,
            )),
            ComponentType::Uri => out.push(exact(FieldName::Uri, index, part)),
            ComponentType::Reference => match part.rsplit_once('/') {
                Some((resource_type, id)) if !resource_type.is_empty() && !id.is_empty() => {
                    out.push(exact(FieldName::ReferenceResourceType, index, resource_type));
                    out.push(exact(FieldName::ReferenceResourceId, index, id));
                }
                _ => out.push(exact(FieldName::ReferenceResourceId, index, part)),
            },
        }
        Ok(())
    }

    fn parse_decimal(&self, number: &str) -> Result<SearchValue, SearchError> {
        number
            .parse::<Decimal>()
            .map(SearchValue::Decimal)
            .map_err(|e| SearchError::InvalidSearchValue {
                parameter: self.name.clone(),
                value: number.to_string(),
                message: e.to_string(),
            })
    }

    fn invalid(&self, message: impl Into<String>) -> SearchError {
        SearchError::InvalidComposite {
            parameter: self.name.clone(),
            message: message.into(),
        }
    }
}

fn exact(field: FieldName, index: usize, value: &str) -> Expression {
    Expression::string(StringOperator::Equals, field, Some(index), value, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ExpressionKind;

    fn code_value_quantity() -> CompositeParameter {
        CompositeParameter::new(
            "code-value-quantity",
            vec![ComponentType::Token, ComponentType::Quantity],
        )
    }

    #[test]
    fn test_token_quantity_decomposition() {
        let expr = code_value_quantity()
            .parse("http://snomed.info/sct|443849008$ge10|http://unitsofmeasure.org|20")
            .unwrap();

        let Expression::SearchParameter(param) = &expr else {
            panic!("expected search parameter, got {:?}", expr);
        };
        assert_eq!(param.parameter(), "code-value-quantity");

        let children = param.expression().children();
        assert_eq!(
            children,
            &[
                exact(FieldName::TokenSystem, 0, "http://snomed.info/sct"),
                exact(FieldName::TokenCode, 0, "443849008"),
                Expression::component_binary(
                    FieldName::Quantity,
                    1,
                    BinaryOperator::GreaterThanOrEqual,
                    SearchValue::decimal(10),
                ),
                exact(FieldName::QuantitySystem, 1, "http://unitsofmeasure.org"),
                exact(FieldName::QuantityCode, 1, "20"),
            ]
        );
    }

    #[test]
    fn test_component_count_mismatch() {
        let err = code_value_quantity().parse("443849008").unwrap_err();
        assert!(matches!(err, SearchError::InvalidComposite { .. }));

        let err = code_value_quantity().parse("a$1$2").unwrap_err();
        assert!(matches!(err, SearchError::InvalidComposite { .. }));
    }

    #[test]
    fn test_range_prefix_rejected() {
        let err = code_value_quantity().parse("1234$ap10").unwrap_err();
        assert!(matches!(err, SearchError::InvalidSearchValue { .. }));
    }

    #[test]
    fn test_invalid_number() {
        let err = code_value_quantity().parse("1234$gtabc").unwrap_err();
        assert!(matches!(err, SearchError::InvalidSearchValue { .. }));
    }

    #[test]
    fn test_token_without_system() {
        let expr = CompositeParameter::new("combo", vec![ComponentType::Token])
            .parse("|abc")
            .unwrap();
        let Expression::SearchParameter(param) = &expr else {
            panic!("expected search parameter");
        };
        let kinds: Vec<_> = param
            .expression()
            .children()
            .iter()
            .map(Expression::kind)
            .collect();
        assert_eq!(kinds, vec![ExpressionKind::MissingField, ExpressionKind::String]);
    }

    #[test]
    fn test_reference_and_string_components() {
        let expr = CompositeParameter::new(
            "subject-name",
            vec![ComponentType::Reference, ComponentType::String],
        )
        .parse("Patient/123$smi")
        .unwrap();
        let Expression::SearchParameter(param) = &expr else {
            panic!("expected search parameter");
        };
        let children = param.expression().children();
        assert_eq!(children.len(), 3);
        assert_eq!(children[1], exact(FieldName::ReferenceResourceId, 0, "123"));
        assert_eq!(
            children[2],
            Expression::string(StringOperator::StartsWith, FieldName::String, Some(1), "smi", true)
        );
    }
}
