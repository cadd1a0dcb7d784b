//! Table store filter generation.
//!
//! The table store has no joins and no secondary index table, so only
//! predicates over properties of the entity itself can be expressed.
//! Index entries are flattened onto the entity as
//! `s_<parameter>_<entry>[_<component>]_<field>` properties, and only the
//! first entry of a parameter is addressable. Everything else is rejected with
//! [`SearchError::UnsupportedExpression`].

use crate::error::SearchError;
use crate::expression::{
    BinaryExpression, ChainedExpression, CompartmentExpression, Expression, ExpressionKind,
    ExpressionVisitor, FieldName, MissingFieldExpression, MissingSearchParameterExpression,
    MultiaryExpression, SearchParameterExpression, StringExpression, StringOperator,
    parameter_names, sanitize_identifier,
};
use crate::search::{FieldOverride, QueryContext};

use super::BACKEND_NAME;
use super::entity::{EntityValue, properties};
use super::filter::{Comparator, TableFilter};

pub(crate) type TableContext = QueryContext<TableFilter>;

/// Prefix of the flattened properties of the `entry`-th index entry of `parameter`.
///
/// Underscores in the parameter name are doubled so the single `_` before the
/// entry number always ends the name.
pub fn index_prefix(parameter: &str, entry: usize) -> String {
    format!("s_{}_{}", sanitize_identifier(parameter).replace('_', "__"), entry)
}

/// Flattened property name of one field.
pub fn index_property(prefix: &str, component_index: Option<usize>, field: FieldName) -> String {
    match component_index {
        Some(i) => format!("{}_{}_{}", prefix, i, field.as_str()),
        None => format!("{}_{}", prefix, field.as_str()),
    }
}

/// Visitor producing table store filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableGenerator;

impl TableGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn compile(&self, expression: &Expression) -> Result<TableFilter, SearchError> {
        expression.accept(self, &TableContext::new())
    }

    fn property(
        &self,
        context: &TableContext,
        field: FieldName,
        component_index: Option<usize>,
    ) -> Result<String, SearchError> {
        match context.field_override() {
            Some(FieldOverride::Physical(name)) if component_index.is_none() => Ok(name.clone()),
            Some(FieldOverride::Physical(name)) => Err(SearchError::InvalidExpression {
                message: format!("component predicate on fixed property {}", name),
            }),
            Some(FieldOverride::Indexed(prefix)) => {
                Ok(index_property(prefix, component_index, field))
            }
            None => Err(SearchError::InvalidExpression {
                message: format!("{} predicate outside a search parameter", field),
            }),
        }
    }
}

fn unsupported(kind: ExpressionKind, reason: impl Into<String>) -> SearchError {
    SearchError::unsupported(kind, BACKEND_NAME, reason)
}

impl ExpressionVisitor for TableGenerator {
    type Context = TableContext;
    type Output = TableFilter;

    fn visit_search_parameter(
        &self,
        expression: &SearchParameterExpression,
        context: &TableContext,
    ) -> Result<TableFilter, SearchError> {
        let field_override = match expression.parameter() {
            parameter_names::RESOURCE_TYPE => {
                FieldOverride::Physical(properties::PARTITION_KEY.to_string())
            }
            parameter_names::LAST_UPDATED => {
                FieldOverride::Physical(properties::LAST_MODIFIED.to_string())
            }
            parameter_names::ID => FieldOverride::Physical(properties::RESOURCE_ID.to_string()),
            parameter_names::RESOURCE_SURROGATE_ID => {
                return Err(unsupported(
                    ExpressionKind::SearchParameter,
                    "entities have no surrogate id",
                ));
            }
            name => FieldOverride::Indexed(index_prefix(name, 0)),
        };
        expression
            .expression()
            .accept(self, &context.with_override(field_override))
    }

    fn visit_binary(
        &self,
        expression: &BinaryExpression,
        context: &TableContext,
    ) -> Result<TableFilter, SearchError> {
        let property = self.property(context, expression.field(), expression.component_index())?;
        Ok(TableFilter::condition(
            property,
            Comparator::from(expression.operator()),
            EntityValue::from(expression.value()),
        ))
    }

    fn visit_string(
        &self,
        expression: &StringExpression,
        context: &TableContext,
    ) -> Result<TableFilter, SearchError> {
        if expression.ignore_case() {
            return Err(unsupported(
                ExpressionKind::String,
                "case-insensitive matching is not available",
            ));
        }
        match expression.operator() {
            // StartsWith is approximated by an exact match.
            StringOperator::Equals | StringOperator::StartsWith => {}
            other => {
                return Err(unsupported(
                    ExpressionKind::String,
                    format!("string operator {} is not available", other),
                ));
            }
        }
        let property = self.property(context, expression.field(), expression.component_index())?;
        Ok(TableFilter::condition(
            property,
            Comparator::Eq,
            EntityValue::String(expression.value().to_string()),
        ))
    }

    fn visit_chained(
        &self,
        _expression: &ChainedExpression,
        _context: &TableContext,
    ) -> Result<TableFilter, SearchError> {
        Err(unsupported(
            ExpressionKind::Chained,
            "the table store cannot join across resources",
        ))
    }

    fn visit_missing_field(
        &self,
        _expression: &MissingFieldExpression,
        _context: &TableContext,
    ) -> Result<TableFilter, SearchError> {
        Err(unsupported(
            ExpressionKind::MissingField,
            "absent properties cannot be filtered",
        ))
    }

    fn visit_missing_search_parameter(
        &self,
        _expression: &MissingSearchParameterExpression,
        _context: &TableContext,
    ) -> Result<TableFilter, SearchError> {
        Err(unsupported(
            ExpressionKind::MissingSearchParameter,
            "absent properties cannot be filtered",
        ))
    }

    fn visit_multiary(
        &self,
        expression: &MultiaryExpression,
        context: &TableContext,
    ) -> Result<TableFilter, SearchError> {
        let mut accumulator = context.with_combinator(expression.operator());
        for child in expression.expressions() {
            let filter = child.accept(self, &accumulator.derive())?;
            accumulator = accumulator.merge(filter)?;
        }
        accumulator
            .into_filter()
            .ok_or_else(|| SearchError::InvalidExpression {
                message: "multiary expression without children".to_string(),
            })
    }

    fn visit_compartment(
        &self,
        _expression: &CompartmentExpression,
        _context: &TableContext,
    ) -> Result<TableFilter, SearchError> {
        Err(unsupported(
            ExpressionKind::Compartment,
            "compartment membership is not indexed",
        ))
    }
}
