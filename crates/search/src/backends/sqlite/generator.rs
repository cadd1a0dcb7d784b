//! SQL generation for search expressions.
//!
//! Translates an [`Expression`] tree into a SQL predicate over the
//! `resources` table. Search parameters become correlated `EXISTS`
//! subqueries over `search_index`; every literal is a bound `?` parameter
//! and parameters are listed in the order their placeholders appear.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::ToSql;
use rusqlite::types::{Null, ToSqlOutput};
use rust_decimal::prelude::ToPrimitive;

use crate::error::SearchError;
use crate::expression::{
    BinaryExpression, BinaryOperator, ChainedExpression, CompartmentExpression, Expression,
    ExpressionVisitor, FieldName, MissingFieldExpression, MissingSearchParameterExpression,
    MultiaryExpression, MultiaryOperator, SearchParameterExpression, SearchValue,
    StringExpression, StringOperator, parameter_names, sanitize_identifier,
};
use crate::search::{Combinable, FieldOverride, QueryContext};

/// A fragment of SQL with bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    /// The SQL clause.
    pub sql: String,
    /// Bound parameter values, in placeholder order.
    pub params: Vec<SqlParam>,
}

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    String(String),
    Integer(i64),
    Float(f64),
    Null,
}

impl SqlParam {
    /// Creates a string parameter.
    pub fn string(s: impl Into<String>) -> Self {
        SqlParam::String(s.into())
    }

    pub(crate) fn from_value(value: &SearchValue) -> Self {
        match value {
            SearchValue::String(s) => SqlParam::String(s.clone()),
            SearchValue::Integer(i) => SqlParam::Integer(*i),
            SearchValue::Decimal(d) => d.to_f64().map(SqlParam::Float).unwrap_or(SqlParam::Null),
            SearchValue::DateTime(dt) => SqlParam::String(format_timestamp(dt)),
            SearchValue::Boolean(b) => SqlParam::Integer(i64::from(*b)),
        }
    }
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlParam::String(s) => ToSqlOutput::from(s.as_str()),
            SqlParam::Integer(i) => ToSqlOutput::from(*i),
            SqlParam::Float(f) => ToSqlOutput::from(*f),
            SqlParam::Null => ToSqlOutput::from(Null),
        })
    }
}

impl SqlFragment {
    /// Creates a new SQL fragment.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Creates a fragment with parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl Combinable for SqlFragment {
    fn open(_operator: MultiaryOperator, child: Self) -> Self {
        SqlFragment::with_params(format!("({})", child.sql), child.params)
    }

    fn push(mut self, operator: MultiaryOperator, child: Self) -> Self {
        self.sql = format!("{} {} ({})", self.sql, operator.as_sql(), child.sql);
        self.params.extend(child.params);
        self
    }
}

/// Timestamp format stored in and compared against `TEXT` columns.
///
/// Fixed precision and a `Z` suffix keep lexical order equal to time order.
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQL comparison for a binary operator.
pub(crate) fn comparison(operator: BinaryOperator) -> &'static str {
    match operator {
        BinaryOperator::Equal => "=",
        BinaryOperator::NotEqual => "<>",
        BinaryOperator::GreaterThan => ">",
        BinaryOperator::GreaterThanOrEqual => ">=",
        BinaryOperator::LessThan => "<",
        BinaryOperator::LessThanOrEqual => "<=",
    }
}

/// `search_index` column holding a field.
pub(crate) fn index_column(field: FieldName) -> String {
    format!("value_{}", field.as_str())
}

pub(crate) type SqlContext = QueryContext<SqlFragment>;

/// Visitor producing SQL predicates.
///
/// A generator is bound to one resource scope; chained expressions compile
/// their inner expression with a nested generator one level deeper so table
/// aliases never collide.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlGenerator {
    depth: usize,
}

impl SqlGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles an expression into a predicate over the `r0` resource alias.
    pub fn compile(&self, expression: &Expression) -> Result<SqlFragment, SearchError> {
        expression.accept(self, &SqlContext::new())
    }

    fn nested(&self) -> Self {
        Self {
            depth: self.depth + 1,
        }
    }

    /// Alias of the `resources` row in scope.
    pub fn resource_alias(&self) -> String {
        format!("r{}", self.depth)
    }

    /// Resolves the column a leaf predicate applies to and builds it.
    ///
    /// Component-indexed predicates are matched against a sibling row of the
    /// same composite group.
    fn leaf(
        &self,
        context: &SqlContext,
        field: FieldName,
        component_index: Option<usize>,
        build: impl FnOnce(&str) -> SqlFragment,
    ) -> Result<SqlFragment, SearchError> {
        match (context.field_override(), component_index) {
            (Some(FieldOverride::Physical(column)), None) => Ok(build(column)),
            (Some(FieldOverride::Physical(column)), Some(_)) => Err(SearchError::InvalidExpression {
                message: format!("component predicate on fixed column {}", column),
            }),
            (Some(FieldOverride::Indexed(alias)), None) => {
                Ok(build(&format!("{}.{}", alias, index_column(field))))
            }
            (Some(FieldOverride::Indexed(alias)), Some(index)) => {
                let c = format!("{}c", alias);
                let inner = build(&format!("{}.{}", c, index_column(field)));
                let mut params = vec![SqlParam::Integer(index as i64)];
                params.extend(inner.params);
                Ok(SqlFragment::with_params(
                    format!(
                        "EXISTS (SELECT 1 FROM search_index {c} \
                         WHERE {c}.resource_surrogate_id = {a}.resource_surrogate_id \
                         AND {c}.param_name = {a}.param_name \
                         AND {c}.composite_group = {a}.composite_group \
                         AND {c}.component_index = ? AND {inner})",
                        c = c,
                        a = alias,
                        inner = inner.sql
                    ),
                    params,
                ))
            }
            (None, _) => Err(SearchError::InvalidExpression {
                message: format!("{} predicate outside a search parameter", field),
            }),
        }
    }

    fn fixed_column(&self, parameter: &str) -> Option<String> {
        let column = match parameter {
            parameter_names::RESOURCE_TYPE => "resource_type",
            parameter_names::LAST_UPDATED => "last_updated",
            parameter_names::ID => "resource_id",
            parameter_names::RESOURCE_SURROGATE_ID => "surrogate_id",
            _ => return None,
        };
        Some(format!("{}.{}", self.resource_alias(), column))
    }
}

fn string_predicate(column: &str, operator: StringOperator, value: String) -> SqlFragment {
    let p = || SqlParam::String(value.clone());
    match operator {
        StringOperator::Equals => SqlFragment::with_params(format!("{} = ?", column), vec![p()]),
        StringOperator::StartsWith => {
            SqlFragment::with_params(format!("instr({}, ?) = 1", column), vec![p()])
        }
        StringOperator::NotStartsWith => {
            SqlFragment::with_params(format!("instr({}, ?) <> 1", column), vec![p()])
        }
        StringOperator::EndsWith => SqlFragment::with_params(
            format!("substr({}, -length(?)) = ?", column),
            vec![p(), p()],
        ),
        StringOperator::NotEndsWith => SqlFragment::with_params(
            format!("substr({}, -length(?)) <> ?", column),
            vec![p(), p()],
        ),
        StringOperator::Contains => {
            SqlFragment::with_params(format!("instr({}, ?) > 0", column), vec![p()])
        }
        StringOperator::NotContains => {
            SqlFragment::with_params(format!("instr({}, ?) = 0", column), vec![p()])
        }
    }
}

impl ExpressionVisitor for SqlGenerator {
    type Context = SqlContext;
    type Output = SqlFragment;

    fn visit_search_parameter(
        &self,
        expression: &SearchParameterExpression,
        context: &SqlContext,
    ) -> Result<SqlFragment, SearchError> {
        if let Some(column) = self.fixed_column(expression.parameter()) {
            return expression
                .expression()
                .accept(self, &context.with_override(FieldOverride::Physical(column)));
        }

        let r = self.resource_alias();
        let alias = format!("si{}", self.depth);
        let inner = expression
            .expression()
            .accept(self, &context.with_override(FieldOverride::Indexed(alias.clone())))?;

        let mut params = vec![SqlParam::string(expression.parameter())];
        params.extend(inner.params);
        Ok(SqlFragment::with_params(
            format!(
                "EXISTS (SELECT 1 FROM search_index {a} \
                 WHERE {a}.resource_surrogate_id = {r}.surrogate_id \
                 AND {a}.param_name = ? AND ({inner}))",
                a = alias,
                r = r,
                inner = inner.sql
            ),
            params,
        ))
    }

    fn visit_binary(
        &self,
        expression: &BinaryExpression,
        context: &SqlContext,
    ) -> Result<SqlFragment, SearchError> {
        let param = SqlParam::from_value(expression.value());
        let op = comparison(expression.operator());
        self.leaf(
            context,
            expression.field(),
            expression.component_index(),
            |column| SqlFragment::with_params(format!("{} {} ?", column, op), vec![param]),
        )
    }

    fn visit_string(
        &self,
        expression: &StringExpression,
        context: &SqlContext,
    ) -> Result<SqlFragment, SearchError> {
        let ignore_case = expression.ignore_case();
        let value = if ignore_case {
            expression.value().to_ascii_uppercase()
        } else {
            expression.value().to_string()
        };
        self.leaf(
            context,
            expression.field(),
            expression.component_index(),
            |column| {
                let column = if ignore_case {
                    format!("UPPER({})", column)
                } else {
                    column.to_string()
                };
                string_predicate(&column, expression.operator(), value)
            },
        )
    }

    fn visit_chained(
        &self,
        expression: &ChainedExpression,
        _context: &SqlContext,
    ) -> Result<SqlFragment, SearchError> {
        let outer = self.resource_alias();
        let inner_gen = self.nested();
        let target = inner_gen.resource_alias();
        let reference = format!(
            "ch{}_{}",
            self.depth,
            sanitize_identifier(expression.reference_parameter())
        );
        let inner = expression
            .expression()
            .accept(&inner_gen, &SqlContext::new())?;

        let (sql, mut params) = if expression.reversed() {
            // `target` holds the reference back to `outer`.
            (
                format!(
                    "EXISTS (SELECT 1 FROM resources {t} \
                     JOIN search_index {ref_} ON {ref_}.resource_surrogate_id = {t}.surrogate_id \
                     WHERE {t}.resource_type = ? AND {t}.is_history = 0 AND {t}.is_deleted = 0 \
                     AND {ref_}.param_name = ? \
                     AND {o}.resource_type = ? \
                     AND {ref_}.value_reference_type = {o}.resource_type \
                     AND {ref_}.value_reference_id = {o}.resource_id \
                     AND ({inner}))",
                    t = target,
                    ref_ = reference,
                    o = outer,
                    inner = inner.sql
                ),
                vec![
                    SqlParam::string(expression.resource_type()),
                    SqlParam::string(expression.reference_parameter()),
                    SqlParam::string(expression.target_resource_type()),
                ],
            )
        } else {
            (
                format!(
                    "EXISTS (SELECT 1 FROM search_index {ref_} \
                     JOIN resources {t} ON {t}.resource_type = {ref_}.value_reference_type \
                     AND {t}.resource_id = {ref_}.value_reference_id \
                     AND {t}.is_history = 0 AND {t}.is_deleted = 0 \
                     WHERE {ref_}.resource_surrogate_id = {o}.surrogate_id \
                     AND {o}.resource_type = ? \
                     AND {ref_}.param_name = ? AND {ref_}.value_reference_type = ? \
                     AND ({inner}))",
                    t = target,
                    ref_ = reference,
                    o = outer,
                    inner = inner.sql
                ),
                vec![
                    SqlParam::string(expression.resource_type()),
                    SqlParam::string(expression.reference_parameter()),
                    SqlParam::string(expression.target_resource_type()),
                ],
            )
        };
        params.extend(inner.params);
        Ok(SqlFragment::with_params(sql, params))
    }

    fn visit_missing_field(
        &self,
        expression: &MissingFieldExpression,
        context: &SqlContext,
    ) -> Result<SqlFragment, SearchError> {
        self.leaf(
            context,
            expression.field(),
            expression.component_index(),
            |column| SqlFragment::new(format!("{} IS NULL", column)),
        )
    }

    fn visit_missing_search_parameter(
        &self,
        expression: &MissingSearchParameterExpression,
        _context: &SqlContext,
    ) -> Result<SqlFragment, SearchError> {
        let r = self.resource_alias();
        let alias = format!("mi{}", self.depth);
        let negation = if expression.is_missing() { "NOT " } else { "" };
        Ok(SqlFragment::with_params(
            format!(
                "{neg}EXISTS (SELECT 1 FROM search_index {a} \
                 WHERE {a}.resource_surrogate_id = {r}.surrogate_id AND {a}.param_name = ?)",
                neg = negation,
                a = alias,
                r = r
            ),
            vec![SqlParam::string(expression.parameter())],
        ))
    }

    fn visit_multiary(
        &self,
        expression: &MultiaryExpression,
        context: &SqlContext,
    ) -> Result<SqlFragment, SearchError> {
        let mut accumulator = context.with_combinator(expression.operator());
        for child in expression.expressions() {
            let fragment = child.accept(self, &accumulator.derive())?;
            accumulator = accumulator.merge(fragment)?;
        }
        accumulator
            .into_filter()
            .ok_or_else(|| SearchError::InvalidExpression {
                message: "multiary expression without children".to_string(),
            })
    }

    fn visit_compartment(
        &self,
        expression: &CompartmentExpression,
        _context: &SqlContext,
    ) -> Result<SqlFragment, SearchError> {
        let r = self.resource_alias();
        let alias = format!("ca{}", self.depth);
        Ok(SqlFragment::with_params(
            format!(
                "EXISTS (SELECT 1 FROM compartment_assignment {a} \
                 WHERE {a}.resource_surrogate_id = {r}.surrogate_id \
                 AND {a}.compartment_type = ? AND {a}.compartment_id = ?)",
                a = alias,
                r = r
            ),
            vec![
                SqlParam::string(expression.compartment_type()),
                SqlParam::string(expression.compartment_id()),
            ],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn param(name: &str, expr: Expression) -> Expression {
        Expression::search_parameter(name, expr)
    }

    fn placeholders(sql: &str) -> usize {
        sql.matches('?').count()
    }

    #[test]
    fn test_comparisons_are_total_and_distinct() {
        let ops: HashSet<_> = BinaryOperator::ALL.iter().map(|op| comparison(*op)).collect();
        assert_eq!(ops.len(), 6);
    }

    #[test]
    fn test_fixed_columns() {
        let expr = param(
            "_type",
            Expression::string_equals(FieldName::String, "Patient", false),
        );
        let fragment = SqlGenerator::new().compile(&expr).unwrap();
        assert_eq!(fragment.sql, "r0.resource_type = ?");
        assert_eq!(fragment.params, vec![SqlParam::string("Patient")]);

        let expr = param(
            "_resourceSurrogateId",
            Expression::binary(FieldName::Number, BinaryOperator::GreaterThan, 5i64),
        );
        let fragment = SqlGenerator::new().compile(&expr).unwrap();
        assert_eq!(fragment.sql, "r0.surrogate_id > ?");
        assert_eq!(fragment.params, vec![SqlParam::Integer(5)]);
    }

    #[test]
    fn test_multiary_parenthesizes_each_child() {
        let a = param("_id", Expression::string_equals(FieldName::String, "a", false));
        let b = param("_id", Expression::string_equals(FieldName::String, "b", false));
        let c = param("_id", Expression::string_equals(FieldName::String, "c", false));

        let and = Expression::and(vec![a.clone(), b.clone(), c.clone()]).unwrap();
        let fragment = SqlGenerator::new().compile(&and).unwrap();
        assert_eq!(
            fragment.sql,
            "(r0.resource_id = ?) AND (r0.resource_id = ?) AND (r0.resource_id = ?)"
        );
        assert_eq!(
            fragment.params,
            vec![SqlParam::string("a"), SqlParam::string("b"), SqlParam::string("c")]
        );

        let or = Expression::or(vec![a, b]).unwrap();
        let fragment = SqlGenerator::new().compile(&or).unwrap();
        assert_eq!(fragment.sql, "(r0.resource_id = ?) OR (r0.resource_id = ?)");
    }

    #[test]
    fn test_indexed_parameter_uses_exists() {
        let expr = param(
            "name",
            Expression::string(StringOperator::StartsWith, FieldName::String, None, "smi", true),
        );
        let fragment = SqlGenerator::new().compile(&expr).unwrap();
        assert!(fragment.sql.starts_with("EXISTS (SELECT 1 FROM search_index si0"));
        assert!(fragment.sql.contains("instr(UPPER(si0.value_string), ?) = 1"));
        assert_eq!(
            fragment.params,
            vec![SqlParam::string("name"), SqlParam::string("SMI")]
        );
    }

    #[test]
    fn test_component_predicate_matches_same_group() {
        let expr = param(
            "code-value-quantity",
            Expression::component_binary(
                FieldName::Quantity,
                1,
                BinaryOperator::LessThan,
                SearchValue::decimal(10),
            ),
        );
        let fragment = SqlGenerator::new().compile(&expr).unwrap();
        assert!(fragment.sql.contains("si0c.composite_group = si0.composite_group"));
        assert!(fragment.sql.contains("si0c.value_quantity < ?"));
        assert_eq!(
            fragment.params,
            vec![
                SqlParam::string("code-value-quantity"),
                SqlParam::Integer(1),
                SqlParam::Float(10.0),
            ]
        );
    }

    #[test]
    fn test_placeholders_match_params() {
        let expr = Expression::and(vec![
            param(
                "name",
                Expression::string(StringOperator::EndsWith, FieldName::String, None, "th", false),
            ),
            Expression::chained(
                "Observation",
                "subject",
                "Patient",
                param("_id", Expression::string_equals(FieldName::String, "p1", false)),
            ),
            Expression::reverse_chained(
                "Observation",
                "subject",
                "Patient",
                param(
                    "code",
                    Expression::string_equals(FieldName::TokenCode, "1234", false),
                ),
            ),
            Expression::missing_search_parameter("birthdate", true),
            Expression::compartment("Patient", "p1"),
            param("address", Expression::missing_field(FieldName::String, Some(0))),
        ])
        .unwrap();

        let fragment = SqlGenerator::new().compile(&expr).unwrap();
        assert_eq!(placeholders(&fragment.sql), fragment.params.len());
        assert!(fragment.sql.contains("NOT EXISTS"));
        assert!(fragment.sql.contains("compartment_assignment ca0"));
        assert!(fragment.sql.contains("r1.resource_id = ?"));
    }

    #[test]
    fn test_leaf_outside_parameter_is_invalid() {
        let expr = Expression::binary(FieldName::Number, BinaryOperator::Equal, 1i64);
        let err = SqlGenerator::new().compile(&expr).unwrap_err();
        assert!(matches!(err, SearchError::InvalidExpression { .. }));
    }

    #[test]
    fn test_compilation_is_idempotent() {
        let expr = Expression::and(vec![
            param(
                "code-value-quantity",
                Expression::and(vec![
                    Expression::string(
                        StringOperator::Equals,
                        FieldName::TokenCode,
                        Some(0),
                        "443849008",
                        false,
                    ),
                    Expression::component_binary(
                        FieldName::Quantity,
                        1,
                        BinaryOperator::GreaterThanOrEqual,
                        SearchValue::decimal(10),
                    ),
                ])
                .unwrap(),
            ),
            Expression::chained(
                "Observation",
                "general-practitioner",
                "Practitioner",
                param("name", Expression::string_equals(FieldName::String, "x", true)),
            ),
        ])
        .unwrap();

        let generator = SqlGenerator::new();
        assert_eq!(generator.compile(&expr).unwrap(), generator.compile(&expr).unwrap());
        assert!(
            generator
                .compile(&expr)
                .unwrap()
                .sql
                .contains("ch0_generalpractitioner")
        );
    }
}
