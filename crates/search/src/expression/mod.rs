//! Search expression intermediate representation.
//!
//! An [`Expression`] is an immutable tree describing a search query. It knows
//! nothing about storage backends: every backend ships a generator that
//! implements [`ExpressionVisitor`] and turns the tree into its native query
//! form.
//!
//! ```
//! use helios_search::expression::{BinaryOperator, Expression, FieldName, SearchValue};
//!
//! let expr = Expression::and(vec![
//!     Expression::search_parameter(
//!         "_type",
//!         Expression::string_equals(FieldName::String, "Observation", false),
//!     ),
//!     Expression::search_parameter(
//!         "value-quantity",
//!         Expression::binary(
//!             FieldName::Quantity,
//!             BinaryOperator::GreaterThanOrEqual,
//!             SearchValue::decimal(10),
//!         ),
//!     ),
//! ])
//! .unwrap();
//!
//! assert_eq!(expr.children().len(), 2);
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

pub mod composite;
mod visitor;

pub use composite::{ComponentType, CompositeParameter};
pub use visitor::ExpressionVisitor;

/// Names of search parameters that generators map onto fixed physical fields.
pub mod parameter_names {
    /// Resource type of the record.
    pub const RESOURCE_TYPE: &str = "_type";
    /// Last modification timestamp of the record.
    pub const LAST_UPDATED: &str = "_lastUpdated";
    /// Logical id of the record.
    pub const ID: &str = "_id";
    /// Backend-assigned ordering key of the record.
    pub const RESOURCE_SURROGATE_ID: &str = "_resourceSurrogateId";
}

/// The variant of an expression node, used for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExpressionKind {
    SearchParameter,
    Binary,
    String,
    Chained,
    MissingField,
    MissingSearchParameter,
    Multiary,
    Compartment,
}

impl ExpressionKind {
    /// All expression kinds, in declaration order.
    pub const ALL: [ExpressionKind; 8] = [
        ExpressionKind::SearchParameter,
        ExpressionKind::Binary,
        ExpressionKind::String,
        ExpressionKind::Chained,
        ExpressionKind::MissingField,
        ExpressionKind::MissingSearchParameter,
        ExpressionKind::Multiary,
        ExpressionKind::Compartment,
    ];
}

impl fmt::Display for ExpressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionKind::SearchParameter => write!(f, "search parameter"),
            ExpressionKind::Binary => write!(f, "binary"),
            ExpressionKind::String => write!(f, "string"),
            ExpressionKind::Chained => write!(f, "chained"),
            ExpressionKind::MissingField => write!(f, "missing field"),
            ExpressionKind::MissingSearchParameter => write!(f, "missing search parameter"),
            ExpressionKind::Multiary => write!(f, "multiary"),
            ExpressionKind::Compartment => write!(f, "compartment"),
        }
    }
}

/// Physical fields of an indexed search value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldName {
    DateTimeStart,
    DateTimeEnd,
    Number,
    Quantity,
    QuantityCode,
    QuantitySystem,
    ReferenceBaseUri,
    ReferenceResourceType,
    ReferenceResourceId,
    String,
    TokenCode,
    TokenSystem,
    TokenText,
    Uri,
}

impl FieldName {
    /// Short snake_case name, used to build backend column and property names.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::DateTimeStart => "date_start",
            FieldName::DateTimeEnd => "date_end",
            FieldName::Number => "number",
            FieldName::Quantity => "quantity",
            FieldName::QuantityCode => "quantity_code",
            FieldName::QuantitySystem => "quantity_system",
            FieldName::ReferenceBaseUri => "reference_base_uri",
            FieldName::ReferenceResourceType => "reference_type",
            FieldName::ReferenceResourceId => "reference_id",
            FieldName::String => "string",
            FieldName::TokenCode => "token_code",
            FieldName::TokenSystem => "token_system",
            FieldName::TokenText => "token_text",
            FieldName::Uri => "uri",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operators of a [`BinaryExpression`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl BinaryOperator {
    /// All operators, in declaration order.
    pub const ALL: [BinaryOperator; 6] = [
        BinaryOperator::Equal,
        BinaryOperator::NotEqual,
        BinaryOperator::GreaterThan,
        BinaryOperator::GreaterThanOrEqual,
        BinaryOperator::LessThan,
        BinaryOperator::LessThanOrEqual,
    ];

    /// Maps a FHIR search prefix (`eq`, `ne`, `gt`, `lt`, `ge`, `le`) to an operator.
    ///
    /// Range prefixes (`sa`, `eb`, `ap`) have no single-comparison equivalent
    /// and return `None`.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "eq" => Some(BinaryOperator::Equal),
            "ne" => Some(BinaryOperator::NotEqual),
            "gt" => Some(BinaryOperator::GreaterThan),
            "lt" => Some(BinaryOperator::LessThan),
            "ge" => Some(BinaryOperator::GreaterThanOrEqual),
            "le" => Some(BinaryOperator::LessThanOrEqual),
            _ => None,
        }
    }

    /// Splits a leading two-letter prefix off a value.
    ///
    /// Values without a prefix default to [`BinaryOperator::Equal`]. Values
    /// starting with a range prefix (`sa`, `eb`, `ap`) are rejected.
    pub fn split_prefix<'a>(
        parameter: &str,
        value: &'a str,
    ) -> Result<(Self, &'a str), SearchError> {
        let Some(head) = value.get(..2) else {
            return Ok((BinaryOperator::Equal, value));
        };
        if let Some(op) = Self::from_prefix(head) {
            return Ok((op, &value[2..]));
        }
        if matches!(head, "sa" | "eb" | "ap") {
            return Err(SearchError::InvalidSearchValue {
                parameter: parameter.to_string(),
                value: value.to_string(),
                message: format!("unsupported comparison prefix '{}'", head),
            });
        }
        Ok((BinaryOperator::Equal, value))
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOperator::Equal => write!(f, "eq"),
            BinaryOperator::NotEqual => write!(f, "ne"),
            BinaryOperator::GreaterThan => write!(f, "gt"),
            BinaryOperator::GreaterThanOrEqual => write!(f, "ge"),
            BinaryOperator::LessThan => write!(f, "lt"),
            BinaryOperator::LessThanOrEqual => write!(f, "le"),
        }
    }
}

/// String matching operators of a [`StringExpression`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StringOperator {
    Equals,
    StartsWith,
    EndsWith,
    Contains,
    NotStartsWith,
    NotEndsWith,
    NotContains,
}

impl fmt::Display for StringOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringOperator::Equals => write!(f, "equals"),
            StringOperator::StartsWith => write!(f, "starts-with"),
            StringOperator::EndsWith => write!(f, "ends-with"),
            StringOperator::Contains => write!(f, "contains"),
            StringOperator::NotStartsWith => write!(f, "not-starts-with"),
            StringOperator::NotEndsWith => write!(f, "not-ends-with"),
            StringOperator::NotContains => write!(f, "not-contains"),
        }
    }
}

/// Boolean combinators of a [`MultiaryExpression`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultiaryOperator {
    And,
    Or,
}

impl MultiaryOperator {
    /// The SQL keyword for this combinator.
    pub fn as_sql(&self) -> &'static str {
        match self {
            MultiaryOperator::And => "AND",
            MultiaryOperator::Or => "OR",
        }
    }
}

impl fmt::Display for MultiaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultiaryOperator::And => write!(f, "and"),
            MultiaryOperator::Or => write!(f, "or"),
        }
    }
}

/// A typed literal compared by a [`BinaryExpression`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SearchValue {
    String(String),
    Integer(i64),
    Decimal(Decimal),
    DateTime(DateTime<Utc>),
    Boolean(bool),
}

impl SearchValue {
    /// Creates a string value.
    pub fn string(s: impl Into<String>) -> Self {
        SearchValue::String(s.into())
    }

    /// Creates a decimal value.
    pub fn decimal(d: impl Into<Decimal>) -> Self {
        SearchValue::Decimal(d.into())
    }
}

impl fmt::Display for SearchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchValue::String(s) => f.write_str(s),
            SearchValue::Integer(i) => write!(f, "{}", i),
            SearchValue::Decimal(d) => write!(f, "{}", d),
            SearchValue::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            SearchValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for SearchValue {
    fn from(s: &str) -> Self {
        SearchValue::String(s.to_string())
    }
}

impl From<String> for SearchValue {
    fn from(s: String) -> Self {
        SearchValue::String(s)
    }
}

impl From<i64> for SearchValue {
    fn from(i: i64) -> Self {
        SearchValue::Integer(i)
    }
}

impl From<Decimal> for SearchValue {
    fn from(d: Decimal) -> Self {
        SearchValue::Decimal(d)
    }
}

impl From<DateTime<Utc>> for SearchValue {
    fn from(dt: DateTime<Utc>) -> Self {
        SearchValue::DateTime(dt)
    }
}

impl From<bool> for SearchValue {
    fn from(b: bool) -> Self {
        SearchValue::Boolean(b)
    }
}

/// Binds a named search parameter to a sub-expression.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParameterExpression {
    parameter: String,
    expression: Box<Expression>,
}

impl SearchParameterExpression {
    /// The search parameter name.
    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    /// The expression evaluated against the parameter's indexed values.
    pub fn expression(&self) -> &Expression {
        &self.expression
    }
}

/// Compares a physical field against a value.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpression {
    field: FieldName,
    component_index: Option<usize>,
    operator: BinaryOperator,
    value: SearchValue,
}

impl BinaryExpression {
    pub fn field(&self) -> FieldName {
        self.field
    }

    /// Composite component targeted by this comparison.
    pub fn component_index(&self) -> Option<usize> {
        self.component_index
    }

    pub fn operator(&self) -> BinaryOperator {
        self.operator
    }

    pub fn value(&self) -> &SearchValue {
        &self.value
    }
}

/// Matches a string field.
#[derive(Debug, Clone, PartialEq)]
pub struct StringExpression {
    field: FieldName,
    component_index: Option<usize>,
    operator: StringOperator,
    value: String,
    ignore_case: bool,
}

impl StringExpression {
    pub fn field(&self) -> FieldName {
        self.field
    }

    pub fn component_index(&self) -> Option<usize> {
        self.component_index
    }

    pub fn operator(&self) -> StringOperator {
        self.operator
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether the comparison is done on canonical (upper) case.
    pub fn ignore_case(&self) -> bool {
        self.ignore_case
    }
}

/// Applies an expression to the resources reached through a reference parameter.
///
/// When `reversed` is set the direction flips: the expression is applied to
/// `resource_type` resources that reference the searched resource through
/// `reference_parameter` (the `_has` form).
#[derive(Debug, Clone, PartialEq)]
pub struct ChainedExpression {
    resource_type: String,
    reference_parameter: String,
    target_resource_type: String,
    reversed: bool,
    expression: Box<Expression>,
}

impl ChainedExpression {
    /// Resource type holding the reference parameter.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn reference_parameter(&self) -> &str {
        &self.reference_parameter
    }

    /// Resource type the reference points to.
    pub fn target_resource_type(&self) -> &str {
        &self.target_resource_type
    }

    pub fn reversed(&self) -> bool {
        self.reversed
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }
}

/// Asserts that a field of an indexed entry has no value.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingFieldExpression {
    field: FieldName,
    component_index: Option<usize>,
}

impl MissingFieldExpression {
    pub fn field(&self) -> FieldName {
        self.field
    }

    pub fn component_index(&self) -> Option<usize> {
        self.component_index
    }
}

/// Asserts that a search parameter has no (or, with `is_missing = false`, some) indexed value.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingSearchParameterExpression {
    parameter: String,
    is_missing: bool,
}

impl MissingSearchParameterExpression {
    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    pub fn is_missing(&self) -> bool {
        self.is_missing
    }
}

/// Boolean combination of one or more expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiaryExpression {
    operator: MultiaryOperator,
    expressions: Vec<Expression>,
}

impl MultiaryExpression {
    pub fn operator(&self) -> MultiaryOperator {
        self.operator
    }

    /// The children, never empty.
    pub fn expressions(&self) -> &[Expression] {
        &self.expressions
    }
}

/// Scopes results to resources belonging to a compartment.
#[derive(Debug, Clone, PartialEq)]
pub struct CompartmentExpression {
    compartment_type: String,
    compartment_id: String,
}

impl CompartmentExpression {
    pub fn compartment_type(&self) -> &str {
        &self.compartment_type
    }

    pub fn compartment_id(&self) -> &str {
        &self.compartment_id
    }
}

/// A node of the search expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    SearchParameter(SearchParameterExpression),
    Binary(BinaryExpression),
    String(StringExpression),
    Chained(ChainedExpression),
    MissingField(MissingFieldExpression),
    MissingSearchParameter(MissingSearchParameterExpression),
    Multiary(MultiaryExpression),
    Compartment(CompartmentExpression),
}

impl Expression {
    /// Binds `expression` to the search parameter `parameter`.
    pub fn search_parameter(parameter: impl Into<String>, expression: Expression) -> Self {
        Expression::SearchParameter(SearchParameterExpression {
            parameter: parameter.into(),
            expression: Box::new(expression),
        })
    }

    /// Compares `field` against `value`.
    pub fn binary(field: FieldName, operator: BinaryOperator, value: impl Into<SearchValue>) -> Self {
        Expression::Binary(BinaryExpression {
            field,
            component_index: None,
            operator,
            value: value.into(),
        })
    }

    /// Compares `field` of a composite component against `value`.
    pub fn component_binary(
        field: FieldName,
        component_index: usize,
        operator: BinaryOperator,
        value: impl Into<SearchValue>,
    ) -> Self {
        Expression::Binary(BinaryExpression {
            field,
            component_index: Some(component_index),
            operator,
            value: value.into(),
        })
    }

    /// Matches the string `field`.
    pub fn string(
        operator: StringOperator,
        field: FieldName,
        component_index: Option<usize>,
        value: impl Into<String>,
        ignore_case: bool,
    ) -> Self {
        Expression::String(StringExpression {
            field,
            component_index,
            operator,
            value: value.into(),
            ignore_case,
        })
    }

    /// Shorthand for a non-composite `Equals` string match.
    pub fn string_equals(field: FieldName, value: impl Into<String>, ignore_case: bool) -> Self {
        Self::string(StringOperator::Equals, field, None, value, ignore_case)
    }

    /// Forward chain: `reference_parameter` of `resource_type` points to a
    /// `target_resource_type` matching `expression`.
    pub fn chained(
        resource_type: impl Into<String>,
        reference_parameter: impl Into<String>,
        target_resource_type: impl Into<String>,
        expression: Expression,
    ) -> Self {
        Expression::Chained(ChainedExpression {
            resource_type: resource_type.into(),
            reference_parameter: reference_parameter.into(),
            target_resource_type: target_resource_type.into(),
            reversed: false,
            expression: Box::new(expression),
        })
    }

    /// Reverse chain (`_has`): a `resource_type` matching `expression`
    /// references the searched `target_resource_type` through `reference_parameter`.
    pub fn reverse_chained(
        resource_type: impl Into<String>,
        reference_parameter: impl Into<String>,
        target_resource_type: impl Into<String>,
        expression: Expression,
    ) -> Self {
        Expression::Chained(ChainedExpression {
            resource_type: resource_type.into(),
            reference_parameter: reference_parameter.into(),
            target_resource_type: target_resource_type.into(),
            reversed: true,
            expression: Box::new(expression),
        })
    }

    pub fn missing_field(field: FieldName, component_index: Option<usize>) -> Self {
        Expression::MissingField(MissingFieldExpression {
            field,
            component_index,
        })
    }

    pub fn missing_search_parameter(parameter: impl Into<String>, is_missing: bool) -> Self {
        Expression::MissingSearchParameter(MissingSearchParameterExpression {
            parameter: parameter.into(),
            is_missing,
        })
    }

    /// Combines `expressions` with `operator`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::InvalidExpression`] if `expressions` is empty.
    pub fn multiary(
        operator: MultiaryOperator,
        expressions: Vec<Expression>,
    ) -> Result<Self, SearchError> {
        if expressions.is_empty() {
            return Err(SearchError::InvalidExpression {
                message: format!("{} expression requires at least one child", operator),
            });
        }
        Ok(Expression::Multiary(MultiaryExpression {
            operator,
            expressions,
        }))
    }

    pub fn and(expressions: Vec<Expression>) -> Result<Self, SearchError> {
        Self::multiary(MultiaryOperator::And, expressions)
    }

    pub fn or(expressions: Vec<Expression>) -> Result<Self, SearchError> {
        Self::multiary(MultiaryOperator::Or, expressions)
    }

    pub fn compartment(compartment_type: impl Into<String>, compartment_id: impl Into<String>) -> Self {
        Expression::Compartment(CompartmentExpression {
            compartment_type: compartment_type.into(),
            compartment_id: compartment_id.into(),
        })
    }

    /// The variant of this node.
    pub fn kind(&self) -> ExpressionKind {
        match self {
            Expression::SearchParameter(_) => ExpressionKind::SearchParameter,
            Expression::Binary(_) => ExpressionKind::Binary,
            Expression::String(_) => ExpressionKind::String,
            Expression::Chained(_) => ExpressionKind::Chained,
            Expression::MissingField(_) => ExpressionKind::MissingField,
            Expression::MissingSearchParameter(_) => ExpressionKind::MissingSearchParameter,
            Expression::Multiary(_) => ExpressionKind::Multiary,
            Expression::Compartment(_) => ExpressionKind::Compartment,
        }
    }

    /// Direct children of a multiary node; empty for every other variant.
    pub fn children(&self) -> &[Expression] {
        match self {
            Expression::Multiary(m) => m.expressions(),
            _ => &[],
        }
    }

    /// A human-readable name for reporting this expression as an unsupported parameter.
    pub fn parameter_label(&self) -> String {
        match self {
            Expression::SearchParameter(e) => e.parameter.clone(),
            Expression::Chained(e) => format!("{}.{}", e.reference_parameter, e.target_resource_type),
            Expression::MissingSearchParameter(e) => format!("{}:missing", e.parameter),
            Expression::Compartment(e) => format!("{}/{}", e.compartment_type, e.compartment_id),
            other => other.kind().to_string(),
        }
    }

    /// Dispatches to the visitor method matching this node's variant.
    pub fn accept<V: ExpressionVisitor + ?Sized>(
        &self,
        visitor: &V,
        context: &V::Context,
    ) -> Result<V::Output, SearchError> {
        match self {
            Expression::SearchParameter(e) => visitor.visit_search_parameter(e, context),
            Expression::Binary(e) => visitor.visit_binary(e, context),
            Expression::String(e) => visitor.visit_string(e, context),
            Expression::Chained(e) => visitor.visit_chained(e, context),
            Expression::MissingField(e) => visitor.visit_missing_field(e, context),
            Expression::MissingSearchParameter(e) => {
                visitor.visit_missing_search_parameter(e, context)
            }
            Expression::Multiary(e) => visitor.visit_multiary(e, context),
            Expression::Compartment(e) => visitor.visit_compartment(e, context),
        }
    }
}

/// Strips everything but ASCII alphanumerics and `_` from a parameter name.
///
/// `code-value-quantity` becomes `codevaluequantity`.
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}
