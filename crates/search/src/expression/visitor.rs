//! Visitor protocol over the expression tree.

use crate::error::SearchError;

use super::{
    BinaryExpression, ChainedExpression, CompartmentExpression, MissingFieldExpression,
    MissingSearchParameterExpression, MultiaryExpression, SearchParameterExpression,
    StringExpression,
};

/// A backend query generator.
///
/// Each method receives the node and the context derived by its parent and
/// returns the generator's output for that subtree. A generator that cannot
/// express a node returns [`SearchError::UnsupportedExpression`] rather than
/// an approximation that would widen the result set.
///
/// Dispatch happens through [`Expression::accept`](super::Expression::accept).
pub trait ExpressionVisitor {
    /// Per-traversal state handed from parent to child.
    type Context;

    /// What the generator produces for a subtree.
    type Output;

    fn visit_search_parameter(
        &self,
        expression: &SearchParameterExpression,
        context: &Self::Context,
    ) -> Result<Self::Output, SearchError>;

    fn visit_binary(
        &self,
        expression: &BinaryExpression,
        context: &Self::Context,
    ) -> Result<Self::Output, SearchError>;

    fn visit_string(
        &self,
        expression: &StringExpression,
        context: &Self::Context,
    ) -> Result<Self::Output, SearchError>;

    fn visit_chained(
        &self,
        expression: &ChainedExpression,
        context: &Self::Context,
    ) -> Result<Self::Output, SearchError>;

    fn visit_missing_field(
        &self,
        expression: &MissingFieldExpression,
        context: &Self::Context,
    ) -> Result<Self::Output, SearchError>;

    fn visit_missing_search_parameter(
        &self,
        expression: &MissingSearchParameterExpression,
        context: &Self::Context,
    ) -> Result<Self::Output, SearchError>;

    fn visit_multiary(
        &self,
        expression: &MultiaryExpression,
        context: &Self::Context,
    ) -> Result<Self::Output, SearchError>;

    fn visit_compartment(
        &self,
        expression: &CompartmentExpression,
        context: &Self::Context,
    ) -> Result<Self::Output, SearchError>;
}
