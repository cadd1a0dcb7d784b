//! Per-traversal context threaded through the generators.
//!
//! A [`QueryContext`] is a value: deriving a child context or merging a
//! child's filter always returns a new context, so sibling visits can never
//! observe each other's partial state.

use crate::error::SearchError;
use crate::expression::MultiaryOperator;

/// Redirects field resolution while visiting a subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOverride {
    /// Resolve to this physical column or property verbatim.
    Physical(String),
    /// Resolve to an indexed field name built from this prefix.
    Indexed(String),
}

/// A native filter that can be combined under a boolean combinator.
///
/// Every child contribution is grouped on its own, so `And` over `a`, `b`
/// and `c` renders as `(a) AND (b) AND (c)`.
pub trait Combinable: Sized {
    /// Starts a combination holding one child.
    fn open(operator: MultiaryOperator, child: Self) -> Self;

    /// Appends a child to a combination started by [`Combinable::open`].
    fn push(self, operator: MultiaryOperator, child: Self) -> Self;
}

/// Accumulator handed from parent to child during a traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryContext<F> {
    field_name_override: Option<FieldOverride>,
    combinator: Option<MultiaryOperator>,
    filter: Option<F>,
}

impl<F> Default for QueryContext<F> {
    fn default() -> Self {
        Self {
            field_name_override: None,
            combinator: None,
            filter: None,
        }
    }
}

impl<F> QueryContext<F> {
    /// An empty root context.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field_override(&self) -> Option<&FieldOverride> {
        self.field_name_override.as_ref()
    }

    pub fn combinator(&self) -> Option<MultiaryOperator> {
        self.combinator
    }

    pub fn filter(&self) -> Option<&F> {
        self.filter.as_ref()
    }

    pub fn into_filter(self) -> Option<F> {
        self.filter
    }

    /// A child context inheriting only the field override.
    pub fn derive(&self) -> Self {
        Self {
            field_name_override: self.field_name_override.clone(),
            combinator: None,
            filter: None,
        }
    }

    /// A child context with a new field override.
    pub fn with_override(&self, field_override: FieldOverride) -> Self {
        Self {
            field_name_override: Some(field_override),
            combinator: None,
            filter: None,
        }
    }

    /// A context that accumulates children under `operator`.
    pub fn with_combinator(&self, operator: MultiaryOperator) -> Self {
        Self {
            field_name_override: self.field_name_override.clone(),
            combinator: Some(operator),
            filter: None,
        }
    }
}

impl<F: Combinable> QueryContext<F> {
    /// Merges a child's filter into this context.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::ContextMisuse`] if the context already holds a
    /// filter and has no combinator to join the new one with.
    pub fn merge(self, child: F) -> Result<Self, SearchError> {
        let filter = match (self.filter, self.combinator) {
            (None, None) => child,
            (None, Some(op)) => F::open(op, child),
            (Some(existing), Some(op)) => existing.push(op, child),
            (Some(_), None) => {
                return Err(SearchError::ContextMisuse {
                    message: "context already holds a filter and has no combinator".to_string(),
                });
            }
        };
        Ok(Self {
            field_name_override: self.field_name_override,
            combinator: self.combinator,
            filter: Some(filter),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Text(String);

    impl Combinable for Text {
        fn open(_: MultiaryOperator, child: Self) -> Self {
            Text(format!("({})", child.0))
        }

        fn push(self, operator: MultiaryOperator, child: Self) -> Self {
            Text(format!("{} {} ({})", self.0, operator, child.0))
        }
    }

    #[test]
    fn test_merge_parenthesizes_each_child() {
        let ctx = QueryContext::<Text>::new().with_combinator(MultiaryOperator::And);
        let ctx = ctx
            .merge(Text("a".into()))
            .and_then(|c| c.merge(Text("b".into())))
            .and_then(|c| c.merge(Text("c".into())))
            .unwrap();
        assert_eq!(ctx.into_filter(), Some(Text("(a) and (b) and (c)".into())));
    }

    #[test]
    fn test_merge_without_combinator_fails_on_second_filter() {
        let ctx = QueryContext::<Text>::new().merge(Text("a".into())).unwrap();
        assert_eq!(ctx.filter(), Some(&Text("a".into())));

        let err = ctx.merge(Text("b".into())).unwrap_err();
        assert!(matches!(err, SearchError::ContextMisuse { .. }));
    }

    #[test]
    fn test_derived_contexts_are_independent() {
        let parent = QueryContext::<Text>::new()
            .with_override(FieldOverride::Physical("PartitionKey".into()))
            .with_combinator(MultiaryOperator::Or);
        let child = parent.derive();

        assert_eq!(
            child.field_override(),
            Some(&FieldOverride::Physical("PartitionKey".into()))
        );
        assert_eq!(child.combinator(), None);

        let merged_child = child.merge(Text("x".into())).unwrap();
        assert!(merged_child.filter().is_some());
        assert!(parent.filter().is_none());
    }
}
