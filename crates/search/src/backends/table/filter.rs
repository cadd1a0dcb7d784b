//! Table store filters.
//!
//! A [`TableFilter`] is a flat boolean combination of property conditions,
//! the only shape a partitioned key/value store can evaluate. It renders as
//! OData filter text (`(PartitionKey eq 'Patient') and (IsDeleted eq false)`)
//! and can be evaluated directly against an entity.

use std::cmp::Ordering;
use std::fmt;

use crate::expression::{BinaryOperator, MultiaryOperator};
use crate::search::Combinable;

use super::entity::{EntityValue, TableEntity};

/// Property comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Eq => "eq",
            Comparator::Ne => "ne",
            Comparator::Gt => "gt",
            Comparator::Ge => "ge",
            Comparator::Lt => "lt",
            Comparator::Le => "le",
        }
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Comparator::Eq => ordering == Ordering::Equal,
            Comparator::Ne => ordering != Ordering::Equal,
            Comparator::Gt => ordering == Ordering::Greater,
            Comparator::Ge => ordering != Ordering::Less,
            Comparator::Lt => ordering == Ordering::Less,
            Comparator::Le => ordering != Ordering::Greater,
        }
    }
}

impl From<BinaryOperator> for Comparator {
    fn from(operator: BinaryOperator) -> Self {
        match operator {
            BinaryOperator::Equal => Comparator::Eq,
            BinaryOperator::NotEqual => Comparator::Ne,
            BinaryOperator::GreaterThan => Comparator::Gt,
            BinaryOperator::GreaterThanOrEqual => Comparator::Ge,
            BinaryOperator::LessThan => Comparator::Lt,
            BinaryOperator::LessThanOrEqual => Comparator::Le,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A table store filter.
#[derive(Debug, Clone, PartialEq)]
pub enum TableFilter {
    /// `<property> <comparator> <value>`
    Condition {
        property: String,
        comparator: Comparator,
        value: EntityValue,
    },
    /// Children joined by one combinator, each parenthesized.
    Combine {
        operator: MultiaryOperator,
        children: Vec<TableFilter>,
    },
}

impl TableFilter {
    pub fn condition(property: impl Into<String>, comparator: Comparator, value: EntityValue) -> Self {
        TableFilter::Condition {
            property: property.into(),
            comparator,
            value,
        }
    }

    /// Evaluates the filter against an entity.
    ///
    /// A condition on a property the entity lacks, or of an incomparable
    /// type, is false.
    pub fn matches(&self, entity: &TableEntity) -> bool {
        match self {
            TableFilter::Condition {
                property,
                comparator,
                value,
            } => entity
                .get(property)
                .and_then(|actual| actual.compare(value))
                .is_some_and(|ordering| comparator.holds(ordering)),
            TableFilter::Combine { operator, children } => match operator {
                MultiaryOperator::And => children.iter().all(|c| c.matches(entity)),
                MultiaryOperator::Or => children.iter().any(|c| c.matches(entity)),
            },
        }
    }
}

impl Combinable for TableFilter {
    fn open(operator: MultiaryOperator, child: Self) -> Self {
        TableFilter::Combine {
            operator,
            children: vec![child],
        }
    }

    fn push(self, operator: MultiaryOperator, child: Self) -> Self {
        match self {
            TableFilter::Combine {
                operator: existing,
                mut children,
            } if existing == operator => {
                children.push(child);
                TableFilter::Combine { operator, children }
            }
            other => TableFilter::Combine {
                operator,
                children: vec![other, child],
            },
        }
    }
}

impl fmt::Display for TableFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableFilter::Condition {
                property,
                comparator,
                value,
            } => write!(f, "{} {} {}", property, comparator, value),
            TableFilter::Combine { operator, children } => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {} ", operator)?;
                    }
                    write!(f, "({})", child)?;
                }
                Ok(())
            }
        }
    }
}
