//! Backend capability descriptions.
//!
//! Each backend describes which expression constructs its generator can
//! compile. The description is advisory (for documentation and capability
//! advertising); the generator itself remains the authority and rejects
//! anything it cannot express.

use serde::{Deserialize, Serialize};

use crate::expression::{ExpressionKind, StringOperator};

/// What a backend's generator supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Backend identifier.
    pub backend: String,

    /// Expression kinds the generator compiles.
    pub expression_kinds: Vec<ExpressionKind>,

    /// String operators the generator compiles.
    pub string_operators: Vec<StringOperator>,

    /// Whether case-insensitive string matching is available.
    pub ignore_case: bool,

    /// Whether `_history` searches are available.
    pub history: bool,

    /// Known approximations a client should be aware of.
    #[serde(default)]
    pub limitations: Vec<String>,
}

impl BackendCapabilities {
    /// Returns true if the generator compiles `kind`.
    pub fn supports(&self, kind: ExpressionKind) -> bool {
        self.expression_kinds.contains(&kind)
    }

    /// Returns true if the generator compiles `operator`.
    pub fn supports_string_operator(&self, operator: StringOperator) -> bool {
        self.string_operators.contains(&operator)
    }
}

/// Describes the capabilities of a backend.
pub trait CapabilityProvider {
    fn capabilities(&self) -> BackendCapabilities;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports() {
        let caps = BackendCapabilities {
            backend: "test".to_string(),
            expression_kinds: vec![ExpressionKind::Binary, ExpressionKind::Multiary],
            string_operators: vec![StringOperator::Equals],
            ignore_case: false,
            history: true,
            limitations: vec![],
        };

        assert!(caps.supports(ExpressionKind::Binary));
        assert!(!caps.supports(ExpressionKind::Chained));
        assert!(caps.supports_string_operator(StringOperator::Equals));
        assert!(!caps.supports_string_operator(StringOperator::Contains));
    }

    #[test]
    fn test_serializes_kinds_in_kebab_case() {
        let caps = BackendCapabilities {
            backend: "test".to_string(),
            expression_kinds: vec![ExpressionKind::MissingSearchParameter],
            string_operators: vec![],
            ignore_case: false,
            history: false,
            limitations: vec![],
        };
        let json = serde_json::to_value(&caps).unwrap();
        assert_eq!(json["expression_kinds"][0], "missing-search-parameter");
    }
}
