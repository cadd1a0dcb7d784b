//! Search service configuration.

use serde::{Deserialize, Serialize};

/// Page sizing for the search orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Page size used when the request does not ask for one.
    #[serde(default = "default_max_item_count")]
    pub default_max_item_count: usize,

    /// Upper bound on the page size a request may ask for.
    #[serde(default = "default_max_item_count_limit")]
    pub max_item_count: usize,
}

fn default_max_item_count() -> usize {
    10
}

fn default_max_item_count_limit() -> usize {
    100
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_max_item_count: default_max_item_count(),
            max_item_count: default_max_item_count_limit(),
        }
    }
}

impl SearchConfig {
    /// Resolves the effective page size for a request.
    ///
    /// Missing or zero requests fall back to the default; larger requests are
    /// clamped to the limit.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        let size = match requested {
            Some(0) | None => self.default_max_item_count,
            Some(n) => n,
        };
        size.clamp(1, self.max_item_count.max(1))
    }
}
