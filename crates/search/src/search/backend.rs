//! The contract between the orchestrator and a storage backend.

use std::fmt::Debug;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{SearchError, StorageResult};
use crate::expression::Expression;
use crate::types::ResourceRecord;

/// Which versions of a resource a search sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchMode {
    /// Current, non-deleted versions only.
    Live,
    /// Every stored version, including deletion tombstones.
    History,
}

/// Input to [`SearchBackend::compile`].
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    /// Root predicate, or `None` to match everything the mode allows.
    pub expression: Option<&'a Expression>,
    pub mode: SearchMode,
    /// Page size. Ignored for count-only requests.
    pub max_item_count: usize,
    /// Token returned with the previous page.
    pub continuation_token: Option<&'a str>,
    pub count_only: bool,
}

impl<'a> CompileRequest<'a> {
    /// A first-page live search.
    pub fn new(expression: Option<&'a Expression>, max_item_count: usize) -> Self {
        Self {
            expression,
            mode: SearchMode::Live,
            max_item_count,
            continuation_token: None,
            count_only: false,
        }
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_continuation(mut self, token: Option<&'a str>) -> Self {
        self.continuation_token = token;
        self
    }

    pub fn count_only(mut self, count_only: bool) -> Self {
        self.count_only = count_only;
        self
    }

    /// The same request with a different root expression.
    pub fn with_expression(&self, expression: Option<&'a Expression>) -> Self {
        Self {
            expression,
            ..self.clone()
        }
    }
}

/// Raw result of executing a plan.
#[derive(Debug, Default)]
pub struct QueryOutcome {
    /// Records of the page. Empty for count-only plans.
    pub records: Vec<ResourceRecord>,
    /// Opaque token for the next page, if more rows exist.
    pub continuation: Option<String>,
    /// Total matching rows, for count-only plans.
    pub count: Option<u64>,
}

/// A storage backend able to compile and run search expressions.
///
/// Compilation is synchronous and pure: the same request always yields an
/// equal plan. Execution is async, observes the cancellation token before
/// every backend call, and races each call against it.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Backend-native query.
    type Plan: Debug + Clone + PartialEq + Send + Sync;

    /// Short backend identifier, used in errors and tokens.
    fn name(&self) -> &'static str;

    /// Compiles a request into a native plan.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::UnsupportedExpression`] if the expression uses
    /// a construct the backend cannot express, and
    /// [`SearchError::InvalidContinuationToken`] if the token does not belong
    /// to this query.
    fn compile(&self, request: &CompileRequest<'_>) -> Result<Self::Plan, SearchError>;

    /// Executes a compiled plan.
    async fn execute(
        &self,
        plan: Self::Plan,
        cancel: &CancellationToken,
    ) -> StorageResult<QueryOutcome>;
}
