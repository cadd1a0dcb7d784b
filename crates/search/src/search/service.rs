//! The search orchestrator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::error::{SearchError, StorageResult};
use crate::expression::{Expression, MultiaryOperator};
use crate::types::ResourceRecord;

use super::backend::{CompileRequest, SearchBackend, SearchMode};

/// Per-request search options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Requested page size; bounded by [`SearchConfig`].
    pub max_item_count: Option<usize>,
    /// Token returned with the previous page.
    pub continuation_token: Option<String>,
    /// Only count matches.
    pub count_only: bool,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_item_count(mut self, count: usize) -> Self {
        self.max_item_count = Some(count);
        self
    }

    pub fn with_continuation_token(mut self, token: impl Into<String>) -> Self {
        self.continuation_token = Some(token.into());
        self
    }

    pub fn count_only(mut self) -> Self {
        self.count_only = true;
        self
    }
}

/// A search parameter the backend could not apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsupportedParameter {
    pub name: String,
    pub reason: String,
}

/// Records of one page, consumed once.
#[derive(Debug)]
pub struct RecordStream {
    inner: std::vec::IntoIter<ResourceRecord>,
}

impl RecordStream {
    pub(crate) fn new(records: Vec<ResourceRecord>) -> Self {
        Self {
            inner: records.into_iter(),
        }
    }

    /// A stream with no records.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Iterator for RecordStream {
    type Item = ResourceRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for RecordStream {}

/// Uniform search result envelope.
#[derive(Debug)]
pub struct SearchResult {
    /// Total matches, set only for count-only searches.
    pub count: Option<u64>,
    pub records: RecordStream,
    /// Parameters dropped because the backend cannot apply them.
    pub unsupported_parameters: Vec<UnsupportedParameter>,
    /// Token for the next page; `None` on the last page.
    pub continuation_token: Option<String>,
}

/// Runs searches against one backend.
///
/// The service bounds the page size, hands the expression to the backend's
/// generator and wraps the outcome. When the backend cannot express a
/// conjunct of the top-level `And`, that conjunct is dropped and reported in
/// [`SearchResult::unsupported_parameters`]; an unsupported root predicate
/// fails the request instead, since dropping it would widen the result.
#[derive(Debug)]
pub struct SearchService<B> {
    backend: Arc<B>,
    config: SearchConfig,
}

impl<B> Clone for SearchService<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
        }
    }
}

impl<B: SearchBackend> SearchService<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_config(backend, SearchConfig::default())
    }

    pub fn with_config(backend: Arc<B>, config: SearchConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Searches current, non-deleted records.
    pub async fn search(
        &self,
        expression: Option<&Expression>,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> StorageResult<SearchResult> {
        self.run(expression, options, SearchMode::Live, cancel).await
    }

    /// Searches every stored version, including deleted ones.
    ///
    /// SQLite returns versions newest first; the table store returns them in
    /// key order.
    pub async fn search_history(
        &self,
        expression: Option<&Expression>,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> StorageResult<SearchResult> {
        self.run(expression, options, SearchMode::History, cancel)
            .await
    }

    async fn run(
        &self,
        expression: Option<&Expression>,
        options: &SearchOptions,
        mode: SearchMode,
        cancel: &CancellationToken,
    ) -> StorageResult<SearchResult> {
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled.into());
        }

        let request = CompileRequest::new(expression, self.config.page_size(options.max_item_count))
            .with_mode(mode)
            .with_continuation(options.continuation_token.as_deref())
            .count_only(options.count_only);

        let (plan, unsupported_parameters) = self.compile_pruned(&request)?;
        debug!(backend = self.backend.name(), ?plan, "compiled search");

        let outcome = self.backend.execute(plan, cancel).await?;

        if options.count_only {
            return Ok(SearchResult {
                count: Some(outcome.count.unwrap_or_default()),
                records: RecordStream::empty(),
                unsupported_parameters,
                continuation_token: None,
            });
        }

        Ok(SearchResult {
            count: None,
            records: RecordStream::new(outcome.records),
            unsupported_parameters,
            continuation_token: outcome.continuation,
        })
    }

    /// Compiles the request, dropping unsupported top-level conjuncts.
    fn compile_pruned(
        &self,
        request: &CompileRequest<'_>,
    ) -> Result<(B::Plan, Vec<UnsupportedParameter>), SearchError> {
        let err = match self.backend.compile(request) {
            Ok(plan) => return Ok((plan, Vec::new())),
            Err(err) if err.is_unsupported() => err,
            Err(err) => return Err(err),
        };

        let Some(Expression::Multiary(root)) = request.expression else {
            return Err(err);
        };
        if root.operator() != MultiaryOperator::And {
            return Err(err);
        }

        let mut kept = Vec::new();
        let mut dropped = Vec::new();
        for child in root.expressions() {
            let single = request.with_expression(Some(child)).with_continuation(None);
            match self.backend.compile(&single) {
                Ok(_) => kept.push(child.clone()),
                Err(SearchError::UnsupportedExpression { reason, kind, .. }) => {
                    let name = child.parameter_label();
                    warn!(
                        backend = self.backend.name(),
                        parameter = %name,
                        %kind,
                        "dropping unsupported search parameter: {}",
                        reason
                    );
                    dropped.push(UnsupportedParameter { name, reason });
                }
                Err(other) => return Err(other),
            }
        }

        if kept.is_empty() {
            return Err(err);
        }

        let pruned = Expression::and(kept)?;
        let plan = self.backend.compile(&request.with_expression(Some(&pruned)))?;
        Ok((plan, dropped))
    }
}
