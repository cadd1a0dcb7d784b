//! Search execution for the SQLite backend.
//!
//! Plans select from `resources` (alias `r0`) with the compiled predicate,
//! ordered by surrogate id. Pages are keyset-paginated on the surrogate id:
//! the continuation cursor is the last id returned, and one extra row is
//! fetched to learn whether another page exists.

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params_from_iter;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{BackendError, SearchError, StorageError, StorageResult};
use crate::search::{TokenSigner, continuation};
use crate::search::{CompileRequest, QueryOutcome, SearchBackend, SearchMode};

use super::SqliteBackend;
use super::backend::BACKEND_NAME;
use super::generator::{SqlGenerator, SqlParam};
use super::storage::{RawRecord, record_columns};

/// Native cursor carried inside continuation tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct SqliteCursor {
    last_surrogate_id: i64,
}

/// A compiled SQLite query.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlitePlan {
    /// Complete statement, including paging clauses.
    pub sql: String,
    /// Bound parameters, in placeholder order.
    pub params: Vec<SqlParam>,
    /// Page size; `None` for count-only plans.
    pub take: Option<usize>,
    pub mode: SearchMode,
    fingerprint: String,
}

fn internal_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: BACKEND_NAME.to_string(),
        message,
        source: None,
    })
}

fn run_plan(
    pool: &Pool<SqliteConnectionManager>,
    signer: &TokenSigner,
    plan: &SqlitePlan,
) -> StorageResult<QueryOutcome> {
    let conn = pool.get().map_err(|e| {
        StorageError::Backend(BackendError::ConnectionFailed {
            backend_name: BACKEND_NAME.to_string(),
            message: e.to_string(),
        })
    })?;

    let Some(take) = plan.take else {
        let count: i64 = conn.query_row(&plan.sql, params_from_iter(plan.params.iter()), |row| {
            row.get(0)
        })?;
        return Ok(QueryOutcome {
            count: Some(count.max(0) as u64),
            ..Default::default()
        });
    };

    let mut stmt = conn.prepare(&plan.sql)?;
    let mut rows = stmt
        .query_map(params_from_iter(plan.params.iter()), RawRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let has_more = rows.len() > take;
    rows.truncate(take);
    let last_surrogate_id = rows.last().map(|r| r.surrogate_id);

    let records = rows
        .into_iter()
        .map(RawRecord::into_record)
        .collect::<StorageResult<Vec<_>>>()?;

    let continuation = match last_surrogate_id {
        Some(last_surrogate_id) if has_more => Some(signer.encode(
            BACKEND_NAME,
            &plan.fingerprint,
            &SqliteCursor { last_surrogate_id },
        )?),
        _ => None,
    };

    Ok(QueryOutcome {
        records,
        continuation,
        count: None,
    })
}

#[async_trait]
impl SearchBackend for SqliteBackend {
    type Plan = SqlitePlan;

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<SqlitePlan, SearchError> {
        let filter = request
            .expression
            .map(|e| SqlGenerator::new().compile(e))
            .transpose()?;

        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if request.mode == SearchMode::Live {
            clauses.push("r0.is_history = 0 AND r0.is_deleted = 0".to_string());
        }
        if let Some(filter) = filter {
            clauses.push(format!("({})", filter.sql));
            params.extend(filter.params);
        }

        let fingerprint = continuation::query_fingerprint(&format!(
            "{:?}|{}|{:?}",
            request.mode,
            clauses.join(" AND "),
            params
        ));

        if request.count_only {
            return Ok(SqlitePlan {
                sql: format!("SELECT COUNT(*) FROM resources r0{}", where_clause(&clauses)),
                params,
                take: None,
                mode: request.mode,
                fingerprint,
            });
        }

        let (keyset, order) = match request.mode {
            SearchMode::Live => (">", "ASC"),
            SearchMode::History => ("<", "DESC"),
        };
        if let Some(token) = request.continuation_token {
            let cursor: SqliteCursor = self.signer().decode(token, BACKEND_NAME, &fingerprint)?;
            clauses.push(format!("r0.surrogate_id {} ?", keyset));
            params.push(SqlParam::Integer(cursor.last_surrogate_id));
        }

        let take = request.max_item_count.max(1);
        params.push(SqlParam::Integer(take as i64 + 1));

        Ok(SqlitePlan {
            sql: format!(
                "SELECT {} FROM resources r0{} ORDER BY r0.surrogate_id {} LIMIT ?",
                record_columns("r0"),
                where_clause(&clauses),
                order
            ),
            params,
            take: Some(take),
            mode: request.mode,
            fingerprint,
        })
    }

    async fn execute(
        &self,
        plan: SqlitePlan,
        cancel: &CancellationToken,
    ) -> StorageResult<QueryOutcome> {
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled.into());
        }
        tracing::debug!(sql = %plan.sql, params = plan.params.len(), "Executing SQLite search");

        let pool = self.pool().clone();
        let signer = self.signer().clone();
        let task = tokio::task::spawn_blocking(move || run_plan(&pool, &signer, &plan));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SearchError::Cancelled.into()),
            joined = task => joined
                .map_err(|e| internal_error(format!("search task failed: {}", e)))?,
        }
    }
}

fn where_clause(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}
