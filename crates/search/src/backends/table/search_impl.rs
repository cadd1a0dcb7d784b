//! Search execution for the table store backend.
//!
//! A plan is one filter run as a sequence of segmented queries. Segments are
//! accumulated until the page is full or the table is exhausted; the native
//! continuation of the last segment becomes the cursor of the next page.

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{SearchError, StorageResult};
use crate::expression::MultiaryOperator;
use crate::search::continuation;
use crate::search::{Combinable, CompileRequest, QueryOutcome, SearchBackend, SearchMode};

use super::BACKEND_NAME;
use super::backend::TableStoreBackend;
use super::client::{TableClient, TableContinuation};
use super::entity::{EntityValue, properties};
use super::filter::{Comparator, TableFilter};
use super::generator::TableGenerator;
use super::storage::entity_to_record;

/// A compiled table store query.
#[derive(Debug, Clone, PartialEq)]
pub struct TablePlan {
    pub filter: Option<TableFilter>,
    /// Page size; `None` for count-only plans.
    pub take: Option<usize>,
    pub mode: SearchMode,
    cursor: Option<TableContinuation>,
    fingerprint: String,
}

async fn guarded<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = StorageResult<T>>,
) -> StorageResult<T> {
    if cancel.is_cancelled() {
        return Err(SearchError::Cancelled.into());
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SearchError::Cancelled.into()),
        result = operation => result,
    }
}

impl<C: TableClient> TableStoreBackend<C> {
    /// Whether any entity at or after `from` matches the plan's filter.
    ///
    /// A segment continuation only marks where scanning stopped, so a full
    /// page is followed by bounded segments until a match or the end.
    async fn has_match_from(
        &self,
        plan: &TablePlan,
        from: &TableContinuation,
        cancel: &CancellationToken,
    ) -> StorageResult<bool> {
        let select = [properties::PARTITION_KEY.to_string()];
        let mut cursor = Some(from.clone());
        while let Some(next) = cursor {
            let segment = guarded(
                cancel,
                self.client()
                    .query_segmented(plan.filter.as_ref(), 1, Some(&select[..]), Some(&next)),
            )
            .await?;
            if !segment.entities.is_empty() {
                return Ok(true);
            }
            cursor = segment.continuation;
        }
        Ok(false)
    }

    async fn count(&self, plan: &TablePlan, cancel: &CancellationToken) -> StorageResult<u64> {
        let select = [
            properties::PARTITION_KEY.to_string(),
            properties::ROW_KEY.to_string(),
            properties::LAST_MODIFIED.to_string(),
        ];
        let mut count = 0u64;
        let mut cursor = None;
        loop {
            let segment = guarded(
                cancel,
                self.client().query_segmented(
                    plan.filter.as_ref(),
                    self.config().count_segment_size.max(1),
                    Some(&select[..]),
                    cursor.as_ref(),
                ),
            )
            .await?;
            count += segment.entities.len() as u64;
            cursor = segment.continuation;
            if cursor.is_none() {
                return Ok(count);
            }
        }
    }
}

#[async_trait]
impl<C: TableClient> SearchBackend for TableStoreBackend<C> {
    type Plan = TablePlan;

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<TablePlan, SearchError> {
        let generated = request
            .expression
            .map(|e| TableGenerator::new().compile(e))
            .transpose()?;

        let mut parts = Vec::new();
        if request.mode == SearchMode::Live {
            parts.push(TableFilter::condition(
                properties::IS_HISTORY,
                Comparator::Eq,
                EntityValue::Bool(false),
            ));
            parts.push(TableFilter::condition(
                properties::IS_DELETED,
                Comparator::Eq,
                EntityValue::Bool(false),
            ));
        }
        parts.extend(generated);

        let mut parts = parts.into_iter();
        let filter = parts.next().map(|first| {
            parts.fold(TableFilter::open(MultiaryOperator::And, first), |acc, next| {
                acc.push(MultiaryOperator::And, next)
            })
        });

        let fingerprint = continuation::query_fingerprint(&format!(
            "{:?}|{}",
            request.mode,
            filter.as_ref().map(ToString::to_string).unwrap_or_default()
        ));

        if request.count_only {
            return Ok(TablePlan {
                filter,
                take: None,
                mode: request.mode,
                cursor: None,
                fingerprint,
            });
        }

        let cursor = request
            .continuation_token
            .map(|token| {
                self.signer()
                    .decode::<TableContinuation>(token, BACKEND_NAME, &fingerprint)
            })
            .transpose()?;

        Ok(TablePlan {
            filter,
            take: Some(request.max_item_count.max(1)),
            mode: request.mode,
            cursor,
            fingerprint,
        })
    }

    async fn execute(
        &self,
        plan: TablePlan,
        cancel: &CancellationToken,
    ) -> StorageResult<QueryOutcome> {
        tracing::debug!(
            filter = %plan.filter.as_ref().map(ToString::to_string).unwrap_or_default(),
            "Executing table store search"
        );

        let Some(take) = plan.take else {
            let count = self.count(&plan, cancel).await?;
            return Ok(QueryOutcome {
                count: Some(count),
                ..Default::default()
            });
        };

        let mut entities = Vec::new();
        let mut cursor = plan.cursor.clone();
        loop {
            let segment = guarded(
                cancel,
                self.client().query_segmented(
                    plan.filter.as_ref(),
                    take - entities.len(),
                    None,
                    cursor.as_ref(),
                ),
            )
            .await?;
            entities.extend(segment.entities);
            cursor = segment.continuation;
            if entities.len() >= take || cursor.is_none() {
                break;
            }
        }
        if let Some(next) = &cursor {
            if !self.has_match_from(&plan, next, cancel).await? {
                cursor = None;
            }
        }

        let records = entities
            .iter()
            .map(entity_to_record)
            .collect::<StorageResult<Vec<_>>>()?;
        let continuation = cursor
            .map(|c| self.signer().encode(BACKEND_NAME, &plan.fingerprint, &c))
            .transpose()?;

        Ok(QueryOutcome {
            records,
            continuation,
            count: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResourceStore;
    use crate::expression::{Expression, FieldName};
    use crate::search::continuation::query_fingerprint;
    use crate::types::{IndexComponent, ResourceRecord, SearchIndexEntry};
    use serde_json::json;
    use std::sync::Arc;

    use crate::backends::table::{MemoryTableClient, TableStoreConfig};

    async fn backend_with_patients(n: usize, segment_size: usize) -> TableStoreBackend {
        let backend = TableStoreBackend::new(
            Arc::new(MemoryTableClient::with_segment_size(segment_size)),
            TableStoreConfig::default(),
        );
        for i in 0..n {
            let gender = if i % 2 == 0 { "female" } else { "male" };
            let record = ResourceRecord::new(
                "Patient",
                format!("p{:02}", i),
                "1",
                json!({"resourceType": "Patient"}),
            )
            .with_index(SearchIndexEntry::single(
                "gender",
                IndexComponent::new().with(FieldName::TokenCode, gender),
            ));
            backend.upsert(record, true).await.unwrap();
        }
        backend
    }

    fn female() -> Expression {
        Expression::search_parameter(
            "gender",
            Expression::string_equals(FieldName::TokenCode, "female", false),
        )
    }

    #[test]
    fn test_live_plan_filters_history_and_deleted() {
        let backend = TableStoreBackend::in_memory();
        let expr = female();
        let plan = backend.compile(&CompileRequest::new(Some(&expr), 10)).unwrap();
        assert_eq!(
            plan.filter.unwrap().to_string(),
            "(IsHistory eq false) and (IsDeleted eq false) and (s_gender_0_token_code eq 'female')"
        );

        let plan = backend
            .compile(&CompileRequest::new(None, 10).with_mode(SearchMode::History))
            .unwrap();
        assert!(plan.filter.is_none());
    }

    #[tokio::test]
    async fn test_pages_across_segments() {
        // Segments of 3 entities hold at most 2 matches each.
        let backend = backend_with_patients(10, 3).await;
        let expr = female();
        let cancel = CancellationToken::new();

        let mut ids = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let request = CompileRequest::new(Some(&expr), 2).with_continuation(token.as_deref());
            let plan = backend.compile(&request).unwrap();
            let outcome = backend.execute(plan, &cancel).await.unwrap();
            assert!(outcome.records.len() <= 2);
            ids.extend(outcome.records.into_iter().map(|r| r.resource_id));
            token = outcome.continuation;
            if token.is_none() {
                break;
            }
        }
        assert_eq!(ids, vec!["p00", "p02", "p04", "p06", "p08"]);
    }

    #[tokio::test]
    async fn test_full_last_page_has_no_token() {
        // p09 trails the last match and sits in its own segment.
        let backend = backend_with_patients(10, 3).await;
        let expr = female();
        let plan = backend.compile(&CompileRequest::new(Some(&expr), 5)).unwrap();
        let outcome = backend
            .execute(plan, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.records.len(), 5);
        assert!(outcome.continuation.is_none());
    }

    #[tokio::test]
    async fn test_count_only() {
        let backend = backend_with_patients(7, 2).await;
        let expr = female();
        let plan = backend
            .compile(&CompileRequest::new(Some(&expr), 1).count_only(true))
            .unwrap();
        let outcome = backend
            .execute(plan, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.count, Some(4));
        assert!(outcome.records.is_empty());
        assert!(outcome.continuation.is_none());
    }

    #[tokio::test]
    async fn test_foreign_token_rejected() {
        let backend = TableStoreBackend::in_memory();
        let token = backend
            .signer()
            .encode(
                "sqlite",
                &query_fingerprint("whatever"),
                &serde_json::json!({"last_surrogate_id": 1}),
            )
            .unwrap();
        let expr = female();
        let err = backend
            .compile(&CompileRequest::new(Some(&expr), 10).with_continuation(Some(&token)))
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidContinuationToken { .. }));
    }

    #[tokio::test]
    async fn test_rewound_cursor_rejected() {
        use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
        use sha2::{Digest, Sha256};

        let backend = backend_with_patients(14, 100).await;
        let expr = female();
        let cancel = CancellationToken::new();

        let plan = backend.compile(&CompileRequest::new(Some(&expr), 3)).unwrap();
        let first = backend.execute(plan, &cancel).await.unwrap();
        let token = first.continuation.unwrap();

        // Point the cursor back at the first row and re-hash without the key.
        let mut envelope: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(&token).unwrap()).unwrap();
        envelope["cursor"]["next_row_key"] = json!("p00");
        let mut hasher = Sha256::new();
        hasher.update([envelope["v"].as_u64().unwrap() as u8]);
        hasher.update(BACKEND_NAME.as_bytes());
        hasher.update([0]);
        hasher.update(envelope["query"].as_str().unwrap().as_bytes());
        hasher.update([0]);
        hasher.update(envelope["cursor"].to_string().as_bytes());
        envelope["tag"] = json!(hex::encode(hasher.finalize()));
        let forged = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&envelope).unwrap());

        let err = backend
            .compile(&CompileRequest::new(Some(&expr), 3).with_continuation(Some(&forged)))
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidContinuationToken { .. }));

        let plan = backend
            .compile(&CompileRequest::new(Some(&expr), 3).with_continuation(Some(&token)))
            .unwrap();
        let second = backend.execute(plan, &cancel).await.unwrap();
        let ids: Vec<_> = second.records.into_iter().map(|r| r.resource_id).collect();
        assert_eq!(ids, vec!["p06", "p08", "p10"]);
    }

    #[test]
    fn test_tokens_shared_through_configured_secret() {
        let client = Arc::new(MemoryTableClient::with_segment_size(100));
        let config = TableStoreConfig {
            token_secret: Some("cluster-secret".to_string()),
            ..Default::default()
        };
        let issuer = TableStoreBackend::new(Arc::clone(&client), config.clone());
        let peer = TableStoreBackend::new(client, config);
        let stranger = TableStoreBackend::in_memory();

        let cursor = TableContinuation {
            next_partition_key: "Patient".to_string(),
            next_row_key: "p02".to_string(),
        };
        let expr = female();
        let fingerprint = issuer.compile(&CompileRequest::new(Some(&expr), 2)).unwrap().fingerprint;
        let token = issuer.signer().encode(BACKEND_NAME, &fingerprint, &cursor).unwrap();

        let request = CompileRequest::new(Some(&expr), 2).with_continuation(Some(&token));
        assert_eq!(peer.compile(&request).unwrap().cursor, Some(cursor));
        assert!(stranger.compile(&request).is_err());
    }

    #[tokio::test]
    async fn test_cancelled_before_execution() {
        let backend = backend_with_patients(2, 10).await;
        let plan = backend.compile(&CompileRequest::new(None, 10)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = backend.execute(plan, &cancel).await.unwrap_err();
        assert_eq!(err.as_search(), Some(&SearchError::Cancelled));
    }
}
