//! Backend construction and paging helpers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use helios_search::backends::table::{MemoryTableClient, TableStoreBackend, TableStoreConfig};
use helios_search::expression::Expression;
use helios_search::types::ResourceRecord;
use helios_search::{ResourceStore, SearchBackend, SearchOptions, SearchService};

#[cfg(feature = "sqlite")]
use helios_search::backends::sqlite::SqliteBackend;

/// Installs a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(feature = "sqlite")]
pub fn sqlite_backend() -> Arc<SqliteBackend> {
    init_tracing();
    let backend = SqliteBackend::in_memory().expect("Failed to create SQLite backend");
    backend.init_schema().expect("Failed to initialize schema");
    Arc::new(backend)
}

/// A table store whose segments scan at most `segment_size` entities.
pub fn table_backend(segment_size: usize) -> Arc<TableStoreBackend> {
    init_tracing();
    Arc::new(TableStoreBackend::new(
        Arc::new(MemoryTableClient::with_segment_size(segment_size)),
        TableStoreConfig::default(),
    ))
}

pub async fn store_all<S: ResourceStore>(store: &S, records: Vec<ResourceRecord>) {
    for record in records {
        store
            .upsert(record, true)
            .await
            .expect("Failed to store record");
    }
}

/// Follows continuation tokens to the end and returns every page's ids.
pub async fn collect_pages<B: SearchBackend>(
    service: &SearchService<B>,
    expression: Option<&Expression>,
    page_size: usize,
) -> Vec<Vec<String>> {
    let cancel = CancellationToken::new();
    let mut pages = Vec::new();
    let mut options = SearchOptions::new().with_max_item_count(page_size);
    loop {
        let result = service
            .search(expression, &options, &cancel)
            .await
            .expect("search failed");
        pages.push(result.records.map(|r| r.resource_id).collect());
        match result.continuation_token {
            Some(token) => {
                options = SearchOptions::new()
                    .with_max_item_count(page_size)
                    .with_continuation_token(token)
            }
            None => return pages,
        }
    }
}

/// Ids of the first page.
pub async fn search_ids<B: SearchBackend>(
    service: &SearchService<B>,
    expression: &Expression,
) -> Vec<String> {
    let result = service
        .search(
            Some(expression),
            &SearchOptions::new().with_max_item_count(100),
            &CancellationToken::new(),
        )
        .await
        .expect("search failed");
    let mut ids: Vec<String> = result.records.map(|r| r.resource_id).collect();
    ids.sort();
    ids
}
