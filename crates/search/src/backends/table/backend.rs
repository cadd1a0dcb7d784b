//! Table store backend.

use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{BackendCapabilities, CapabilityProvider};
use crate::expression::{ExpressionKind, StringOperator};
use crate::search::TokenSigner;

use super::BACKEND_NAME;
use super::client::{MemoryTableClient, TableClient};

/// Configuration for the table store backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStoreConfig {
    /// Name of the table holding resource entities.
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Entities requested per segment when counting.
    #[serde(default = "default_count_segment_size")]
    pub count_segment_size: usize,

    /// Secret signing continuation tokens; random per backend when unset.
    #[serde(default, skip_serializing)]
    pub token_secret: Option<String>,
}

fn default_table_name() -> String {
    "fhir".to_string()
}

fn default_count_segment_size() -> usize {
    1000
}

impl Default for TableStoreConfig {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            count_segment_size: default_count_segment_size(),
            token_secret: None,
        }
    }
}

/// Search and storage over a partitioned key/value table.
///
/// Resources are partitioned by type and keyed by id; superseded versions
/// are re-keyed `<id>_<version>` and flagged `IsHistory`.
pub struct TableStoreBackend<C = MemoryTableClient> {
    client: Arc<C>,
    config: TableStoreConfig,
    signer: TokenSigner,
}

impl<C> Debug for TableStoreBackend<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableStoreBackend")
            .field("table_name", &self.config.table_name)
            .field("count_segment_size", &self.config.count_segment_size)
            .finish_non_exhaustive()
    }
}

impl TableStoreBackend<MemoryTableClient> {
    /// A backend over a fresh in-memory table.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTableClient::new()), TableStoreConfig::default())
    }
}

impl<C: TableClient> TableStoreBackend<C> {
    pub fn new(client: Arc<C>, config: TableStoreConfig) -> Self {
        tracing::info!(table = %config.table_name, "Opened table store search backend");
        let signer = TokenSigner::from_config(config.token_secret.as_deref());
        Self {
            client,
            config,
            signer,
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn config(&self) -> &TableStoreConfig {
        &self.config
    }

    pub(crate) fn signer(&self) -> &TokenSigner {
        &self.signer
    }
}

impl<C> CapabilityProvider for TableStoreBackend<C> {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            backend: BACKEND_NAME.to_string(),
            expression_kinds: vec![
                ExpressionKind::SearchParameter,
                ExpressionKind::Binary,
                ExpressionKind::String,
                ExpressionKind::Multiary,
            ],
            string_operators: vec![StringOperator::Equals, StringOperator::StartsWith],
            ignore_case: false,
            history: true,
            limitations: vec![
                "starts-with is evaluated as an exact match".to_string(),
                "only the first index entry of a parameter is searchable".to_string(),
            ],
        }
    }
}
