use std::sync::Arc;

use crate::infrastructure::config::Config;
use crate::infrastructure::db::PgPool;
use crate::infrastructure::documents::DocumentStore;
use crate::infrastructure::upstream::UpstreamClient;
use crate::services::catalog::DomainCatalog;

/// Shared state handed to the replication services: configuration, the
/// relational pool, the document store, the read-only domain catalog and
/// the optional upstream push client.
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub documents: DocumentStore,
    pub catalog: DomainCatalog,
    pub upstream: Option<UpstreamClient>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        pool: PgPool,
        documents: DocumentStore,
        catalog: DomainCatalog,
        upstream: Option<UpstreamClient>,
    ) -> Self {
        Self {
            config,
            pool,
            documents,
            catalog,
            upstream,
        }
    }
}
