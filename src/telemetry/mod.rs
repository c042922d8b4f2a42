use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::infrastructure::config::OpenSearchConfig;

pub mod opensearch;

static TELEMETRY: OnceLock<()> = OnceLock::new();

/// Installs the tracing registry: env-filtered JSON output on stdout, plus
/// the best-effort OpenSearch shipping layer when one is configured. Must
/// run inside the tokio runtime so the shipper task can spawn.
pub fn init(config: &OpenSearchConfig, service_name: &str) {
    TELEMETRY.get_or_init(|| {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let registry = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json());

        match opensearch::layer(config, service_name) {
            Some(shipper) => registry.with(shipper).init(),
            None => registry.init(),
        }
    });
}
