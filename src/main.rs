use std::sync::Arc;

use dotenvy::dotenv;
use ledger_ingest::{
    infrastructure::{
        config::Config, db, documents::DocumentStore, state::AppState, upstream::UpstreamClient,
    },
    queue::consumer::BusConsumer,
    services::{catalog, catalog::DomainCatalog, replication::Replicator},
    telemetry,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(Config::from_env()?);
    telemetry::init(&config.opensearch, &config.ingestion.service_name);

    let pool = db::connect(&config).await?;
    db::run_migrations(&pool).await?;
    info!("database migrations completed successfully");

    catalog::seed_domains(&pool).await?;
    let domain_catalog = DomainCatalog::load(&pool).await?;
    info!(domains = domain_catalog.len(), "domain catalog loaded");

    let documents = DocumentStore::connect(&config.documents, &config.ingestion.service_name).await?;
    info!("connected to document store");

    let upstream = match config.upstream.service_account_path.as_deref() {
        Some(path) if !path.trim().is_empty() => {
            info!(path, "upstream sync-metadata push enabled");
            Some(UpstreamClient::from_file(path)?)
        }
        _ => None,
    };

    let state = Arc::new(AppState::new(
        Arc::clone(&config),
        pool,
        documents,
        domain_catalog,
        upstream,
    ));

    let consumer = BusConsumer::connect(&config.bus).await?;
    info!(queue = %config.bus.queue_name, "connected to message bus");

    let replicator = Replicator::new(Arc::clone(&state));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut worker = tokio::spawn(async move {
        let result = consumer.run(&replicator, shutdown_rx).await;
        (consumer, result)
    });

    tokio::select! {
        joined = &mut worker => {
            let (consumer, result) = joined?;
            let _ = consumer.close().await;
            result?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
            let (consumer, result) = worker.await?;
            if let Err(err) = result {
                warn!(error = ?err, "consumer exited with error");
            }
            if let Err(err) = consumer.close().await {
                warn!(error = ?err, "error closing bus connection");
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
