use actix_web::{middleware, web, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use version_manager::{
    chart::{ChartSources, IndexChartSource, OciChartSource},
    config::CliArgs,
    helm::HelmReleaseClient,
    orchestrator::UpgradeOrchestrator,
    repository::RepositoryManager,
    rest,
    store::{ConfigMapRecordStore, InMemoryRecordStore, MappingStore, RecordStore},
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(error) = run().await {
        error!(?error, "failed helm-version-manager");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = CliArgs::args();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = %args.namespace(),
        "helm-version-manager started"
    );

    let record_store: Arc<dyn RecordStore> = if args.in_memory_store() {
        info!("Keeping registry mappings in memory");
        Arc::new(InMemoryRecordStore::new())
    } else {
        Arc::new(
            ConfigMapRecordStore::new(args.namespace(), args.mappings_config_map())
                .await
                .context("failed to create the registry mappings store")?,
        )
    };
    let mappings = Arc::new(MappingStore::new(record_store));

    let engine = Arc::new(
        HelmReleaseClient::builder()
            .with_binary(args.helm_binary())
            .with_driver(args.helm_driver())
            .build(),
    );

    let cache_dir = args.repository_cache();
    let oci = OciChartSource::new(cache_dir.clone(), args.registry_timeout())
        .context("failed to create the OCI chart source")?
        .with_credentials(args.registry_username(), args.registry_password());
    let index = IndexChartSource::new(
        args.repository_config(),
        cache_dir.clone(),
        args.registry_timeout(),
    )
    .context("failed to create the repository index chart source")?;
    let sources = ChartSources::new()
        .with_source(Arc::new(oci))
        .with_source(Arc::new(index));

    let orchestrator = web::Data::new(UpgradeOrchestrator::new(engine, mappings, sources));
    let repositories = web::Data::new(
        RepositoryManager::new(
            args.repository_config(),
            cache_dir,
            args.registry_timeout(),
        )
        .context("failed to create the repository manager")?,
    );

    let address = args.socket_address();
    let app = move || {
        actix_web::App::new()
            .wrap(rest::cors())
            .wrap(middleware::Logger::default())
            .app_data(orchestrator.clone())
            .app_data(repositories.clone())
            .configure(rest::configure)
    };

    info!(%address, "Serving HTTP");
    HttpServer::new(app)
        .bind(address)
        .with_context(|| format!("failed to bind to {address}"))?
        .run()
        .await
        .context("HTTP server failed")?;

    Ok(())
}
