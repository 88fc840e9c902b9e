//! mms-api server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mms_api::{router, AppState, Authenticator, JwtConfig, ServerConfig};
use mms_engine::{Engine, EngineConfig};
use mms_jobs::{maintenance_channel, Janitor, JanitorConfig, MaintenanceWorker, WorkerConfig};
use mms_core::SparqlStore;
use mms_store::{HttpLoadService, HttpSparqlStore, MemorySparqlStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI").ok().map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mms_api=debug,mms_engine=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("mms-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let server = ServerConfig::from_env();
    let engine_config = EngineConfig::from_env();
    let worker_config = WorkerConfig::from_env();
    let janitor_config = JanitorConfig::from_env();
    let auth = Authenticator::new(&JwtConfig::from_env()?);

    // MMS_STORE_BACKEND - "http" (default) or "memory" for an embedded store
    let store: Arc<dyn SparqlStore> = match std::env::var("MMS_STORE_BACKEND").as_deref() {
        Ok("memory") => {
            warn!("Using the in-memory store; data is lost on shutdown");
            Arc::new(MemorySparqlStore::new()?)
        }
        _ => {
            let http = HttpSparqlStore::from_env()?;
            info!(query_url = %http.config().query_url, "Using SPARQL endpoint");
            Arc::new(http)
        }
    };
    info!(
        root_context = %engine_config.root_context,
        glomar = engine_config.glomar,
        "Store configured"
    );

    let (scheduler, queue) = maintenance_channel(worker_config.queue_capacity);
    let mut engine = Engine::new(store, Arc::new(scheduler), engine_config);
    match HttpLoadService::from_env()? {
        Some(loader) => {
            info!("Load service configured; model uploads are staged by URL");
            engine = engine.with_load_service(Arc::new(loader));
        }
        None => info!("No load service configured; model uploads are inlined"),
    }
    let engine = Arc::new(engine);

    match engine.bootstrap().await {
        Ok(count) => info!(root_groups = count, "Cluster bootstrap complete"),
        Err(e) => warn!(error = %e, "Cluster bootstrap failed; root policies may be missing"),
    }

    let worker = MaintenanceWorker::new(engine.clone(), queue, worker_config).start();
    let janitor = Janitor::new(engine.clone(), janitor_config).start();

    let app = router(AppState::new(engine, auth), &server);

    let addr: SocketAddr = format!("{}:{}", server.host, server.port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    if let Err(e) = janitor.shutdown().await {
        warn!(error = %e, "Janitor already stopped");
    }
    if let Err(e) = worker.shutdown().await {
        warn!(error = %e, "Maintenance worker already stopped");
    }
    Ok(())
}
