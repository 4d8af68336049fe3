use anyhow::{Context, Result};
use clap::Parser;
use consultation_capture::{
    create_router, AppState, Config, ConsultationStore, Database, IngestionService, StaticTokens,
    StorageResolver,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "consultation-capture", version, about = "Consultation recording ingestion server")]
struct Args {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = "config/consultation-capture")]
    config: String,

    /// Override the configured HTTP port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    if cfg.is_development() {
        warn!("Development mode: error detail is included in API responses");
    }

    let db = Database::open(cfg.database_path())?;
    let resolver = StorageResolver::new(db.clone(), cfg.storage.clone());
    let root = resolver
        .resolve()
        .await
        .context("Storage root is not usable")?;
    info!("Storage root: {}", root.display());

    let store = ConsultationStore::new(db);
    let ingestion = IngestionService::new(resolver, store, cfg.ingestion.timeouts());

    let principals = StaticTokens::from_grants(&cfg.auth.tokens);
    if principals.is_empty() {
        warn!("No API tokens configured; authenticated routes will answer 401");
    } else {
        info!("Loaded {} API tokens", principals.len());
    }

    let state = AppState::new(ingestion, Arc::new(principals)).with_error_detail(cfg.is_development());
    let app = create_router(state);

    let port = args.port.unwrap_or(cfg.service.http.port);
    let addr = format!("{}:{}", cfg.service.http.bind, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
