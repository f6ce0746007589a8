use anyhow::{Context, Result};
use ide_api::{create_app, start_janitor_task, start_reconciler_task, AppState, Config};
use ide_orchestrator::db::{backup_database, create_pool, run_migrations};
use ide_orchestrator::{
    InMemoryCluster, OrchestratorConfig, StaticImageCatalog, WorkspaceOrchestrator,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Keep the guard alive so file output is flushed on exit
    let _log_guard = ide_logging::init_subscriber();

    info!("Starting ide-api service...");

    // Load configuration
    let config = Config::from_env();
    info!(
        "Configuration loaded: bind_addr={}, db_path={}",
        config.bind_addr,
        config.db_path.display()
    );

    let orchestrator_config = match &config.config_path {
        Some(path) => OrchestratorConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => {
            info!("IDE_API_CONFIG not set, using built-in orchestrator defaults");
            OrchestratorConfig::default()
        }
    };

    // Backup before migrations
    let db_path = &config.db_path;
    if let Some(backup_path) = backup_database(db_path)? {
        info!("Database backed up to: {}", backup_path.display());
    }

    let pool = create_pool(db_path).await?;
    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Migrations complete");

    // No cluster client ships with this binary yet: run against the
    // in-memory cluster so the API and lifecycle can be exercised end to end.
    warn!("Running in dry-run mode: cluster objects are kept in memory only");
    let cluster = Arc::new(InMemoryCluster::new());
    let images = Arc::new(StaticImageCatalog::new(orchestrator_config.images.clone()));
    let orchestrator =
        WorkspaceOrchestrator::new(pool, cluster, images, Arc::new(orchestrator_config));

    tokio::spawn(start_janitor_task(
        orchestrator.clone(),
        config.janitor_interval_secs,
    ));
    info!(
        "Janitor task started (interval: {}s)",
        config.janitor_interval_secs
    );

    tokio::spawn(start_reconciler_task(
        orchestrator.clone(),
        config.reconcile_interval_secs,
    ));
    info!(
        "Reconciler task started (interval: {}s)",
        config.reconcile_interval_secs
    );

    let app = create_app(AppState::new(orchestrator)).await?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
