use crate::config::OrchestratorConfig;
use crate::image::StaticImageCatalog;
use crate::memory::InMemoryCluster;
use crate::naming::{NamingScheme, SequenceInstanceIds};
use crate::orchestrator::WorkspaceOrchestrator;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

pub const TEST_IMAGE: &str = "img-py312";

/// Helper to create an in-memory test database with migrations applied
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Default configuration with one known image.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        images: HashMap::from([(
            TEST_IMAGE.to_string(),
            "registry.local/ide/python:3.12".to_string(),
        )]),
        ..OrchestratorConfig::default()
    }
}

/// Orchestrator over an in-memory database and the given cluster double.
/// Instance ids are handed out from `ids`, then counted upward.
pub async fn test_orchestrator(
    cluster: Arc<InMemoryCluster>,
    config: OrchestratorConfig,
    ids: &[&str],
) -> WorkspaceOrchestrator {
    let pool = create_test_db().await;
    let images = Arc::new(StaticImageCatalog::new(config.images.clone()));
    let naming = NamingScheme::new(Arc::new(SequenceInstanceIds::new(ids.iter().copied())));

    WorkspaceOrchestrator::new(pool, cluster, images, Arc::new(config)).with_naming(naming)
}
