//! Infrastructure wiring: picks the store, worker client and spawner from config.

use std::sync::Arc;

use anyhow::Context;

use imagegen_infra::{
    jobs::{TaskSpawner, TokioSpawner},
    remote::HttpGenerationClient,
    store::{InMemoryGenerationStore, PostgresGenerationStore},
    GenerationConfig, GenerationService,
};
use imagegen_infra::generation_service::SharedStore;

/// Shared handles available to every handler.
#[derive(Clone)]
pub struct AppServices {
    pub generation: GenerationService,
}

impl AppServices {
    pub fn new(generation: GenerationService) -> Self {
        Self { generation }
    }
}

/// Build production services from a loaded configuration.
///
/// Without `DATABASE_URL` the in-memory store is used; records are then lost
/// on restart.
pub async fn build_services(config: GenerationConfig) -> anyhow::Result<AppServices> {
    let store: SharedStore = match config.database_url.as_deref() {
        Some(url) => {
            let store = PostgresGenerationStore::connect(url)
                .await
                .context("failed to connect generation store")?;
            tracing::info!("using postgres generation store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory generation store (local use only)");
            InMemoryGenerationStore::arc()
        }
    };

    let client = HttpGenerationClient::new(&config.worker_url, config.request_timeout)
        .context("failed to build worker client")?;
    tracing::info!(
        worker_url = %config.worker_url,
        max_attempts = config.retry.max_attempts(),
        "generation worker configured"
    );

    let spawner: Arc<dyn TaskSpawner> = Arc::new(TokioSpawner);
    let generation = GenerationService::new(store, Arc::new(client), config.retry, spawner);

    Ok(AppServices::new(generation))
}
