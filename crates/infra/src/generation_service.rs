//! Intake and status lookup: the synchronous read/write path.
//!
//! Intake creates the `PENDING` record, hands the run to a [`TaskSpawner`] and
//! returns the identifier immediately. Status lookup projects the stored record
//! into a [`GenerationStatusView`]. Neither path ever waits on the remote worker.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use imagegen_core::{GenerationId, GenerationStatusView, NewGeneration};

use crate::jobs::{GenerationOrchestrator, RetryPolicy, TaskSpawner};
use crate::remote::GenerationClient;
use crate::store::{GenerationStore, StoreError};

pub type SharedStore = Arc<dyn GenerationStore>;
pub type SharedClient = Arc<dyn GenerationClient>;
pub type SharedOrchestrator = GenerationOrchestrator<SharedStore, SharedClient>;

/// Response of a successful intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationAccepted {
    pub request_id: GenerationId,
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("{0}")]
    Validation(String),

    /// The record could not be created; no run was started.
    #[error("failed to initiate image generation")]
    Create(#[source] StoreError),
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("generation not found: {0}")]
    NotFound(GenerationId),

    #[error(transparent)]
    Store(StoreError),
}

/// Entry point used by the HTTP layer.
#[derive(Clone)]
pub struct GenerationService {
    store: SharedStore,
    orchestrator: Arc<SharedOrchestrator>,
    spawner: Arc<dyn TaskSpawner>,
}

impl GenerationService {
    pub fn new(
        store: SharedStore,
        client: SharedClient,
        policy: RetryPolicy,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Self {
        let orchestrator = GenerationOrchestrator::new(store.clone(), client, policy);
        Self {
            store,
            orchestrator: Arc::new(orchestrator),
            spawner,
        }
    }

    /// Create a `PENDING` record and launch its orchestration run detached.
    #[instrument(skip(self, prompt), fields(prompt_len = prompt.len()), err)]
    pub async fn intake(&self, prompt: &str) -> Result<GenerationAccepted, IntakeError> {
        if prompt.trim().is_empty() {
            return Err(IntakeError::Validation("prompt must not be empty".to_string()));
        }

        let record = self
            .store
            .create(NewGeneration::new(prompt))
            .await
            .map_err(IntakeError::Create)?;

        let orchestrator = Arc::clone(&self.orchestrator);
        let request_id = record.id.clone();
        let prompt = record.prompt;
        self.spawner.spawn(Box::pin(async move {
            orchestrator.run(&prompt, &request_id).await;
        }));

        info!(request_id = %record.id, "generation accepted");
        Ok(GenerationAccepted {
            request_id: record.id,
        })
    }

    /// Current state of a request. `resultPayload` is present only once `COMPLETE`.
    #[instrument(skip(self), err)]
    pub async fn status(&self, raw_id: &str) -> Result<GenerationStatusView, LookupError> {
        let id = GenerationId::parse(raw_id)
            .map_err(|e| LookupError::InvalidInput(e.to_string()))?;

        match self.store.find_by_id(&id).await.map_err(LookupError::Store)? {
            Some(record) => {
                debug!(request_id = %id, status = %record.status, "generation found");
                Ok(record.into())
            }
            None => Err(LookupError::NotFound(id)),
        }
    }
}
