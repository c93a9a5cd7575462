//! Generation record storage.
//!
//! The orchestrator and the intake/status service only see the narrow
//! [`GenerationStore`] contract: create, partial update by key, and read by key.
//! Implementations must tolerate concurrent callers working on different keys;
//! no cross-key transactions are required.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use imagegen_core::{
    DomainError, GenerationId, GenerationPatch, GenerationRecord, GenerationStatus, NewGeneration,
};

pub use in_memory::InMemoryGenerationStore;
pub use postgres::PostgresGenerationStore;

/// Store operation error.
///
/// These are **infrastructure errors**; lifecycle violations detected by the
/// store surface as `InvalidTransition`.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("generation not found: {0}")]
    NotFound(GenerationId),

    #[error("generation already exists: {0}")]
    AlreadyExists(GenerationId),

    #[error("invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: GenerationId,
        from: GenerationStatus,
        to: GenerationStatus,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub(crate) fn from_domain(id: &GenerationId, err: DomainError) -> Self {
        match err {
            DomainError::InvalidTransition { from, to } => StoreError::InvalidTransition {
                id: id.clone(),
                from,
                to,
            },
            DomainError::NotFound => StoreError::NotFound(id.clone()),
            DomainError::Validation(msg) => StoreError::Storage(msg),
        }
    }
}

/// Durable keyed storage for generation records.
#[async_trait]
pub trait GenerationStore: Send + Sync {
    /// Persist a new `PENDING` record with zero attempts.
    async fn create(&self, new: NewGeneration) -> Result<GenerationRecord, StoreError>;

    /// Apply a partial update and refresh `updated_at`.
    ///
    /// Fails with `NotFound` when the key is absent and with
    /// `InvalidTransition` when the patch would reverse a terminal status.
    async fn update(
        &self,
        id: &GenerationId,
        patch: GenerationPatch,
    ) -> Result<GenerationRecord, StoreError>;

    /// Read a record by key.
    async fn find_by_id(&self, id: &GenerationId) -> Result<Option<GenerationRecord>, StoreError>;
}

#[async_trait]
impl<S> GenerationStore for Arc<S>
where
    S: GenerationStore + ?Sized,
{
    async fn create(&self, new: NewGeneration) -> Result<GenerationRecord, StoreError> {
        (**self).create(new).await
    }

    async fn update(
        &self,
        id: &GenerationId,
        patch: GenerationPatch,
    ) -> Result<GenerationRecord, StoreError> {
        (**self).update(id, patch).await
    }

    async fn find_by_id(&self, id: &GenerationId) -> Result<Option<GenerationRecord>, StoreError> {
        (**self).find_by_id(id).await
    }
}
