//! In-memory generation store for tests/dev.
//!
//! Records live only as long as the process; the binary falls back to it when no
//! database is configured, which is meant for local runs only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use imagegen_core::{GenerationId, GenerationPatch, GenerationRecord, NewGeneration};

use super::{GenerationStore, StoreError};

/// In-memory generation store.
///
/// A store built with [`with_patch_log`](Self::with_patch_log) also keeps an
/// ordered log of every patch that was successfully applied, so tests can
/// assert on the exact write sequence. The log is unbounded.
#[derive(Debug, Default)]
pub struct InMemoryGenerationStore {
    records: RwLock<HashMap<GenerationId, GenerationRecord>>,
    applied: Option<Mutex<Vec<(GenerationId, GenerationPatch)>>>,
    reads: AtomicUsize,
}

impl InMemoryGenerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that records applied patches for [`applied_patches`](Self::applied_patches).
    pub fn with_patch_log() -> Self {
        Self {
            applied: Some(Mutex::new(Vec::new())),
            ..Self::default()
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Patches applied to `id`, oldest first. Always empty without a patch log.
    pub fn applied_patches(&self, id: &GenerationId) -> Vec<GenerationPatch> {
        let Some(applied) = &self.applied else {
            return Vec::new();
        };
        applied
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key == id)
            .map(|(_, patch)| patch.clone())
            .collect()
    }

    /// Number of `find_by_id` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl GenerationStore for InMemoryGenerationStore {
    async fn create(&self, new: NewGeneration) -> Result<GenerationRecord, StoreError> {
        let mut records = self.records.write().unwrap();
        if records.contains_key(&new.id) {
            return Err(StoreError::AlreadyExists(new.id));
        }
        let record = GenerationRecord::pending(new, Utc::now());
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        id: &GenerationId,
        patch: GenerationPatch,
    ) -> Result<GenerationRecord, StoreError> {
        let mut records = self.records.write().unwrap();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        record
            .apply(&patch, Utc::now())
            .map_err(|e| StoreError::from_domain(id, e))?;
        let updated = record.clone();

        if let Some(applied) = &self.applied {
            applied.lock().unwrap().push((id.clone(), patch));
        }
        Ok(updated)
    }

    async fn find_by_id(&self, id: &GenerationId) -> Result<Option<GenerationRecord>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.read().unwrap().get(id).cloned())
    }
}
