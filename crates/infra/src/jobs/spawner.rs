//! Detached task launching.
//!
//! Intake hands orchestration runs to a [`TaskSpawner`] and never awaits them.
//! Production uses [`TokioSpawner`]; tests swap in [`CollectingSpawner`] to
//! join every launched run deterministically.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tracing::warn;

/// A unit of detached work.
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub trait TaskSpawner: Send + Sync {
    /// Start `task` without waiting for it.
    fn spawn(&self, task: BoxedTask);
}

/// Spawns onto the ambient tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, task: BoxedTask) {
        tokio::spawn(task);
    }
}

/// Spawns onto tokio and keeps the handles so tests can wait for completion.
#[derive(Debug, Default)]
pub struct CollectingSpawner {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl CollectingSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks launched and not yet joined.
    pub fn pending(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    /// Await every task launched so far (including ones launched while waiting).
    pub async fn join_all(&self) {
        loop {
            let batch: Vec<_> = std::mem::take(&mut *self.handles.lock().unwrap());
            if batch.is_empty() {
                return;
            }
            for handle in batch {
                if let Err(e) = handle.await {
                    warn!(error = %e, "background task did not finish cleanly");
                }
            }
        }
    }
}

impl TaskSpawner for CollectingSpawner {
    fn spawn(&self, task: BoxedTask) {
        let handle = tokio::spawn(task);
        self.handles.lock().unwrap().push(handle);
    }
}
