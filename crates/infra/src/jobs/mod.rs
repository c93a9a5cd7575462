//! Background generation runs.
//!
//! ## Components
//!
//! - `retry`: failure classification and backoff delays
//! - `orchestrator`: the per-request attempt loop
//! - `spawner`: how intake launches runs without awaiting them

pub mod orchestrator;
pub mod retry;
pub mod spawner;

pub use orchestrator::{GenerationOrchestrator, RunOutcome};
pub use retry::{classify, HasStatusCode, Retriability, RetryPolicy};
pub use spawner::{BoxedTask, CollectingSpawner, TaskSpawner, TokioSpawner};
