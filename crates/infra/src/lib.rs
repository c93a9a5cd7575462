//! Infrastructure layer: record storage, the remote worker client, retry
//! orchestration, and configuration.

pub mod config;
pub mod generation_service;
pub mod jobs;
pub mod remote;
pub mod store;

pub use config::{ConfigError, GenerationConfig};
pub use generation_service::{GenerationAccepted, GenerationService, IntakeError, LookupError};
