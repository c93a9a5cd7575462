//! `imagegen-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod generation;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use generation::{
    truncate_error, GenerationPatch, GenerationRecord, GenerationStatus, GenerationStatusView,
    NewGeneration, MAX_ERROR_LEN,
};
pub use id::GenerationId;
