//! Generation record: the unit of work and its audit trail.
//!
//! A record is created `PENDING` by intake and afterwards mutated only through
//! [`GenerationPatch`]es applied by the orchestrator. Status is monotonic:
//!
//! ```text
//! PENDING ──► COMPLETE
//!    │
//!    └──────► FAILED
//! ```

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::GenerationId;

/// Upper bound (in characters) for stored `last_error` text.
pub const MAX_ERROR_LEN: usize = 1500;

pub const DEFAULT_IMAGE_WIDTH: u32 = 1024;
pub const DEFAULT_IMAGE_HEIGHT: u32 = 1024;
pub const DEFAULT_CORE_MODEL: &str = "SDXL";

/// Lifecycle status of a generation record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationStatus {
    Pending,
    Complete,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Pending => "PENDING",
            GenerationStatus::Complete => "COMPLETE",
            GenerationStatus::Failed => "FAILED",
        }
    }

    /// Whether a record currently in `self` may be moved to `next`.
    ///
    /// Re-asserting the current status is allowed (idempotent writes).
    pub fn can_transition_to(&self, next: GenerationStatus) -> bool {
        *self == next || *self == GenerationStatus::Pending
    }
}

impl core::fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(GenerationStatus::Pending),
            "COMPLETE" => Ok(GenerationStatus::Complete),
            "FAILED" => Ok(GenerationStatus::Failed),
            other => Err(DomainError::validation(format!(
                "unknown generation status: {other}"
            ))),
        }
    }
}

/// Input for creating a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGeneration {
    pub id: GenerationId,
    pub prompt: String,
    pub image_width: u32,
    pub image_height: u32,
    pub core_model: String,
}

impl NewGeneration {
    /// Intake defaults: 1024x1024 on the SDXL model.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: GenerationId::new(),
            prompt: prompt.into(),
            image_width: DEFAULT_IMAGE_WIDTH,
            image_height: DEFAULT_IMAGE_HEIGHT,
            core_model: DEFAULT_CORE_MODEL.to_string(),
        }
    }

    pub fn with_id(mut self, id: GenerationId) -> Self {
        self.id = id;
        self
    }
}

/// Persisted state of one generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub id: GenerationId,
    pub prompt: String,
    pub status: GenerationStatus,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result_payload: Option<Vec<String>>,
    pub image_width: u32,
    pub image_height: u32,
    pub core_model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationRecord {
    /// Fresh `PENDING` record with no attempts.
    pub fn pending(new: NewGeneration, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            prompt: new.prompt,
            status: GenerationStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            last_error: None,
            result_payload: None,
            image_width: new.image_width,
            image_height: new.image_height,
            core_model: new.core_model,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update, enforcing status monotonicity.
    ///
    /// Nothing is modified when the patch is rejected.
    pub fn apply(&mut self, patch: &GenerationPatch, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(next) = patch.status {
            if !self.status.can_transition_to(next) {
                return Err(DomainError::InvalidTransition {
                    from: self.status,
                    to: next,
                });
            }
        }

        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(attempt) = patch.attempt_count {
            self.attempt_count = attempt;
        }
        if let Some(at) = patch.last_attempt_at {
            self.last_attempt_at = Some(at);
        }
        if let Some(err) = &patch.last_error {
            self.last_error = Some(err.clone());
        }
        if let Some(payload) = &patch.result_payload {
            self.result_payload = Some(payload.clone());
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Partial update of a record; `None` fields are left untouched.
///
/// `updated_at` is not part of the patch: stores refresh it on every write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationPatch {
    pub status: Option<GenerationStatus>,
    pub attempt_count: Option<u32>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result_payload: Option<Vec<String>>,
}

impl GenerationPatch {
    /// Progress marker written before each remote call.
    pub fn attempt_started(attempt: u32, at: DateTime<Utc>) -> Self {
        Self {
            attempt_count: Some(attempt),
            last_attempt_at: Some(at),
            ..Default::default()
        }
    }

    /// Failure description of the latest attempt (bounded to [`MAX_ERROR_LEN`]).
    pub fn attempt_failed(error: &str) -> Self {
        Self {
            last_error: Some(truncate_error(error)),
            ..Default::default()
        }
    }

    pub fn completed(result_payload: Vec<String>) -> Self {
        Self {
            status: Some(GenerationStatus::Complete),
            result_payload: Some(result_payload),
            ..Default::default()
        }
    }

    pub fn failed() -> Self {
        Self {
            status: Some(GenerationStatus::Failed),
            ..Default::default()
        }
    }
}

/// Truncate an error description to at most [`MAX_ERROR_LEN`] characters.
pub fn truncate_error(error: &str) -> String {
    match error.char_indices().nth(MAX_ERROR_LEN) {
        Some((byte_idx, _)) => error[..byte_idx].to_string(),
        None => error.to_string(),
    }
}

/// Read-side projection of a record returned by status lookups.
///
/// `result_payload` is exposed only for `COMPLETE` records, whatever the
/// stored record holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatusView {
    pub status: GenerationStatus,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_payload: Option<Vec<String>>,
}

impl From<GenerationRecord> for GenerationStatusView {
    fn from(record: GenerationRecord) -> Self {
        let result_payload = match record.status {
            GenerationStatus::Complete => Some(record.result_payload.unwrap_or_default()),
            _ => None,
        };
        Self {
            status: record.status,
            prompt: record.prompt,
            result_payload,
        }
    }
}
