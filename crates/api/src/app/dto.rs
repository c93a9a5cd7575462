use serde::{Deserialize, Serialize};

use imagegen_core::GenerationId;
use imagegen_infra::GenerationAccepted;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// A missing prompt is treated like an empty one and rejected by intake.
    #[serde(default)]
    pub prompt: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub request_id: GenerationId,
}

impl From<GenerationAccepted> for GenerateResponse {
    fn from(accepted: GenerationAccepted) -> Self {
        Self {
            request_id: accepted.request_id,
        }
    }
}
