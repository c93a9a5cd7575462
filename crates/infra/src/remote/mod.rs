//! Remote image-generation worker client.
//!
//! One call per attempt: `submit(prompt, request_id)`. Retries, backoff and
//! timeouts beyond the transport's own are the orchestrator's business.

pub mod http;
pub mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use imagegen_core::GenerationId;

use crate::jobs::retry::HasStatusCode;

pub use http::HttpGenerationClient;
pub use scripted::ScriptedGenerationClient;

/// Result of a successful remote call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutput {
    /// References (URLs) to the generated images.
    #[serde(default)]
    pub image_urls: Vec<String>,
}

impl GenerationOutput {
    pub fn new(image_urls: Vec<String>) -> Self {
        Self { image_urls }
    }
}

/// Remote call failure.
///
/// Display output is what ends up (truncated) in the record's `last_error`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The worker answered with a non-success HTTP status.
    #[error("remote error status={status} message={message}")]
    Status { status: u16, message: String },

    /// No response: connection refused/reset, DNS failure, timeout.
    #[error("remote error message={0}")]
    Transport(String),

    /// The worker answered 2xx but the body could not be decoded.
    #[error("remote error message=invalid response body: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

impl HasStatusCode for RemoteError {
    fn status_code(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            RemoteError::Transport(_) | RemoteError::Decode(_) => None,
        }
    }
}

/// Client for the external generation worker.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn submit(
        &self,
        prompt: &str,
        request_id: &GenerationId,
    ) -> Result<GenerationOutput, RemoteError>;
}

#[async_trait]
impl<C> GenerationClient for Arc<C>
where
    C: GenerationClient + ?Sized,
{
    async fn submit(
        &self,
        prompt: &str,
        request_id: &GenerationId,
    ) -> Result<GenerationOutput, RemoteError> {
        (**self).submit(prompt, request_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_stored_error_format() {
        assert_eq!(
            RemoteError::status(503, "Service Unavailable").to_string(),
            "remote error status=503 message=Service Unavailable"
        );
        assert_eq!(
            RemoteError::transport("connection refused").to_string(),
            "remote error message=connection refused"
        );
    }

    #[test]
    fn only_http_failures_carry_a_status() {
        assert_eq!(RemoteError::status(404, "nope").status_code(), Some(404));
        assert_eq!(RemoteError::transport("timeout").status_code(), None);
        assert_eq!(RemoteError::Decode("eof".into()).status_code(), None);
    }

    #[test]
    fn output_decodes_with_missing_urls() {
        let out: GenerationOutput = serde_json::from_str(r#"{"generationId":"x"}"#).unwrap();
        assert!(out.image_urls.is_empty());

        let out: GenerationOutput =
            serde_json::from_str(r#"{"imageUrls":["https://example.com/1.png"]}"#).unwrap();
        assert_eq!(out.image_urls, vec!["https://example.com/1.png"]);
    }
}
