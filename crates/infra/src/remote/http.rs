use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use imagegen_core::GenerationId;

use super::{GenerationClient, GenerationOutput, RemoteError};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    prompt: &'a str,
    generation_id: &'a str,
}

/// HTTP client for the generation worker (`POST {base_url}/generate`).
#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGenerationClient {
    /// Build a client whose calls give up after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/generate", self.base_url)
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn submit(
        &self,
        prompt: &str,
        request_id: &GenerationId,
    ) -> Result<GenerationOutput, RemoteError> {
        let body = GenerateRequest {
            prompt,
            generation_id: request_id.as_str(),
        };

        let resp = self
            .client
            .post(self.generate_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| match e.status() {
                Some(status) => RemoteError::status(status.as_u16(), e.to_string()),
                None => RemoteError::transport(e.to_string()),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("unknown status");
            let detail = resp.text().await.unwrap_or_default();
            let message = if detail.is_empty() {
                reason.to_string()
            } else {
                format!("{reason}: {detail}")
            };
            return Err(RemoteError::status(status.as_u16(), message));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RemoteError::transport(e.to_string()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            debug!(request_id = %request_id, "worker returned an empty body");
            return Ok(GenerationOutput::default());
        }

        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}
