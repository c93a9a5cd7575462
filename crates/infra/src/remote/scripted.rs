//! Scripted worker client for tests/dev.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use imagegen_core::GenerationId;

use super::{GenerationClient, GenerationOutput, RemoteError};

/// A recorded `submit` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedCall {
    pub prompt: String,
    pub request_id: GenerationId,
}

/// Replays queued outcomes in order; once the script runs dry every further
/// call returns the fallback outcome.
#[derive(Debug)]
pub struct ScriptedGenerationClient {
    script: Mutex<VecDeque<Result<GenerationOutput, RemoteError>>>,
    fallback: Result<GenerationOutput, RemoteError>,
    calls: Mutex<Vec<SubmittedCall>>,
}

impl ScriptedGenerationClient {
    pub fn new(
        script: impl IntoIterator<Item = Result<GenerationOutput, RemoteError>>,
        fallback: Result<GenerationOutput, RemoteError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always succeeds with `image_urls`.
    pub fn succeeding(image_urls: Vec<String>) -> Self {
        Self::new([], Ok(GenerationOutput::new(image_urls)))
    }

    /// Always fails with `err`.
    pub fn failing(err: RemoteError) -> Self {
        Self::new([], Err(err))
    }

    pub fn calls(&self) -> Vec<SubmittedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerationClient {
    async fn submit(
        &self,
        prompt: &str,
        request_id: &GenerationId,
    ) -> Result<GenerationOutput, RemoteError> {
        self.calls.lock().unwrap().push(SubmittedCall {
            prompt: prompt.to_string(),
            request_id: request_id.clone(),
        });

        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
