//! Generation orchestrator: drives one request's remote call to a terminal state.
//!
//! ## Attempt loop
//!
//! ```text
//! for attempt in 1..=max_attempts:
//!   write attempt_count / last_attempt_at      (before the call)
//!   submit(prompt, request_id)
//!     ok   -> write COMPLETE + result payload    => Succeeded
//!     err  -> write last_error (truncated)
//!             terminal or last attempt -> FAILED => Failed
//!             otherwise sleep(backoff) and loop
//! ```
//!
//! The record store is the single source of truth: nothing about the run is
//! kept in memory between attempts. A store failure anywhere in the loop aborts
//! the run, which then makes one best-effort attempt to mark the record FAILED.
//! When the write that failed was that FAILED mark itself, it is not repeated.

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn, Instrument};

use imagegen_core::{GenerationId, GenerationPatch};

use crate::remote::GenerationClient;
use crate::store::{GenerationStore, StoreError};

use super::retry::{classify, Retriability, RetryPolicy};

/// How an orchestration run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, last: Retriability },
}

/// Why a run stopped without reaching an outcome.
#[derive(Debug, Error)]
enum RunAbort {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The terminal FAILED write was itself rejected.
    #[error("failed to record final status: {0}")]
    FinalWrite(StoreError),
}

/// Drives generation requests through the retry loop.
///
/// Holds no per-request state, so one instance serves any number of
/// concurrent runs (each on its own record key).
pub struct GenerationOrchestrator<S, C> {
    store: S,
    client: C,
    policy: RetryPolicy,
}

impl<S, C> GenerationOrchestrator<S, C>
where
    S: GenerationStore,
    C: GenerationClient,
{
    pub fn new(store: S, client: C, policy: RetryPolicy) -> Self {
        Self {
            store,
            client,
            policy,
        }
    }

    /// Run the attempt loop for `request_id` until it reaches a terminal state.
    ///
    /// Never returns an error: every outcome is observable only through the
    /// record and the logs.
    pub async fn run(&self, prompt: &str, request_id: &GenerationId) {
        let span = tracing::info_span!("generation", request_id = %request_id);

        async {
            match self.drive(prompt, request_id).await {
                Ok(outcome) => info!(?outcome, "generation finished"),
                Err(RunAbort::FinalWrite(err)) => {
                    error!(
                        error = %err,
                        "could not mark generation as failed; record may stay pending"
                    );
                }
                Err(RunAbort::Store(err)) => {
                    error!(error = %err, "background processing failed");
                    if let Err(write_err) = self
                        .store
                        .update(request_id, GenerationPatch::failed())
                        .await
                    {
                        error!(
                            error = %write_err,
                            "could not mark generation as failed; record may stay pending"
                        );
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, prompt: &str, request_id: &GenerationId) -> Result<RunOutcome, RunAbort> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            self.store
                .update(request_id, GenerationPatch::attempt_started(attempt, Utc::now()))
                .await?;
            info!(attempt, max_attempts, "AI request attempt");

            let err = match self.client.submit(prompt, request_id).await {
                Ok(output) => {
                    self.store
                        .update(request_id, GenerationPatch::completed(output.image_urls))
                        .await?;
                    info!(attempt, "AI request succeeded");
                    return Ok(RunOutcome::Succeeded { attempts: attempt });
                }
                Err(err) => err,
            };

            let description = err.to_string();
            self.store
                .update(request_id, GenerationPatch::attempt_failed(&description))
                .await?;

            let class = classify(&err);
            if !class.is_retriable() || !self.policy.should_retry(attempt) {
                error!(
                    attempt,
                    max_attempts,
                    retriable = class.is_retriable(),
                    error = %description,
                    "AI request failed (no more retries)"
                );
                self.store
                    .update(request_id, GenerationPatch::failed())
                    .await
                    .map_err(RunAbort::FinalWrite)?;
                return Ok(RunOutcome::Failed {
                    attempts: attempt,
                    last: class,
                });
            }

            let delay = self.policy.delay_before_attempt(attempt);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %description,
                "AI request failed; retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use imagegen_core::{
        GenerationRecord, GenerationStatus, NewGeneration, MAX_ERROR_LEN,
    };
    use proptest::prelude::*;

    use crate::remote::{GenerationOutput, RemoteError, ScriptedGenerationClient};
    use crate::store::InMemoryGenerationStore;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::from_millis(max_attempts, 1, 2).unwrap()
    }

    fn logged_store() -> Arc<InMemoryGenerationStore> {
        Arc::new(InMemoryGenerationStore::with_patch_log())
    }

    fn urls() -> Vec<String> {
        vec![
            "https://example.com/generated_images/x_1.png".to_string(),
            "https://example.com/generated_images/x_2.png".to_string(),
        ]
    }

    async fn seeded(store: &InMemoryGenerationStore, prompt: &str) -> GenerationId {
        store.create(NewGeneration::new(prompt)).await.unwrap().id
    }

    async fn record(store: &InMemoryGenerationStore, id: &GenerationId) -> GenerationRecord {
        store.find_by_id(id).await.unwrap().unwrap()
    }

    fn attempt_counts(store: &InMemoryGenerationStore, id: &GenerationId) -> Vec<u32> {
        store
            .applied_patches(id)
            .iter()
            .filter_map(|p| p.attempt_count)
            .collect()
    }

    fn status_writes(
        store: &InMemoryGenerationStore,
        id: &GenerationId,
        status: GenerationStatus,
    ) -> usize {
        store
            .applied_patches(id)
            .iter()
            .filter(|p| p.status == Some(status))
            .count()
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        imagegen_observability::init_for_tests();
        let store = logged_store();
        let client = Arc::new(ScriptedGenerationClient::new(
            [
                Err(RemoteError::status(503, "Service Unavailable")),
                Err(RemoteError::status(503, "Service Unavailable")),
            ],
            Ok(GenerationOutput::new(urls())),
        ));
        let orchestrator = GenerationOrchestrator::new(store.clone(), client.clone(), policy(3));

        let id = seeded(&store, "P").await;
        orchestrator.run("P", &id).await;

        let rec = record(&store, &id).await;
        assert_eq!(rec.status, GenerationStatus::Complete);
        assert_eq!(rec.attempt_count, 3);
        assert_eq!(rec.result_payload, Some(urls()));
        assert!(rec.last_attempt_at.is_some());
        assert_eq!(client.call_count(), 3);
        assert_eq!(status_writes(&store, &id, GenerationStatus::Complete), 1);
        assert_eq!(status_writes(&store, &id, GenerationStatus::Failed), 0);
        assert_eq!(attempt_counts(&store, &id), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn client_error_short_circuits() {
        let store = logged_store();
        let client = Arc::new(ScriptedGenerationClient::new(
            [Err(RemoteError::status(404, "Not Found"))],
            Ok(GenerationOutput::new(urls())),
        ));
        let orchestrator = GenerationOrchestrator::new(store.clone(), client.clone(), policy(3));

        let id = seeded(&store, "P").await;
        let outcome = orchestrator.drive("P", &id).await.unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Failed {
                attempts: 1,
                last: Retriability::Terminal
            }
        );
        let rec = record(&store, &id).await;
        assert_eq!(rec.status, GenerationStatus::Failed);
        assert_eq!(rec.attempt_count, 1);
        assert_eq!(rec.result_payload, None);
        assert_eq!(
            rec.last_error.as_deref(),
            Some("remote error status=404 message=Not Found")
        );
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_on_server_errors() {
        let store = logged_store();
        let client = Arc::new(ScriptedGenerationClient::new(
            [
                Err(RemoteError::status(500, "first")),
                Err(RemoteError::status(500, "second")),
            ],
            Err(RemoteError::status(500, "third")),
        ));
        let orchestrator = GenerationOrchestrator::new(store.clone(), client.clone(), policy(3));

        let id = seeded(&store, "P").await;
        orchestrator.run("P", &id).await;

        let rec = record(&store, &id).await;
        assert_eq!(rec.status, GenerationStatus::Failed);
        assert_eq!(rec.attempt_count, 3);
        assert_eq!(
            rec.last_error.as_deref(),
            Some("remote error status=500 message=third")
        );
        assert_eq!(client.call_count(), 3);
        assert_eq!(status_writes(&store, &id, GenerationStatus::Failed), 1);
    }

    #[tokio::test]
    async fn transport_errors_are_retried() {
        let store = logged_store();
        let client = Arc::new(ScriptedGenerationClient::new(
            [Err(RemoteError::transport("network"))],
            Ok(GenerationOutput::default()),
        ));
        let orchestrator = GenerationOrchestrator::new(store.clone(), client.clone(), policy(5));

        let id = seeded(&store, "hello").await;
        orchestrator.run("hello", &id).await;

        let rec = record(&store, &id).await;
        assert_eq!(rec.status, GenerationStatus::Complete);
        assert_eq!(rec.attempt_count, 2);
        assert_eq!(rec.result_payload, Some(vec![]));
        assert_eq!(rec.last_error.as_deref(), Some("remote error message=network"));
    }

    #[tokio::test]
    async fn single_attempt_policy_never_retries() {
        let store = logged_store();
        let client = Arc::new(ScriptedGenerationClient::failing(RemoteError::transport(
            "timeout",
        )));
        let orchestrator = GenerationOrchestrator::new(store.clone(), client.clone(), policy(1));

        let id = seeded(&store, "P").await;
        orchestrator.run("P", &id).await;

        assert_eq!(client.call_count(), 1);
        assert_eq!(record(&store, &id).await.status, GenerationStatus::Failed);
    }

    #[tokio::test]
    async fn long_errors_are_truncated() {
        let store = logged_store();
        let client = Arc::new(ScriptedGenerationClient::failing(RemoteError::status(
            400,
            "x".repeat(10_000),
        )));
        let orchestrator = GenerationOrchestrator::new(store.clone(), client, policy(2));

        let id = seeded(&store, "P").await;
        orchestrator.run("P", &id).await;

        let rec = record(&store, &id).await;
        assert_eq!(rec.last_error.unwrap().chars().count(), MAX_ERROR_LEN);
    }

    #[tokio::test]
    async fn prompt_and_id_are_forwarded() {
        let store = logged_store();
        let client = Arc::new(ScriptedGenerationClient::succeeding(urls()));
        let orchestrator = GenerationOrchestrator::new(store.clone(), client.clone(), policy(3));

        let id = seeded(&store, "A beautiful sunset").await;
        orchestrator.run("A beautiful sunset", &id).await;

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].prompt, "A beautiful sunset");
        assert_eq!(calls[0].request_id, id);
    }

    /// Store whose updates start failing after a fixed number of successes.
    struct FlakyStore {
        inner: InMemoryGenerationStore,
        healthy_updates: usize,
        seen: AtomicUsize,
    }

    #[async_trait]
    impl GenerationStore for FlakyStore {
        async fn create(&self, new: NewGeneration) -> Result<GenerationRecord, StoreError> {
            self.inner.create(new).await
        }

        async fn update(
            &self,
            id: &GenerationId,
            patch: GenerationPatch,
        ) -> Result<GenerationRecord, StoreError> {
            let n = self.seen.fetch_add(1, Ordering::SeqCst);
            if n >= self.healthy_updates && patch.status.is_none() {
                return Err(StoreError::Storage("connection reset".into()));
            }
            self.inner.update(id, patch).await
        }

        async fn find_by_id(
            &self,
            id: &GenerationId,
        ) -> Result<Option<GenerationRecord>, StoreError> {
            self.inner.find_by_id(id).await
        }
    }

    #[tokio::test]
    async fn store_outage_mid_run_marks_record_failed() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryGenerationStore::new(),
            healthy_updates: 1,
            seen: AtomicUsize::new(0),
        });
        let client = Arc::new(ScriptedGenerationClient::failing(RemoteError::status(
            503, "busy",
        )));
        let orchestrator = GenerationOrchestrator::new(store.clone(), client.clone(), policy(3));

        let id = store.create(NewGeneration::new("P")).await.unwrap().id;
        orchestrator.run("P", &id).await;

        // First attempt marker succeeded; the last_error write failed and aborted the run.
        assert_eq!(client.call_count(), 1);
        let rec = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(rec.status, GenerationStatus::Failed);
        assert_eq!(rec.attempt_count, 1);
    }

    #[tokio::test]
    async fn unknown_record_aborts_without_calling_worker() {
        let store = logged_store();
        let client = Arc::new(ScriptedGenerationClient::succeeding(urls()));
        let orchestrator = GenerationOrchestrator::new(store.clone(), client.clone(), policy(3));

        let ghost = GenerationId::new();
        let err = orchestrator.drive("P", &ghost).await.unwrap_err();
        assert!(matches!(err, RunAbort::Store(StoreError::NotFound(_))));

        // run() swallows the error; the best-effort FAILED write fails too.
        orchestrator.run("P", &ghost).await;
        assert_eq!(client.call_count(), 0);
        assert!(store.is_empty());
    }

    /// Store that rejects every FAILED status write and counts the tries.
    struct RejectingFailedStore {
        inner: InMemoryGenerationStore,
        failed_writes: AtomicUsize,
    }

    #[async_trait]
    impl GenerationStore for RejectingFailedStore {
        async fn create(&self, new: NewGeneration) -> Result<GenerationRecord, StoreError> {
            self.inner.create(new).await
        }

        async fn update(
            &self,
            id: &GenerationId,
            patch: GenerationPatch,
        ) -> Result<GenerationRecord, StoreError> {
            if patch.status == Some(GenerationStatus::Failed) {
                self.failed_writes.fetch_add(1, Ordering::SeqCst);
                return Err(StoreError::Storage("disk full".into()));
            }
            self.inner.update(id, patch).await
        }

        async fn find_by_id(
            &self,
            id: &GenerationId,
        ) -> Result<Option<GenerationRecord>, StoreError> {
            self.inner.find_by_id(id).await
        }
    }

    #[tokio::test]
    async fn rejected_final_failed_write_is_not_repeated() {
        let store = Arc::new(RejectingFailedStore {
            inner: InMemoryGenerationStore::new(),
            failed_writes: AtomicUsize::new(0),
        });
        let client = Arc::new(ScriptedGenerationClient::failing(RemoteError::status(
            404,
            "Not Found",
        )));
        let orchestrator = GenerationOrchestrator::new(store.clone(), client.clone(), policy(3));

        let id = store.create(NewGeneration::new("P")).await.unwrap().id;
        let err = orchestrator.drive("P", &id).await.unwrap_err();
        assert!(matches!(err, RunAbort::FinalWrite(StoreError::Storage(_))));
        assert_eq!(store.failed_writes.load(Ordering::SeqCst), 1);

        let id = store.create(NewGeneration::new("P")).await.unwrap().id;
        orchestrator.run("P", &id).await;
        assert_eq!(store.failed_writes.load(Ordering::SeqCst), 2);
        let rec = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(rec.status, GenerationStatus::Pending);
    }

    /// Always answers 503 and records when each call arrived.
    #[derive(Default)]
    struct TimedClient {
        started: std::sync::Mutex<Vec<tokio::time::Instant>>,
    }

    #[async_trait]
    impl GenerationClient for TimedClient {
        async fn submit(
            &self,
            _prompt: &str,
            _request_id: &GenerationId,
        ) -> Result<GenerationOutput, RemoteError> {
            self.started.lock().unwrap().push(tokio::time::Instant::now());
            Err(RemoteError::status(503, "Service Unavailable"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_out_backoff_between_attempts() {
        let store = logged_store();
        let client = Arc::new(TimedClient::default());
        let orchestrator = GenerationOrchestrator::new(
            store.clone(),
            client.clone(),
            RetryPolicy::from_millis(3, 1000, 1000).unwrap(),
        );

        let id = seeded(&store, "P").await;
        let start = tokio::time::Instant::now();
        orchestrator.run("P", &id).await;
        let elapsed = start.elapsed();

        // Two sleeps of 1000ms with jitter in [0.8, 1.2], capped at 1000ms.
        assert!(elapsed >= Duration::from_millis(1600), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(2000), "{elapsed:?}");

        let started = client.started.lock().unwrap().clone();
        assert_eq!(started.len(), 3);
        for pair in started.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(800), "{gap:?}");
            assert!(gap <= Duration::from_millis(1000), "{gap:?}");
        }
        assert_eq!(record(&store, &id).await.status, GenerationStatus::Failed);
    }

    fn current_thread() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 24,
            ..ProptestConfig::default()
        })]

        /// k retriable failures followed by success: k+1 attempts, COMPLETE,
        /// attempt counts written 1..=k+1 in order. k >= max: max attempts, FAILED.
        #[test]
        fn attempts_follow_failure_script(max_attempts in 1u32..6, failures in 0u32..8) {
            let rt = current_thread();
            rt.block_on(async {
                let store = logged_store();
                let client = Arc::new(ScriptedGenerationClient::new(
                    (0..failures).map(|i| Err(RemoteError::status(502, format!("fail {i}")))),
                    Ok(GenerationOutput::new(vec!["u".into()])),
                ));
                let orchestrator =
                    GenerationOrchestrator::new(store.clone(), client.clone(), policy(max_attempts));

                let id = seeded(&store, "P").await;
                orchestrator.run("P", &id).await;
                let rec = record(&store, &id).await;

                let expected_attempts = (failures + 1).min(max_attempts);
                assert_eq!(client.call_count() as u32, expected_attempts);
                assert_eq!(rec.attempt_count, expected_attempts);
                assert_eq!(
                    attempt_counts(&store, &id),
                    (1..=expected_attempts).collect::<Vec<_>>()
                );

                if failures < max_attempts {
                    assert_eq!(rec.status, GenerationStatus::Complete);
                    assert_eq!(status_writes(&store, &id, GenerationStatus::Complete), 1);
                } else {
                    assert_eq!(rec.status, GenerationStatus::Failed);
                    assert_eq!(rec.result_payload, None);
                }
            });
        }
    }
}
