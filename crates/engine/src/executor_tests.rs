//! Scenario tests for the orchestrator and the activity execution engine.
//!
//! Everything runs against `MemoryStore` and `MemoryQueue`, so no Postgres
//! connection is required. Messages are fetched and handed to
//! `ActivityExecutor::handle` by hand, which keeps the interleavings under
//! the test's control; the last test drives the same flow through `Worker`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use activities::builtin::{EchoProcessor, PollProcessor};
use activities::mock::MockProcessor;
use activities::{ActivityContext, ActivityProcessor, ActivityResult, DataMap};
use async_trait::async_trait;
use db::{DbError, MemoryStore, Versioned, VersionedStore};
use queue::{
    activity_subject, publish_message, ActivityQueue, Delivery, MemoryQueue, QueueError,
    RESPONSE_SUBJECT,
};
use serde_json::{json, Value};
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ExecutorConfig, UpdateConfig},
    definitions::InMemoryDefinitions,
    executor::{ActivityExecutor, ExecutionOutcome, ProcessorRegistry},
    models::{Activity, ActivityMessage, Manifest, OrchestrationDefinition, OrchestrationState},
    orchestrator::Orchestrator,
    store::DocumentStore,
    worker::Worker,
    EngineError,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Harness {
    queue: Arc<MemoryQueue>,
    documents: DocumentStore,
    orchestrator: Orchestrator,
}

impl Harness {
    async fn new(activity_types: &[&str]) -> Self {
        Self::with_definitions(activity_types, InMemoryDefinitions::new()).await
    }

    async fn with_definitions(activity_types: &[&str], definitions: InMemoryDefinitions) -> Self {
        Self::build(activity_types, definitions, Arc::new(MemoryStore::new())).await
    }

    async fn with_store(activity_types: &[&str], store: Arc<dyn VersionedStore>) -> Self {
        Self::build(activity_types, InMemoryDefinitions::new(), store).await
    }

    async fn build(
        activity_types: &[&str],
        definitions: InMemoryDefinitions,
        store: Arc<dyn VersionedStore>,
    ) -> Self {
        let queue = Arc::new(MemoryQueue::default());
        let documents = DocumentStore::new(
            store,
            UpdateConfig {
                max_attempts: 8,
                base_backoff_ms: 0,
                max_backoff_ms: 0,
            },
        );
        let orchestrator = Orchestrator::new(
            documents.clone(),
            queue.clone(),
            Arc::new(definitions),
        );
        orchestrator
            .provision_queues(activity_types)
            .await
            .expect("provisioning an in-memory queue cannot fail");
        Self {
            queue,
            documents,
            orchestrator,
        }
    }

    fn executor(&self, activity_type: &str, processor: Arc<dyn ActivityProcessor>) -> ActivityExecutor {
        ActivityExecutor::new(
            activity_type,
            processor,
            self.documents.clone(),
            self.queue.clone(),
            ExecutorConfig::default(),
        )
    }

    /// Take every currently visible message for `activity_type`.
    async fn take(&self, activity_type: &str, max: usize) -> Vec<Delivery> {
        self.queue
            .fetch(&activity_subject(activity_type), max, Duration::ZERO)
            .await
            .unwrap()
    }

    async fn take_one(&self, activity_type: &str) -> Delivery {
        let mut taken = self.take(activity_type, 1).await;
        assert_eq!(taken.len(), 1, "expected one message for '{activity_type}'");
        taken.remove(0)
    }

    async fn state(&self, id: &str) -> OrchestrationState {
        self.documents.get(id).await.unwrap().unwrap().0.state
    }
}

/// Writes a marker, then blocks until every sibling has read the document.
///
/// Forces concurrent invocations to work from the same revision so their
/// completion writes conflict.
struct BarrierProcessor {
    barrier: Barrier,
    result: ActivityResult,
}

impl BarrierProcessor {
    fn new(parties: usize, result: ActivityResult) -> Self {
        Self {
            barrier: Barrier::new(parties),
            result,
        }
    }
}

#[async_trait]
impl ActivityProcessor for BarrierProcessor {
    async fn process(&self, ctx: &mut ActivityContext) -> ActivityResult {
        let activity_id = ctx.activity_id().to_owned();
        ctx.set_output(activity_id, true);
        self.barrier.wait().await;
        self.result.clone()
    }
}

/// `MemoryStore` with switchable misbehaviour.
#[derive(Default)]
struct ScriptedStore {
    inner: MemoryStore,
    /// The next `get` reports the key as absent, as a reader racing a
    /// concurrent create would.
    miss_next_read: AtomicBool,
    /// Every `update` loses the compare-and-swap.
    reject_updates: AtomicBool,
}

#[async_trait]
impl VersionedStore for ScriptedStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, DbError> {
        if self.miss_next_read.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.get(key).await
    }

    async fn create(&self, key: &str, value: Value) -> Result<u64, DbError> {
        self.inner.create(key, value).await
    }

    async fn update(&self, key: &str, value: Value, expected: u64) -> Result<u64, DbError> {
        if self.reject_updates.load(Ordering::SeqCst) {
            return Err(DbError::RevisionConflict {
                key: key.to_owned(),
                expected,
            });
        }
        self.inner.update(key, value, expected).await
    }
}

/// Delegates to a `MemoryQueue` but fails the first response publish.
struct FlakyResponses {
    inner: Arc<MemoryQueue>,
    failed_once: AtomicBool,
}

#[async_trait]
impl ActivityQueue for FlakyResponses {
    async fn ensure_queue(&self, subject: &str) -> Result<(), QueueError> {
        self.inner.ensure_queue(subject).await
    }

    async fn publish(&self, subject: &str, payload: Value) -> Result<(), QueueError> {
        if subject == RESPONSE_SUBJECT && !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err(QueueError::QueueNotFound(subject.to_owned()));
        }
        self.inner.publish(subject, payload).await
    }

    async fn fetch(
        &self,
        subject: &str,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        self.inner.fetch(subject, max_count, max_wait).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.inner.ack(delivery).await
    }

    async fn nak_with_delay(&self, delivery: &Delivery, delay: Duration) -> Result<(), QueueError> {
        self.inner.nak_with_delay(delivery, delay).await
    }
}

fn payload() -> DataMap {
    DataMap::from([("zone".to_string(), json!("example.com"))])
}

// ============================================================
// Orchestrator
// ============================================================

#[tokio::test]
async fn start_dispatches_only_the_first_step() {
    let h = Harness::new(&["t"]).await;
    let activities = vec![
        Activity::new("A1", "t"),
        Activity::new("A2", "t"),
        Activity::new("A3", "t").depends_on(["A1", "A2"]),
    ];

    let doc = h
        .orchestrator
        .start(&activities, payload(), "o-1", "corr-1", "test")
        .await
        .unwrap();

    assert_eq!(doc.state, OrchestrationState::Initialized);
    assert_eq!(doc.steps.len(), 2);
    let dispatched: Vec<ActivityMessage> = h
        .queue
        .published(&activity_subject("t"))
        .into_iter()
        .map(|v| serde_json::from_value(v).unwrap())
        .collect();
    let ids: Vec<&str> = dispatched.iter().map(|m| m.activity.id.as_str()).collect();
    assert_eq!(ids, vec!["A1", "A2"]);
    assert!(dispatched.iter().all(|m| m.orchestration_id == "o-1"));
}

#[tokio::test]
async fn start_is_idempotent_per_orchestration_id() {
    let h = Harness::new(&["t"]).await;
    let activities = vec![Activity::new("a", "t")];

    let first = h
        .orchestrator
        .start(&activities, payload(), "o-1", "corr-1", "test")
        .await
        .unwrap();
    let second = h
        .orchestrator
        .start(&activities, DataMap::new(), "o-1", "corr-other", "test")
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(h.queue.published(&activity_subject("t")).len(), 1);
}

#[tokio::test]
async fn start_losing_the_create_race_returns_the_winner() {
    let store = Arc::new(ScriptedStore::default());
    let h = Harness::with_store(&["t"], store.clone()).await;
    let activities = vec![Activity::new("a", "t"), Activity::new("b", "t")];

    let winner = h
        .orchestrator
        .start(&activities, payload(), "o-1", "corr-1", "test")
        .await
        .unwrap();

    // The second caller's dedup read misses, so it reaches the create-only
    // write and loses.
    store.miss_next_read.store(true, Ordering::SeqCst);
    let loser = h
        .orchestrator
        .start(&activities, DataMap::new(), "o-1", "corr-2", "test")
        .await
        .unwrap();

    assert_eq!(loser, winner);
    assert_eq!(loser.correlation_id, "corr-1");
    assert_eq!(h.queue.published(&activity_subject("t")).len(), 2);
    assert_eq!(h.queue.queue_length(&activity_subject("t")), 2);
}

#[tokio::test]
async fn start_rejects_a_cycle_without_writing_anything() {
    let h = Harness::new(&["t"]).await;
    let activities = vec![
        Activity::new("A1", "t").depends_on(["A2"]),
        Activity::new("A2", "t").depends_on(["A1"]),
    ];

    let err = h
        .orchestrator
        .start(&activities, payload(), "o-1", "corr-1", "test")
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::CycleDetected { .. }));
    assert!(h.orchestrator.get_orchestration("o-1").await.unwrap().is_none());
    assert_eq!(h.queue.queue_length(&activity_subject("t")), 0);
}

#[tokio::test]
async fn start_rejects_an_empty_orchestration() {
    let h = Harness::new(&[]).await;
    let err = h
        .orchestrator
        .start(&[], payload(), "o-1", "corr-1", "test")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EmptyOrchestration(id) if id == "o-1"));
    assert!(h.orchestrator.get_orchestration("o-1").await.unwrap().is_none());
}

#[tokio::test]
async fn start_manifest_resolves_the_definition() {
    let definitions = InMemoryDefinitions::with([OrchestrationDefinition {
        id: "dns-zone".into(),
        activities: vec![Activity::new("create", "t")],
    }]);
    let h = Harness::with_definitions(&["t"], definitions).await;

    let manifest = Manifest {
        id: "o-9".into(),
        manifest_id: "dns-zone".into(),
        correlation_id: "corr-9".into(),
        properties: payload(),
    };
    let doc = h.orchestrator.start_manifest(&manifest).await.unwrap();
    assert_eq!(doc.orchestration_type, "dns-zone");
    assert_eq!(doc.input_data, payload());

    let unknown = Manifest {
        manifest_id: "nope".into(),
        ..manifest
    };
    assert!(matches!(
        h.orchestrator.start_manifest(&unknown).await,
        Err(EngineError::DefinitionNotFound(id)) if id == "nope"
    ));
}

// ============================================================
// Execution
// ============================================================

#[tokio::test]
async fn linear_orchestration_runs_to_completion() {
    let h = Harness::new(&["poll", "echo"]).await;
    let activities = vec![
        Activity::new("probe", "poll"),
        Activity::new("report", "echo")
            .depends_on(["probe"])
            .with_input("probe.attempts", "polls"),
    ];
    h.orchestrator
        .start(&activities, payload(), "o-1", "corr-1", "dns-zone")
        .await
        .unwrap();

    let poll = h.executor("poll", Arc::new(PollProcessor::new(1, Duration::from_secs(1))));
    let echo = h.executor("echo", Arc::new(EchoProcessor));

    let outcome = poll.handle(&h.take_one("poll").await).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Advanced { step: 1 });
    assert_eq!(h.state("o-1").await, OrchestrationState::Running);

    let outcome = echo.handle(&h.take_one("echo").await).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Finished);

    let (doc, _) = h.documents.get("o-1").await.unwrap().unwrap();
    assert_eq!(doc.state, OrchestrationState::Completed);
    assert_eq!(
        doc.output_data["report"],
        json!({ "zone": "example.com", "polls": 1 })
    );

    let responses = h.queue.published(RESPONSE_SUBJECT);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["id"], json!("o-1"));
    assert_eq!(responses[0]["manifestId"], json!("dns-zone"));
    assert_eq!(responses[0]["correlationId"], json!("corr-1"));
    assert_eq!(responses[0]["success"], json!(true));
    assert_eq!(responses[0]["properties"]["probe"], json!(1));

    assert_eq!(h.queue.queue_length(&activity_subject("poll")), 0);
    assert_eq!(h.queue.queue_length(&activity_subject("echo")), 0);
}

#[tokio::test]
async fn concurrent_siblings_merge_and_advance_exactly_once() {
    let h = Harness::new(&["t", "next"]).await;
    let activities = vec![
        Activity::new("A1", "t"),
        Activity::new("A2", "t"),
        Activity::new("A3", "next").depends_on(["A1", "A2"]),
    ];
    h.orchestrator
        .start(&activities, payload(), "o-1", "corr-1", "test")
        .await
        .unwrap();

    let executor = h.executor("t", Arc::new(BarrierProcessor::new(2, ActivityResult::Complete)));
    let deliveries = h.take("t", 2).await;
    assert_eq!(deliveries.len(), 2);

    let (first, second) = tokio::join!(
        executor.handle(&deliveries[0]),
        executor.handle(&deliveries[1])
    );
    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, ExecutionOutcome::Advanced { .. }));
    assert_eq!(
        outcomes,
        vec![
            ExecutionOutcome::AwaitingSiblings,
            ExecutionOutcome::Advanced { step: 1 }
        ]
    );

    // Both writes survived the conflict.
    let (doc, revision) = h.documents.get("o-1").await.unwrap().unwrap();
    assert!(doc.is_completed("A1") && doc.is_completed("A2"));
    assert_eq!(doc.output_data["A1"], json!(true));
    assert_eq!(doc.output_data["A2"], json!(true));
    assert_eq!(revision, 3);

    assert_eq!(h.queue.published(&activity_subject("next")).len(), 1);
    assert_eq!(h.queue.acked(&activity_subject("t")), 2);
}

#[tokio::test]
async fn fatal_error_errors_the_orchestration_and_publishes_failure() {
    let h = Harness::new(&["ok", "bad", "next"]).await;
    let activities = vec![
        Activity::new("A1", "ok"),
        Activity::new("A2", "bad"),
        Activity::new("A3", "next").depends_on(["A1", "A2"]),
    ];
    h.orchestrator
        .start(&activities, payload(), "o-1", "corr-1", "test")
        .await
        .unwrap();

    let ok = h.executor("ok", Arc::new(MockProcessor::completing("ok")));
    let bad = h.executor("bad", Arc::new(MockProcessor::failing_fatal("bad", "quota exceeded")));

    let err = bad.handle(&h.take_one("bad").await).await.unwrap_err();
    assert!(matches!(
        &err,
        EngineError::ActivityFatal { activity_id, message }
            if activity_id == "A2" && message == "quota exceeded"
    ));
    assert_eq!(h.queue.queue_length(&activity_subject("bad")), 0);

    // The sibling finishes later but cannot revive the orchestration.
    let outcome = ok.handle(&h.take_one("ok").await).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Skipped);

    let (doc, _) = h.documents.get("o-1").await.unwrap().unwrap();
    assert_eq!(doc.state, OrchestrationState::Errored);
    assert!(doc.error_detail.as_deref().unwrap().contains("quota exceeded"));
    assert!(h.queue.published(&activity_subject("next")).is_empty());

    let responses = h.queue.published(RESPONSE_SUBJECT);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["success"], json!(false));
    assert!(responses[0]["errorDetail"]
        .as_str()
        .unwrap()
        .contains("quota exceeded"));
}

#[tokio::test]
async fn fatal_error_racing_a_sibling_completion_still_errors() {
    let h = Harness::new(&["t", "next"]).await;
    let activities = vec![
        Activity::new("A1", "t"),
        Activity::new("A2", "t"),
        Activity::new("A3", "next").depends_on(["A1", "A2"]),
    ];
    h.orchestrator
        .start(&activities, payload(), "o-1", "corr-1", "test")
        .await
        .unwrap();

    /// Fails `A2`, completes everything else, after both have read.
    struct SplitProcessor(Barrier);

    #[async_trait]
    impl ActivityProcessor for SplitProcessor {
        async fn process(&self, ctx: &mut ActivityContext) -> ActivityResult {
            self.0.wait().await;
            if ctx.activity_id() == "A2" {
                ActivityResult::fatal("boom")
            } else {
                ActivityResult::Complete
            }
        }
    }

    let executor = h.executor("t", Arc::new(SplitProcessor(Barrier::new(2))));
    let deliveries = h.take("t", 2).await;
    let (first, second) = tokio::join!(
        executor.handle(&deliveries[0]),
        executor.handle(&deliveries[1])
    );
    let fatal_count = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(EngineError::ActivityFatal { .. })))
        .count();
    assert_eq!(fatal_count, 1);

    assert_eq!(h.state("o-1").await, OrchestrationState::Errored);
    assert!(h.queue.published(&activity_subject("next")).is_empty());
    assert_eq!(h.queue.published(RESPONSE_SUBJECT).len(), 1);
    assert_eq!(h.queue.queue_length(&activity_subject("t")), 0);
}

#[tokio::test]
async fn fatal_error_is_acked_even_when_the_errored_write_fails() {
    let store = Arc::new(ScriptedStore::default());
    let h = Harness::with_store(&["bad"], store.clone()).await;
    h.orchestrator
        .start(&[Activity::new("a", "bad")], payload(), "o-1", "corr-1", "test")
        .await
        .unwrap();
    store.reject_updates.store(true, Ordering::SeqCst);

    let executor = h.executor("bad", Arc::new(MockProcessor::failing_fatal("bad", "quota exceeded")));
    let err = executor.handle(&h.take_one("bad").await).await.unwrap_err();

    assert!(matches!(err, EngineError::ActivityFatal { activity_id, .. } if activity_id == "a"));
    assert_eq!(h.queue.queue_length(&activity_subject("bad")), 0);
    assert_eq!(h.queue.acked(&activity_subject("bad")), 1);
    assert!(h.queue.published(RESPONSE_SUBJECT).is_empty());
    assert_eq!(h.state("o-1").await, OrchestrationState::Initialized);
}

#[tokio::test]
async fn retry_error_naks_and_keeps_the_writes() {
    let h = Harness::new(&["t"]).await;
    h.orchestrator
        .start(&[Activity::new("a", "t")], payload(), "o-1", "corr-1", "test")
        .await
        .unwrap();

    let mock = Arc::new(MockProcessor::scripted(
        "flaky",
        vec![ActivityResult::retry("dns api busy"), ActivityResult::Complete],
    ));
    let executor = h.executor("t", mock.clone());

    let err = executor.handle(&h.take_one("t").await).await.unwrap_err();
    assert!(err.is_recoverable());
    assert!(matches!(err, EngineError::ActivityRetry { message, .. } if message == "dns api busy"));

    let (doc, _) = h.documents.get("o-1").await.unwrap().unwrap();
    assert_eq!(doc.state, OrchestrationState::Running);
    assert_eq!(doc.output_data["a"], json!("flaky"));
    assert!(!doc.is_completed("a"));

    // Redelivered right away.
    let redelivery = h.take_one("t").await;
    assert_eq!(redelivery.attempt, 2);
    assert_eq!(
        executor.handle(&redelivery).await.unwrap(),
        ExecutionOutcome::Finished
    );
    assert_eq!(mock.calls_for("a"), 2);
}

#[tokio::test(start_paused = true)]
async fn schedule_redelivers_after_the_delay_until_ready() {
    let h = Harness::new(&["poll"]).await;
    h.orchestrator
        .start(&[Activity::new("probe", "poll")], payload(), "o-1", "corr-1", "test")
        .await
        .unwrap();

    let interval = Duration::from_secs(5);
    let executor = h.executor("poll", Arc::new(PollProcessor::new(3, interval)));
    let subject = activity_subject("poll");

    let mut outcomes = Vec::new();
    loop {
        let started = tokio::time::Instant::now();
        let deliveries = h.queue.fetch(&subject, 1, Duration::from_secs(60)).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        if !outcomes.is_empty() {
            assert!(started.elapsed() >= interval, "redelivered too early");
        }

        let outcome = executor.handle(&deliveries[0]).await.unwrap();
        let done = outcome == ExecutionOutcome::Finished;
        outcomes.push(outcome);
        if done {
            break;
        }
    }

    assert_eq!(
        outcomes,
        vec![
            ExecutionOutcome::Rescheduled(interval),
            ExecutionOutcome::Rescheduled(interval),
            ExecutionOutcome::Finished,
        ]
    );
    let (doc, _) = h.documents.get("o-1").await.unwrap().unwrap();
    assert_eq!(doc.processing_data["probe.attempts"], json!(3));
    assert_eq!(doc.state, OrchestrationState::Completed);
}

#[tokio::test]
async fn wait_acks_and_persists_without_completing() {
    let h = Harness::new(&["t"]).await;
    h.orchestrator
        .start(&[Activity::new("approve", "t")], payload(), "o-1", "corr-1", "test")
        .await
        .unwrap();

    let executor = h.executor("t", Arc::new(MockProcessor::returning("gate", ActivityResult::Wait)));
    let outcome = executor.handle(&h.take_one("t").await).await.unwrap();

    assert_eq!(outcome, ExecutionOutcome::Waiting);
    assert_eq!(h.queue.queue_length(&activity_subject("t")), 0);
    let (doc, _) = h.documents.get("o-1").await.unwrap().unwrap();
    assert_eq!(doc.state, OrchestrationState::Running);
    assert_eq!(doc.output_data["approve"], json!("gate"));
    assert!(!doc.is_completed("approve"));
    assert!(h.queue.published(RESPONSE_SUBJECT).is_empty());
}

#[tokio::test]
async fn failed_completion_response_is_published_on_redelivery() {
    let h = Harness::new(&["t"]).await;
    h.orchestrator
        .start(&[Activity::new("a", "t")], payload(), "o-1", "corr-1", "test")
        .await
        .unwrap();

    let queue = Arc::new(FlakyResponses {
        inner: h.queue.clone(),
        failed_once: AtomicBool::new(false),
    });
    let mock = Arc::new(MockProcessor::completing("done"));
    let executor = ActivityExecutor::new(
        "t",
        mock.clone(),
        h.documents.clone(),
        queue,
        ExecutorConfig::default(),
    );

    let err = executor.handle(&h.take_one("t").await).await.unwrap_err();
    assert!(matches!(err, EngineError::Queue(_)));
    assert_eq!(h.state("o-1").await, OrchestrationState::Completed);
    assert!(h.queue.published(RESPONSE_SUBJECT).is_empty());

    let redelivery = h.take_one("t").await;
    assert_eq!(redelivery.attempt, 2);
    assert_eq!(
        executor.handle(&redelivery).await.unwrap(),
        ExecutionOutcome::Finished
    );

    let responses = h.queue.published(RESPONSE_SUBJECT);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["success"], json!(true));
    assert_eq!(responses[0]["properties"]["a"], json!("done"));
    assert_eq!(h.queue.queue_length(&activity_subject("t")), 0);
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn redelivered_completed_activity_only_retries_advancement() {
    let h = Harness::new(&["t"]).await;
    let activities = vec![Activity::new("a", "t"), Activity::new("b", "t").depends_on(["a"])];
    let doc = h
        .orchestrator
        .start(&activities, payload(), "o-1", "corr-1", "test")
        .await
        .unwrap();

    // A previous delivery completed `a` but died before dispatching `b`.
    h.documents
        .update(&doc, 1, |d| d.mark_completed("a"))
        .await
        .unwrap();

    let mock = Arc::new(MockProcessor::completing("never"));
    let executor = h.executor("t", mock.clone());
    let outcome = executor.handle(&h.take_one("t").await).await.unwrap();

    assert_eq!(outcome, ExecutionOutcome::Advanced { step: 1 });
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn message_for_terminal_orchestration_is_skipped() {
    let h = Harness::new(&["t"]).await;
    let doc = h
        .orchestrator
        .start(&[Activity::new("a", "t")], payload(), "o-1", "corr-1", "test")
        .await
        .unwrap();
    h.documents
        .update(&doc, 1, |d| d.mark_errored("cancelled by operator"))
        .await
        .unwrap();

    let mock = Arc::new(MockProcessor::completing("never"));
    let executor = h.executor("t", mock.clone());
    assert_eq!(
        executor.handle(&h.take_one("t").await).await.unwrap(),
        ExecutionOutcome::Skipped
    );
    assert_eq!(mock.call_count(), 0);
    assert_eq!(h.queue.queue_length(&activity_subject("t")), 0);
}

#[tokio::test]
async fn undecodable_message_is_acked_and_reported() {
    let h = Harness::new(&["t"]).await;
    let subject = activity_subject("t");
    h.queue.publish(&subject, json!({ "bogus": 1 })).await.unwrap();

    let executor = h.executor("t", Arc::new(MockProcessor::completing("never")));
    let err = executor.handle(&h.take_one("t").await).await.unwrap_err();

    assert!(matches!(err, EngineError::InvalidMessage(_)));
    assert_eq!(h.queue.queue_length(&subject), 0);
}

#[tokio::test]
async fn message_for_unknown_orchestration_is_dropped() {
    let h = Harness::new(&["t"]).await;
    let subject = activity_subject("t");
    let message = ActivityMessage {
        orchestration_id: "ghost".into(),
        activity: Activity::new("a", "t"),
    };
    publish_message(h.queue.as_ref(), &subject, &message).await.unwrap();

    let executor = h.executor("t", Arc::new(MockProcessor::completing("never")));
    let err = executor.handle(&h.take_one("t").await).await.unwrap_err();

    assert!(matches!(err, EngineError::DocumentNotFound(id) if id == "ghost"));
    assert_eq!(h.queue.queue_length(&subject), 0);
}

// ============================================================
// Worker
// ============================================================

#[tokio::test]
async fn worker_runs_a_diamond_to_completion() {
    let h = Harness::new(&["alpha", "beta"]).await;
    let alpha = Arc::new(MockProcessor::completing("alpha"));
    let beta = Arc::new(MockProcessor::completing("beta"));
    let mut registry: ProcessorRegistry = HashMap::new();
    registry.insert("alpha".into(), alpha.clone());
    registry.insert("beta".into(), beta.clone());

    let config = ExecutorConfig {
        fetch_wait_ms: 20,
        consumers_per_type: 2,
        ..ExecutorConfig::default()
    };
    let worker = Worker::start(
        &registry,
        h.documents.clone(),
        h.queue.clone(),
        config,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(worker.consumer_count(), 4);

    let activities = vec![
        Activity::new("root", "alpha"),
        Activity::new("left", "beta").depends_on(["root"]),
        Activity::new("right", "alpha").depends_on(["root"]),
        Activity::new("join", "beta").depends_on(["left", "right"]),
    ];
    h.orchestrator
        .start(&activities, payload(), "o-1", "corr-1", "test")
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        while h.queue.published(RESPONSE_SUBJECT).is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("orchestration did not finish in time");

    worker.shutdown().await;

    assert_eq!(h.state("o-1").await, OrchestrationState::Completed);
    assert_eq!(h.queue.published(RESPONSE_SUBJECT).len(), 1);
    assert_eq!(alpha.calls_for("root"), 1);
    assert_eq!(alpha.calls_for("right"), 1);
    assert_eq!(beta.calls_for("left"), 1);
    assert_eq!(beta.calls_for("join"), 1);
}
