//! End to end behavior of the telemetry pipeline: restarts, capacity, scheduling.

use async_trait::async_trait;
use client_telemetry::{
    new_pipeline, BatchOutcome, CircuitState, Config, Error, ErrorInfo, FallbackLogger, FileStore,
    ManualClock, MemoryStore, Store, Telemetry, Transport, WireEntry,
};
use std::{
    collections::VecDeque,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Debug, Default)]
struct ScriptedTransport {
    failures: Mutex<VecDeque<bool>>,
    batches: Mutex<Vec<Vec<String>>>,
}

impl ScriptedTransport {
    /// Fail the next send.
    fn fail_next(&self) {
        self.failures.lock().unwrap().push_back(true);
    }

    fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, batch: &[WireEntry]) -> Result<(), Error> {
        self.batches
            .lock()
            .unwrap()
            .push(batch.iter().map(|entry| entry.message.clone()).collect());
        if self.failures.lock().unwrap().pop_front().unwrap_or(false) {
            Err(Error::Upload("503: Retry possible".into()))
        } else {
            Ok(())
        }
    }
}

// Lets tests keep a handle on the transport after handing it to the pipeline.
#[derive(Debug, Clone)]
struct Shared(Arc<ScriptedTransport>);

#[async_trait]
impl Transport for Shared {
    async fn send(&self, batch: &[WireEntry]) -> Result<(), Error> {
        self.0.send(batch).await
    }
}

#[derive(Debug, Default)]
struct RecordingFallback {
    warnings: Mutex<Vec<String>>,
}

impl FallbackLogger for RecordingFallback {
    fn warn(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.into());
    }

    fn error(&self, message: &str) {
        panic!("unexpected fallback error: {}", message);
    }
}

fn start_time() -> chrono::DateTime<chrono::Utc> {
    "2024-03-01T00:00:00Z".parse().unwrap()
}

fn build_telemetry(
    transport: &Arc<ScriptedTransport>,
    store: Arc<dyn Store>,
    config: &str,
) -> (Arc<ManualClock>, Telemetry) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let telemetry = new_pipeline(Shared(transport.clone()))
        .with_config(config.parse::<Config>().unwrap())
        .with_store(store)
        .with_clock(clock.clone())
        .build();
    (clock, telemetry)
}

fn memory_store() -> Arc<dyn Store> {
    Arc::new(MemoryStore::new())
}

fn file_store(dir: &Path) -> Arc<dyn Store> {
    Arc::new(FileStore::new(dir))
}

#[tokio::test]
async fn batches_are_sent_in_order() {
    let transport = Arc::new(ScriptedTransport::default());
    let (_, telemetry) = build_telemetry(&transport, memory_store(), "BatchSize=2");
    for message in ["A", "B", "C"] {
        telemetry.log_error(message, None, None);
    }

    assert_eq!(BatchOutcome::Sent(2), telemetry.flush().await);
    assert_eq!(BatchOutcome::Sent(1), telemetry.flush().await);
    assert_eq!(BatchOutcome::Empty, telemetry.flush().await);
    assert_eq!(vec![vec!["A", "B"], vec!["C"]], transport.batches());
}

#[tokio::test]
async fn failed_batch_is_retried_then_removed() {
    let transport = Arc::new(ScriptedTransport::default());
    let (_, telemetry) = build_telemetry(&transport, memory_store(), "BatchSize=2");
    for message in ["A", "B", "C"] {
        telemetry.log_error(message, None, None);
    }

    transport.fail_next();
    assert_eq!(BatchOutcome::Failed(2), telemetry.flush().await);
    assert_eq!(3, telemetry.pending());
    assert_eq!(1, telemetry.consecutive_failures());

    assert_eq!(BatchOutcome::Sent(2), telemetry.flush().await);
    assert_eq!(1, telemetry.pending());
    assert_eq!(0, telemetry.consecutive_failures());
    assert_eq!(vec![vec!["A", "B"], vec!["A", "B"]], transport.batches());
}

#[tokio::test]
async fn breaker_opens_after_threshold_and_recovers() {
    let transport = Arc::new(ScriptedTransport::default());
    let (clock, telemetry) = build_telemetry(
        &transport,
        memory_store(),
        "FailureThreshold=3;OpenDurationMs=60000",
    );
    telemetry.log_error("boom", Some(ErrorInfo::new("down")), None);

    for _ in 0..3 {
        transport.fail_next();
        assert_eq!(BatchOutcome::Failed(1), telemetry.flush().await);
    }
    assert_eq!(CircuitState::Open, telemetry.circuit_state());

    clock.advance(Duration::from_secs(59));
    assert_eq!(BatchOutcome::CircuitOpen, telemetry.flush().await);
    assert_eq!(3, transport.batches().len());

    clock.advance(Duration::from_secs(1));
    assert_eq!(BatchOutcome::Sent(1), telemetry.flush().await);
    assert_eq!(CircuitState::Closed, telemetry.circuit_state());
    assert_eq!(0, telemetry.pending());
}

#[tokio::test]
async fn queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::default());

    {
        let (_, telemetry) = build_telemetry(&transport, file_store(dir.path()), "BatchSize=1");
        telemetry.log_error("A", None, None);
        telemetry.log_warning("B", None);
        telemetry.log_error("C", Some(ErrorInfo::new("x").with_stack("at f (a.js:1:1)")), None);

        assert_eq!(BatchOutcome::Sent(1), telemetry.flush().await);
        transport.fail_next();
        assert_eq!(BatchOutcome::Failed(1), telemetry.flush().await);
    }

    let (_, telemetry) = build_telemetry(&transport, file_store(dir.path()), "BatchSize=10");
    assert_eq!(2, telemetry.pending());
    assert_eq!(BatchOutcome::Sent(2), telemetry.flush().await);
    assert_eq!(
        vec![vec!["A"], vec!["B"], vec!["B", "C"]],
        transport.batches()
    );

    let (_, telemetry) = build_telemetry(&transport, file_store(dir.path()), "");
    assert_eq!(0, telemetry.pending());
}

#[tokio::test]
async fn full_queue_drops_new_entries() {
    let transport = Arc::new(ScriptedTransport::default());
    let fallback = Arc::new(RecordingFallback::default());
    let telemetry = new_pipeline(Shared(transport.clone()))
        .with_config("MaxQueueSize=2".parse().unwrap())
        .with_fallback(fallback.clone())
        .with_clock(Arc::new(ManualClock::new(start_time())))
        .build();

    for message in ["A", "B", "C"] {
        telemetry.log_error(message, None, None);
    }
    assert_eq!(2, telemetry.pending());
    let warnings = fallback.warnings.lock().unwrap().clone();
    assert_eq!(1, warnings.len());
    assert!(warnings[0].contains("dropping entry: C"));

    assert_eq!(BatchOutcome::Sent(2), telemetry.flush().await);
    assert_eq!(vec![vec!["A", "B"]], transport.batches());
}

#[test]
fn zero_queue_size_from_json_is_unbounded() {
    let transport = Arc::new(ScriptedTransport::default());
    let config: Config = serde_json::from_str(r#"{"maxQueueSize": 0}"#).unwrap();
    let telemetry = new_pipeline(Shared(transport))
        .with_config(config)
        .with_clock(Arc::new(ManualClock::new(start_time())))
        .build();

    for message in ["A", "B", "C"] {
        telemetry.log_error(message, None, None);
    }
    assert_eq!(3, telemetry.pending());
}

#[tokio::test]
async fn duplicates_are_sent_once() {
    let transport = Arc::new(ScriptedTransport::default());
    let (clock, telemetry) = build_telemetry(&transport, memory_store(), "");
    for _ in 0..50 {
        telemetry.log_error("render loop", Some(ErrorInfo::new("stack overflow")), None);
        clock.advance(Duration::from_millis(10));
    }
    telemetry.log_error("render loop", Some(ErrorInfo::new("out of memory")), None);

    assert_eq!(BatchOutcome::Sent(2), telemetry.flush().await);
    assert_eq!(vec![vec!["render loop", "render loop"]], transport.batches());
}

#[tokio::test(start_paused = true)]
async fn installed_pipeline_sends_on_tick() {
    let transport = Arc::new(ScriptedTransport::default());
    let telemetry = new_pipeline(Shared(transport.clone()))
        .with_config("TickIntervalMs=1000".parse().unwrap())
        .with_clock(Arc::new(ManualClock::new(start_time())))
        .install()
        .unwrap();

    telemetry.log_error("A", None, None);
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(vec![vec!["A"]], transport.batches());

    telemetry.shutdown().await;
    telemetry.log_error("B", None, None);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(1, transport.batches().len());
    assert_eq!(1, telemetry.pending());
}

#[test]
fn install_outside_runtime_fails() {
    let transport = Arc::new(ScriptedTransport::default());
    let result = new_pipeline(Shared(transport)).install();
    assert!(matches!(result, Err(Error::Runtime(_))));
}
