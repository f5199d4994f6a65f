use crate::{
    lock, models::WireEntry, CircuitBreaker, Error, TelemetryQueue, Transport,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    runtime::Handle,
    sync::oneshot,
    task::{self, JoinHandle},
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

/// What a call to [`BatchScheduler::process_batch`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The circuit breaker is open; nothing was sent.
    CircuitOpen,
    /// The queue is empty; nothing was sent.
    Empty,
    /// Another batch is still being sent; nothing was sent.
    InFlight,
    /// This many entries were accepted and removed from the queue.
    Sent(usize),
    /// Sending this many entries failed; they stay queued.
    Failed(usize),
}

/// Takes batches from the queue and hands them to the transport.
#[derive(Debug)]
pub struct BatchScheduler {
    queue: Arc<Mutex<TelemetryQueue>>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    transport: Arc<dyn Transport>,
    batch_size: usize,
    default_user_agent: String,
    in_flight: AtomicBool,
}

impl BatchScheduler {
    /// Create a scheduler sending at most `batch_size` entries at a time.
    pub fn new(
        queue: Arc<Mutex<TelemetryQueue>>,
        breaker: Arc<Mutex<CircuitBreaker>>,
        transport: Arc<dyn Transport>,
        batch_size: usize,
        default_user_agent: impl Into<String>,
    ) -> Self {
        BatchScheduler {
            queue,
            breaker,
            transport,
            batch_size: batch_size.max(1),
            default_user_agent: default_user_agent.into(),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Send the head of the queue, if the breaker allows it.
    ///
    /// On success exactly the sent entries are removed, however many were appended meanwhile. On
    /// failure the queue is left untouched and the breaker is told. Only one batch is in flight
    /// at a time; overlapping calls return [`BatchOutcome::InFlight`].
    pub async fn process_batch(&self) -> BatchOutcome {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return BatchOutcome::InFlight;
        }
        let _in_flight = InFlightGuard(&self.in_flight);

        if lock(&self.breaker).is_open() {
            return BatchOutcome::CircuitOpen;
        }
        let batch = lock(&self.queue).take_front(self.batch_size);
        if batch.is_empty() {
            return BatchOutcome::Empty;
        }

        let count = batch.len();
        let wire: Vec<WireEntry> = batch
            .iter()
            .map(|entry| WireEntry::from_entry(entry, &self.default_user_agent))
            .collect();

        debug!(batch_size = count, "sending telemetry batch");
        match self.transport.send(&wire).await {
            Ok(()) => {
                // Persisting the shortened queue may block on the store.
                let queue = Arc::clone(&self.queue);
                let pending = task::spawn_blocking(move || {
                    let mut queue = lock(&queue);
                    queue.remove_front(count);
                    queue.len()
                })
                .await
                .unwrap_or_else(|err| {
                    warn!(error = %err, "removing sent telemetry batch failed");
                    lock(&self.queue).len()
                });
                lock(&self.breaker).on_success();
                debug!(batch_size = count, pending, "telemetry batch accepted");
                BatchOutcome::Sent(count)
            }
            Err(err) => {
                lock(&self.breaker).on_failure();
                debug!(batch_size = count, error = %err, "telemetry batch failed");
                BatchOutcome::Failed(count)
            }
        }
    }

    /// Run [`process_batch`](Self::process_batch) every `tick_interval` on the current Tokio
    /// runtime until the returned handle is shut down or dropped.
    pub(crate) fn spawn(self: Arc<Self>, tick_interval: Duration) -> Result<Ticker, Error> {
        let runtime = Handle::try_current().map_err(Error::Runtime)?;
        let (stop_sender, mut stop_receiver) = oneshot::channel::<()>();
        let task = runtime.spawn(async move {
            let mut interval = time::interval_at(Instant::now() + tick_interval, tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_receiver => break,
                    _ = interval.tick() => {
                        self.process_batch().await;
                    }
                }
            }
            debug!("telemetry scheduler stopped");
        });
        Ok(Ticker {
            stop: Some(stop_sender),
            task: Some(task),
        })
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to the recurring tick task.
#[derive(Debug)]
pub(crate) struct Ticker {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Stop ticking. A batch that is currently being sent finishes first.
    pub(crate) async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "telemetry scheduler task failed");
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fallback::testing::RecordingFallback,
        models::{SeverityLevel, TelemetryEntry},
        CircuitState, ManualClock, MemoryStore,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Notify;

    #[derive(Debug, Default)]
    struct ScriptedTransport {
        results: Mutex<VecDeque<bool>>,
        sent: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedTransport {
        fn push(&self, ok: bool) {
            self.results.lock().unwrap().push_back(ok);
        }

        fn sent(&self) -> Vec<Vec<String>> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, batch: &[WireEntry]) -> Result<(), Error> {
            self.sent
                .lock()
                .unwrap()
                .push(batch.iter().map(|e| e.message.clone()).collect());
            match self.results.lock().unwrap().pop_front() {
                Some(false) => Err(Error::Upload("503: Retry possible".into())),
                _ => Ok(()),
            }
        }
    }

    struct Setup {
        queue: Arc<Mutex<TelemetryQueue>>,
        breaker: Arc<Mutex<CircuitBreaker>>,
        transport: Arc<ScriptedTransport>,
        scheduler: BatchScheduler,
    }

    fn setup(batch_size: usize, threshold: u32) -> Setup {
        let clock = Arc::new(ManualClock::new("2024-03-01T00:00:00Z".parse().unwrap()));
        let queue = Arc::new(Mutex::new(TelemetryQueue::load(
            Arc::new(MemoryStore::new()),
            "q",
            None,
            Arc::new(RecordingFallback::default()),
        )));
        let breaker = Arc::new(Mutex::new(CircuitBreaker::new(
            threshold,
            Duration::from_secs(60),
            clock,
        )));
        let transport = Arc::new(ScriptedTransport::default());
        let scheduler = BatchScheduler::new(
            queue.clone(),
            breaker.clone(),
            transport.clone(),
            batch_size,
            "agent/1.0",
        );
        Setup {
            queue,
            breaker,
            transport,
            scheduler,
        }
    }

    fn enqueue(queue: &Mutex<TelemetryQueue>, messages: &[&str]) {
        let mut queue = queue.lock().unwrap();
        for message in messages {
            queue.append(TelemetryEntry::new(
                SeverityLevel::Error,
                *message,
                "2024-03-01T00:00:00Z",
            ));
        }
    }

    fn queued(queue: &Mutex<TelemetryQueue>) -> Vec<String> {
        queue
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }

    #[tokio::test]
    async fn failed_send_keeps_batch_then_success_removes_it() {
        let s = setup(2, 5);
        enqueue(&s.queue, &["A", "B", "C"]);

        s.transport.push(false);
        assert_eq!(BatchOutcome::Failed(2), s.scheduler.process_batch().await);
        assert_eq!(vec!["A", "B", "C"], queued(&s.queue));
        assert_eq!(1, s.breaker.lock().unwrap().consecutive_failures());

        s.transport.push(true);
        assert_eq!(BatchOutcome::Sent(2), s.scheduler.process_batch().await);
        assert_eq!(vec!["C"], queued(&s.queue));
        assert_eq!(0, s.breaker.lock().unwrap().consecutive_failures());

        assert_eq!(
            vec![vec!["A", "B"], vec!["A", "B"]],
            s.transport.sent()
        );
    }

    #[tokio::test]
    async fn empty_queue_sends_nothing() {
        let s = setup(2, 5);
        assert_eq!(BatchOutcome::Empty, s.scheduler.process_batch().await);
        assert!(s.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn open_breaker_skips_send() {
        let s = setup(2, 1);
        enqueue(&s.queue, &["A"]);
        s.transport.push(false);
        assert_eq!(BatchOutcome::Failed(1), s.scheduler.process_batch().await);
        assert_eq!(CircuitState::Open, s.breaker.lock().unwrap().state());

        assert_eq!(BatchOutcome::CircuitOpen, s.scheduler.process_batch().await);
        assert_eq!(1, s.transport.sent().len());
        assert_eq!(vec!["A"], queued(&s.queue));
    }

    #[derive(Debug, Default)]
    struct GatedTransport {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn send(&self, _batch: &[WireEntry]) -> Result<(), Error> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn overlapping_calls_remove_only_captured_prefix() {
        let s = setup(2, 5);
        let transport = Arc::new(GatedTransport::default());
        let scheduler = Arc::new(BatchScheduler::new(
            s.queue.clone(),
            s.breaker.clone(),
            transport.clone(),
            2,
            "agent/1.0",
        ));
        enqueue(&s.queue, &["A", "B"]);

        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.process_batch().await }
        });
        transport.started.notified().await;

        enqueue(&s.queue, &["C", "D"]);
        assert_eq!(BatchOutcome::InFlight, scheduler.process_batch().await);

        transport.release.notify_one();
        assert_eq!(BatchOutcome::Sent(2), first.await.unwrap());
        assert_eq!(vec!["C", "D"], queued(&s.queue));
    }

    #[derive(Debug)]
    struct BlockingStore {
        armed: AtomicBool,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
        timed_out: AtomicBool,
    }

    impl crate::Store for BlockingStore {
        fn load(&self, _key: &str) -> Result<Option<String>, Error> {
            Ok(None)
        }

        fn save(&self, _key: &str, _value: &str) -> Result<(), Error> {
            if self.armed.load(Ordering::SeqCst) {
                let release = self.release.lock().unwrap();
                if release.recv_timeout(Duration::from_secs(2)).is_err() {
                    self.timed_out.store(true, Ordering::SeqCst);
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn slow_store_does_not_block_the_runtime() {
        let (release, receiver) = std::sync::mpsc::channel();
        let store = Arc::new(BlockingStore {
            armed: AtomicBool::new(false),
            release: Mutex::new(receiver),
            timed_out: AtomicBool::new(false),
        });
        let s = setup(2, 5);
        let queue = Arc::new(Mutex::new(TelemetryQueue::load(
            store.clone(),
            "q",
            None,
            Arc::new(RecordingFallback::default()),
        )));
        enqueue(&queue, &["A"]);
        let scheduler = BatchScheduler::new(
            queue.clone(),
            s.breaker.clone(),
            s.transport.clone(),
            2,
            "agent/1.0",
        );

        store.armed.store(true, Ordering::SeqCst);
        // On this single-threaded runtime the release only gets sent if the store write runs
        // off the runtime thread.
        let (outcome, _) = tokio::join!(scheduler.process_batch(), async {
            release.send(()).unwrap();
        });

        assert_eq!(BatchOutcome::Sent(1), outcome);
        assert!(!store.timed_out.load(Ordering::SeqCst));
        assert!(queued(&queue).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_sends_on_interval_until_shutdown() {
        let s = setup(10, 5);
        let scheduler = Arc::new(s.scheduler);
        enqueue(&s.queue, &["A"]);

        let ticker = scheduler.clone().spawn(Duration::from_secs(5)).unwrap();
        time::sleep(Duration::from_millis(4900)).await;
        assert!(s.transport.sent().is_empty());
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(vec![vec!["A".to_string()]], s.transport.sent());

        ticker.shutdown().await;
        enqueue(&s.queue, &["B"]);
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(1, s.transport.sent().len());
        assert_eq!(vec!["B"], queued(&s.queue));
    }
}
