use crate::{
    BatchScheduler, CircuitBreaker, Clock, Config, DedupWindow, Error, FallbackLogger,
    MemoryStore, Store, SystemClock, Telemetry, TelemetryQueue, TracingFallback, Transport,
};
use std::sync::{Arc, Mutex};

/// Agent string used when neither the entry nor the pipeline provides one.
pub const DEFAULT_USER_AGENT: &str = concat!("client-telemetry/", env!("CARGO_PKG_VERSION"));

/// Create a new telemetry pipeline builder sending through `transport`.
pub fn new_pipeline<T: Transport + 'static>(transport: T) -> Pipeline {
    Pipeline {
        transport: Arc::new(transport),
        config: Config::default(),
        store: None,
        clock: None,
        fallback: None,
        user_agent: None,
    }
}

/// Telemetry pipeline builder.
#[derive(Debug)]
pub struct Pipeline {
    transport: Arc<dyn Transport>,
    config: Config,
    store: Option<Arc<dyn Store>>,
    clock: Option<Arc<dyn Clock>>,
    fallback: Option<Arc<dyn FallbackLogger>>,
    user_agent: Option<String>,
}

impl Pipeline {
    /// Set the configuration.
    ///
    /// Default: [`Config::default`]
    pub fn with_config(self, config: Config) -> Self {
        Self { config, ..self }
    }

    /// Set the store the queue is persisted to.
    ///
    /// Default: [`MemoryStore`], i.e. nothing survives the process.
    pub fn with_store(self, store: Arc<dyn Store>) -> Self {
        Self {
            store: Some(store),
            ..self
        }
    }

    /// Set the time source.
    ///
    /// Default: [`SystemClock`]
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock: Some(clock),
            ..self
        }
    }

    /// Set where failures of the pipeline itself are reported.
    ///
    /// Default: [`TracingFallback`]
    pub fn with_fallback(self, fallback: Arc<dyn FallbackLogger>) -> Self {
        Self {
            fallback: Some(fallback),
            ..self
        }
    }

    /// Set the agent string recorded with every entry.
    ///
    /// Default: [`DEFAULT_USER_AGENT`]
    pub fn with_user_agent(self, user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: Some(user_agent.into()),
            ..self
        }
    }

    /// Build the pipeline without a recurring tick. Batches are only sent on
    /// [`Telemetry::flush`].
    ///
    /// Restores the queue persisted by a previous process.
    pub fn build(self) -> Telemetry {
        let config = self.config.normalized();
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let fallback = self
            .fallback
            .unwrap_or_else(|| Arc::new(TracingFallback));
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.into());

        let queue = Arc::new(Mutex::new(TelemetryQueue::load(
            store,
            config.storage_key.clone(),
            config.max_queue_size,
            fallback.clone(),
        )));
        let breaker = Arc::new(Mutex::new(CircuitBreaker::new(
            config.failure_threshold,
            config.open_duration,
            clock.clone(),
        )));
        let scheduler = Arc::new(BatchScheduler::new(
            queue.clone(),
            breaker.clone(),
            self.transport,
            config.batch_size,
            user_agent.clone(),
        ));

        Telemetry {
            queue,
            dedup: Mutex::new(DedupWindow::new(config.dedupe_window, clock.clone())),
            breaker,
            scheduler,
            ticker: Mutex::new(None),
            clock,
            fallback,
            user_agent,
            tick_interval: config.tick_interval,
        }
    }

    /// Build the pipeline and start sending a batch every `tick_interval` on the current Tokio
    /// runtime.
    ///
    /// Fails if called outside of a Tokio runtime.
    pub fn install(self) -> Result<Telemetry, Error> {
        let telemetry = self.build();
        telemetry.start()?;
        Ok(telemetry)
    }
}
