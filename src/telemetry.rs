use crate::{
    convert::source_context_from_stack,
    lock,
    models::{Properties, Sanitize, SeverityLevel, TelemetryEntry},
    scheduler::Ticker,
    BatchOutcome, BatchScheduler, CircuitBreaker, CircuitState, Clock, DedupWindow, Error,
    FallbackLogger, TelemetryQueue,
};
use std::{
    backtrace::{Backtrace, BacktraceStatus},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
    time::Duration,
};

/// Message and optional stack of an error being reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error message.
    pub message: String,
    /// Stack trace, in whatever format the error source produced.
    pub stack: Option<String>,
}

impl ErrorInfo {
    /// Error details without a stack.
    pub fn new(message: impl Into<String>) -> Self {
        ErrorInfo {
            message: message.into(),
            stack: None,
        }
    }

    /// Attach a stack trace.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Capture a Rust error. The stack lists the `source()` chain, followed by a backtrace if
    /// backtraces are enabled (`RUST_BACKTRACE`).
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut stack = String::new();
        let mut source = error.source();
        while let Some(cause) = source {
            stack.push_str(&format!("Caused by: {}\n", cause));
            source = cause.source();
        }
        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            stack.push_str(&backtrace.to_string());
        }
        ErrorInfo {
            message: error.to_string(),
            stack: Some(stack).filter(|s| !s.is_empty()),
        }
    }
}

/// A failed network call being reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    /// Request method.
    pub method: String,
    /// Request URL.
    pub url: String,
    /// Response status, if a response arrived.
    pub status_code: Option<u16>,
}

impl HttpFailure {
    /// Describe a failed request.
    pub fn new(method: impl Into<String>, url: impl Into<String>, status_code: Option<u16>) -> Self {
        HttpFailure {
            method: method.into(),
            url: url.into(),
            status_code,
        }
    }
}

/// Client telemetry facade.
///
/// Created with [`new_pipeline`](crate::new_pipeline). The `log_*` methods never fail and never
/// panic: problems inside the pipeline end up at the [`FallbackLogger`].
#[derive(Debug)]
pub struct Telemetry {
    pub(crate) queue: Arc<Mutex<TelemetryQueue>>,
    pub(crate) dedup: Mutex<DedupWindow>,
    pub(crate) breaker: Arc<Mutex<CircuitBreaker>>,
    pub(crate) scheduler: Arc<BatchScheduler>,
    pub(crate) ticker: Mutex<Option<Ticker>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) fallback: Arc<dyn FallbackLogger>,
    pub(crate) user_agent: String,
    pub(crate) tick_interval: Duration,
}

impl Telemetry {
    /// Record a debug message.
    pub fn log_debug(&self, message: impl Into<String>, context: Option<Properties>) {
        self.log(SeverityLevel::Debug, message.into(), None, context);
    }

    /// Record an informational message.
    pub fn log_info(&self, message: impl Into<String>, context: Option<Properties>) {
        self.log(SeverityLevel::Info, message.into(), None, context);
    }

    /// Record a warning.
    pub fn log_warning(&self, message: impl Into<String>, context: Option<Properties>) {
        self.log(SeverityLevel::Warning, message.into(), None, context);
    }

    /// Record an error.
    ///
    /// ```
    /// # use client_telemetry::{new_pipeline, ErrorInfo, Transport, WireEntry, Error};
    /// # #[derive(Debug)]
    /// # struct Discard;
    /// # #[async_trait::async_trait]
    /// # impl Transport for Discard {
    /// #     async fn send(&self, _batch: &[WireEntry]) -> Result<(), Error> { Ok(()) }
    /// # }
    /// let telemetry = new_pipeline(Discard).build();
    /// let err = std::fs::read("/does/not/exist").unwrap_err();
    /// telemetry.log_error("could not load settings", Some(ErrorInfo::from_error(&err)), None);
    /// assert_eq!(1, telemetry.pending());
    /// ```
    pub fn log_error(
        &self,
        message: impl Into<String>,
        error: Option<ErrorInfo>,
        context: Option<Properties>,
    ) {
        self.log(SeverityLevel::Error, message.into(), error, context);
    }

    /// Record a failure that leaves the client unusable.
    pub fn log_critical(
        &self,
        message: impl Into<String>,
        error: Option<ErrorInfo>,
        context: Option<Properties>,
    ) {
        self.log(SeverityLevel::Critical, message.into(), error, context);
    }

    /// Record a failed network call.
    pub fn log_http_failure(
        &self,
        message: impl Into<String>,
        failure: HttpFailure,
        context: Option<Properties>,
    ) {
        let message = message.into();
        self.guarded(|| {
            let entry = self
                .build_entry(SeverityLevel::Error, message, None, context)
                .with_request(failure.url, failure.method, failure.status_code);
            self.admit(entry);
        });
    }

    /// Record a pre-built entry. Missing agent string and source context are filled in.
    ///
    /// Returns whether the entry was queued; duplicates and entries that don't fit into a full
    /// queue are not.
    pub fn log_entry(&self, mut entry: TelemetryEntry) -> bool {
        self.guarded(|| {
            if entry.user_agent.is_none() {
                entry.user_agent = Some(self.user_agent.clone());
            }
            if entry.source_context.is_none() {
                entry.source_context = Some(source_context_from_stack(entry.stack_trace.as_deref()));
            }
            self.admit(entry)
        })
        .unwrap_or(false)
    }

    /// Start sending a batch every tick interval on the current Tokio runtime. Does nothing if
    /// the tick is already running.
    pub fn start(&self) -> Result<(), Error> {
        let mut ticker = lock(&self.ticker);
        if ticker.is_none() {
            *ticker = Some(self.scheduler.clone().spawn(self.tick_interval)?);
        }
        Ok(())
    }

    /// Send one batch now instead of waiting for the next tick.
    pub async fn flush(&self) -> BatchOutcome {
        self.scheduler.process_batch().await
    }

    /// Number of queued entries.
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Current circuit breaker state.
    pub fn circuit_state(&self) -> CircuitState {
        lock(&self.breaker).state()
    }

    /// Failed sends since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        lock(&self.breaker).consecutive_failures()
    }

    /// Stop the recurring tick. A batch that is being sent finishes first; queued entries stay
    /// persisted for the next process.
    pub async fn shutdown(&self) {
        let ticker = lock(&self.ticker).take();
        if let Some(ticker) = ticker {
            ticker.shutdown().await;
        }
    }

    fn log(
        &self,
        severity: SeverityLevel,
        message: String,
        error: Option<ErrorInfo>,
        context: Option<Properties>,
    ) {
        self.guarded(|| {
            let entry = self.build_entry(severity, message, error, context);
            self.admit(entry);
        });
    }

    fn build_entry(
        &self,
        severity: SeverityLevel,
        message: String,
        error: Option<ErrorInfo>,
        context: Option<Properties>,
    ) -> TelemetryEntry {
        let mut entry = TelemetryEntry::new(severity, message, self.clock.now())
            .with_user_agent(self.user_agent.clone());
        if let Some(error) = error {
            entry = entry.with_exception(error.message, error.stack);
        }
        entry.source_context = Some(source_context_from_stack(entry.stack_trace.as_deref()));
        if let Some(context) = context {
            entry = entry.with_context(context);
        }
        entry
    }

    fn admit(&self, mut entry: TelemetryEntry) -> bool {
        entry.sanitize();
        let mut dedup = lock(&self.dedup);
        if !dedup.should_admit(&entry) {
            return false;
        }
        let mut queue = lock(&self.queue);
        // A dropped entry must not suppress its own retry once there is room again.
        if queue.is_full() {
            dedup.forget(&entry);
        }
        queue.append(entry)
    }

    /// Run `f`, turning a panic into a fallback error.
    fn guarded<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => Some(result),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                self.fallback
                    .error(&format!("Failed to record telemetry: {}", reason));
                None
            }
        }
    }
}
