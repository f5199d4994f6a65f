//! Last-resort sink for failures of the pipeline itself.

use std::fmt::Debug;

/// Receives problems the pipeline can't report through itself: persistence failures, dropped
/// entries, internal errors in the facade.
pub trait FallbackLogger: Debug + Send + Sync {
    /// Something was lost or degraded, but the pipeline keeps working.
    fn warn(&self, message: &str);

    /// An unexpected internal failure.
    fn error(&self, message: &str);
}

/// Forwards to `tracing` under the `client_telemetry::fallback` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFallback;

impl FallbackLogger for TracingFallback {
    fn warn(&self, message: &str) {
        tracing::warn!(target: "client_telemetry::fallback", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "client_telemetry::fallback", "{}", message);
    }
}
