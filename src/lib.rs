//! A client-side telemetry pipeline: captures errors and warnings, keeps them in a persistent
//! queue, and ships them to a server in batches.
//!
//! The pipeline protects both ends from error storms:
//!
//! - a **dedup window** drops identical entries recorded within a few seconds of each other,
//! - a **circuit breaker** stops sending after repeated failures and retries after a cooldown,
//! - the **queue** is mirrored to durable storage after every change, so entries survive a
//!   restart until the server accepted them.
//!
//! # Usage
//!
//! ```rust,no_run
//! use client_telemetry::{new_pipeline, Config, ErrorInfo, FileStore, HttpTransport};
//! use std::sync::Arc;
//!
//! # #[cfg(feature = "reqwest")]
//! #[tokio::main]
//! async fn main() -> Result<(), client_telemetry::Error> {
//!     let config = Config::from_env()?;
//!     let transport = HttpTransport::from_config(reqwest::Client::new(), &config)?;
//!     let telemetry = new_pipeline(transport)
//!         .with_config(config)
//!         .with_store(Arc::new(FileStore::new("/var/lib/my-app/telemetry")))
//!         .install()?;
//!
//!     telemetry.log_warning("cache miss storm", None);
//!     telemetry.log_error("could not render cart", Some(ErrorInfo::new("index out of bounds")), None);
//!
//!     telemetry.shutdown().await;
//!     Ok(())
//! }
//! # #[cfg(not(feature = "reqwest"))]
//! # fn main() {}
//! ```
//!
//! # Delivery
//!
//! Every tick the scheduler takes up to `batch_size` entries from the head of the queue and hands
//! them to the [`Transport`]. If the transport accepts the batch, exactly those entries are
//! removed. If it fails, the queue is left as it was and the failure counts towards opening the
//! circuit breaker. Delivery is at-least-once: a crash between a successful send and the
//! persistence of the shortened queue sends the batch again after restart.
//!
//! # Configuration
//!
//! | Option             | Default | Meaning                                            |
//! | ------------------ | ------- | -------------------------------------------------- |
//! | `batchSize`        | 10      | Maximum entries per send                           |
//! | `tickIntervalMs`   | 5000    | Interval between send attempts                     |
//! | `failureThreshold` | 5       | Consecutive failures before the circuit opens      |
//! | `openDurationMs`   | 60000   | How long the circuit stays open                    |
//! | `dedupeWindowMs`   | 5000    | Identical entries within this window are dropped   |
//! | `maxQueueSize`     | 1000    | Entries beyond this are dropped; `0` for unbounded |
//! | `storageKey`       | `client_telemetry_queue` | Key the queue is persisted under  |
//! | `endpoint`         |         | URL for [`HttpTransport::from_config`]             |
#![doc(html_root_url = "https://docs.rs/client-telemetry/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs, unreachable_pub, missing_debug_implementations)]

mod circuit_breaker;
mod clock;
mod config;
mod convert;
mod dedup;
mod error;
mod fallback;
mod http_client;
mod models;
mod pipeline;
mod queue;
mod scheduler;
mod store;
mod telemetry;
mod uploader;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError, CONFIG_ENV_VAR};
pub use dedup::DedupWindow;
pub use error::Error;
pub use fallback::{FallbackLogger, TracingFallback};
pub use http_client::{HttpClient, HttpError};
pub use models::{Properties, SeverityLevel, TelemetryEntry, Timestamp, WireEntry};
pub use pipeline::{new_pipeline, Pipeline, DEFAULT_USER_AGENT};
pub use queue::TelemetryQueue;
pub use scheduler::{BatchOutcome, BatchScheduler};
pub use store::{FileStore, MemoryStore, Store};
pub use telemetry::{ErrorInfo, HttpFailure, Telemetry};
pub use uploader::{HttpTransport, Transport};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, ignoring poisoning. Every mutation in this crate leaves its state consistent
/// before anything that could panic runs.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
