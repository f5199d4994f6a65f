use crate::config::ConfigError;
use std::{error::Error as StdError, fmt::Debug};

/// Errors that occurred inside the telemetry pipeline.
///
/// None of these reach callers of the logging facade; they surface through the fallback logger,
/// the circuit breaker and the return values of the lower level building blocks.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The queue could not be serialized for persistence.
    ///
    /// Note: This is an error in this crate. If you spot this, please open an issue.
    #[error("serializing queue failed with {0}")]
    SerializeQueue(serde_json::Error),

    /// The persisted queue could not be read back. The queue starts empty when this happens.
    #[error("deserializing persisted queue failed with {0}")]
    DeserializeQueue(serde_json::Error),

    /// A batch could not be serialized for upload.
    ///
    /// Note: This is an error in this crate. If you spot this, please open an issue.
    #[error("serializing upload request failed with {0}")]
    SerializeRequest(serde_json::Error),

    /// Reading from or writing to the persistent store failed.
    #[error("persistent store failed with {0}")]
    Store(#[from] std::io::Error),

    /// The persistent store refused the operation, e.g. because its quota is exhausted.
    #[error("persistent store unavailable: {0}")]
    StoreUnavailable(String),

    /// Could not complete the request to the telemetry endpoint.
    #[error("sending upload request failed with {0}")]
    UploadConnection(Box<dyn StdError + Send + Sync + 'static>),

    /// The telemetry endpoint rejected the batch.
    #[error("upload failed with {0}")]
    Upload(String),

    /// The scheduler was installed outside of a Tokio runtime.
    #[error("no Tokio runtime to run the scheduler on: {0}")]
    Runtime(tokio::runtime::TryCurrentError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
