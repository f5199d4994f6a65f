use crate::models::{Properties, SeverityLevel, Timestamp};
use serde::{Deserialize, Serialize};

pub(crate) const NO_MESSAGE: &str = "<no message>";

/// One captured client event.
///
/// This is also the persisted form of a queue item. Only `severity`, `message` and `timestamp`
/// are required; everything else is skipped when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEntry {
    /// Severity.
    pub severity: SeverityLevel,

    /// Human readable message. Never empty.
    pub message: String,

    /// When the event occurred.
    pub timestamp: Timestamp,

    /// Message of the error that caused this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_message: Option<String>,

    /// Stack trace of the error that caused this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,

    /// Best-effort hint about where the event originated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_context: Option<String>,

    /// URL of the failed request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_url: Option<String>,

    /// Method of the failed request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_method: Option<String>,

    /// Response status of the failed request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    /// Agent string of the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Caller supplied metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<Properties>,
}

impl TelemetryEntry {
    /// Create an entry stamped with the given time. An empty message is replaced with a
    /// placeholder.
    pub fn new(
        severity: SeverityLevel,
        message: impl Into<String>,
        timestamp: impl Into<Timestamp>,
    ) -> Self {
        let message = message.into();
        TelemetryEntry {
            severity,
            message: if message.trim().is_empty() {
                NO_MESSAGE.into()
            } else {
                message
            },
            timestamp: timestamp.into(),
            exception_message: None,
            stack_trace: None,
            source_context: None,
            request_url: None,
            request_method: None,
            status_code: None,
            user_agent: None,
            additional_context: None,
        }
    }

    /// Attach error details.
    pub fn with_exception(
        mut self,
        exception_message: impl Into<String>,
        stack_trace: Option<String>,
    ) -> Self {
        self.exception_message = Some(exception_message.into());
        self.stack_trace = stack_trace;
        self
    }

    /// Attach details of a failed request.
    pub fn with_request(
        mut self,
        url: impl Into<String>,
        method: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        self.request_url = Some(url.into());
        self.request_method = Some(method.into());
        self.status_code = status_code;
        self
    }

    /// Set the source context hint.
    pub fn with_source_context(mut self, source_context: impl Into<String>) -> Self {
        self.source_context = Some(source_context.into());
        self
    }

    /// Set the agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Add caller supplied metadata. Empty maps are dropped.
    pub fn with_context(mut self, context: Properties) -> Self {
        self.additional_context = Some(context).filter(|x| !x.is_empty());
        self
    }
}
