use crate::models::{Properties, TelemetryEntry};
use serde::Serialize;

/// A telemetry entry as sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEntry {
    /// Severity name.
    pub severity: &'static str,

    /// Message.
    pub message: String,

    /// Error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_message: Option<String>,

    /// Error stack.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,

    /// Origin hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_context: Option<String>,

    /// Failed request URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_url: Option<String>,

    /// Failed request method.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_method: Option<String>,

    /// Failed request status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    /// Agent string, always present.
    pub user_agent: String,

    /// RFC 3339 UTC instant with millisecond precision.
    pub timestamp_iso: String,

    /// Caller supplied metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<Properties>,
}

impl WireEntry {
    /// Convert a queued entry, using `default_user_agent` when the entry has none.
    pub fn from_entry(entry: &TelemetryEntry, default_user_agent: &str) -> Self {
        WireEntry {
            severity: entry.severity.as_str(),
            message: entry.message.clone(),
            exception_message: entry.exception_message.clone(),
            stack_trace: entry.stack_trace.clone(),
            source_context: entry.source_context.clone(),
            request_url: entry.request_url.clone(),
            request_method: entry.request_method.clone(),
            status_code: entry.status_code,
            user_agent: entry
                .user_agent
                .clone()
                .unwrap_or_else(|| default_user_agent.into()),
            timestamp_iso: entry.timestamp.to_iso(),
            additional_context: entry.additional_context.clone(),
        }
    }
}
