use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a telemetry entry.
///
/// Serialized as its name (`"Warning"`, `"Error"`, ...) both on the wire and in the persisted
/// queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SeverityLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    Info,
    /// Something unexpected that the client recovered from.
    Warning,
    /// A failed operation.
    Error,
    /// A failure that leaves the client unusable.
    Critical,
}

impl SeverityLevel {
    /// Name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityLevel::Debug => "Debug",
            SeverityLevel::Info => "Info",
            SeverityLevel::Warning => "Warning",
            SeverityLevel::Error => "Error",
            SeverityLevel::Critical => "Critical",
        }
    }

    /// Error-class entries carry exception message and stack trace.
    pub fn is_error_class(&self) -> bool {
        matches!(self, SeverityLevel::Error | SeverityLevel::Critical)
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
