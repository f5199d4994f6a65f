use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Marker used when no frame in a stack trace can be identified.
pub(crate) const UNKNOWN_SOURCE: &str = "Unknown";

const IGNORED_FRAME_PREFIXES: &[&str] = &["std::", "core::", "alloc::", "<std", "<core", "<alloc"];

static FRAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // V8: "    at OrderService.submit (https://app/main.js:10:5)"
        Regex::new(r"(?m)^\s*at\s+(?:async\s+)?([\w$.<>\[\]]+)\s+\(").expect("valid regex"),
        // SpiderMonkey / JavaScriptCore: "submit@https://app/main.js:10:5"
        Regex::new(r"(?m)^\s*([\w$.<>/]+)@\S").expect("valid regex"),
        // Rust backtrace: "   4: checkout::orders::submit"
        Regex::new(r"(?m)^\s*\d+:\s+(<?[A-Za-z_][\w<>]*(?:::[\w<>{}#]+)+)").expect("valid regex"),
        // Bare location: "main.js:10:5" or "src/orders.rs:42"
        Regex::new(r"([\w.-]+\.(?:rs|js|mjs|ts|tsx|jsx)):\d+").expect("valid regex"),
    ]
});

pub(crate) fn time_to_string(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Best-effort name of the first identifiable frame of a stack trace.
pub(crate) fn source_context_from_stack(stack: Option<&str>) -> String {
    stack
        .and_then(first_identifiable_frame)
        .unwrap_or_else(|| UNKNOWN_SOURCE.into())
}

fn first_identifiable_frame(stack: &str) -> Option<String> {
    FRAME_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures_iter(stack)
            .filter_map(|captures| captures.get(1))
            .map(|m| m.as_str())
            .find(|frame| {
                !IGNORED_FRAME_PREFIXES
                    .iter()
                    .any(|prefix| frame.starts_with(prefix))
            })
            .map(Into::into)
    })
}
