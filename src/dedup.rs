//! Admission-time suppression of repeated identical entries.

use crate::{clock::elapsed, models::TelemetryEntry, Clock};
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc, time::Duration};

const STACK_PREFIX_CHARS: usize = 100;

/// Message, exception message, status code, request URL and stack prefix.
type Signature = (String, Option<String>, Option<u16>, Option<String>, String);

/// Remembers when each entry signature was last admitted.
///
/// Records are not persisted; they only guard against short floods and start empty with every
/// process.
#[derive(Debug)]
pub struct DedupWindow {
    window: Duration,
    last_seen: HashMap<Signature, DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl DedupWindow {
    /// Create a window of the given length.
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        DedupWindow {
            window,
            last_seen: HashMap::new(),
            clock,
        }
    }

    /// Decide whether `entry` may be queued.
    ///
    /// Returns `false` if the same signature was admitted less than one window ago; the record is
    /// left untouched in that case. Records older than two windows are purged on every call.
    pub fn should_admit(&mut self, entry: &TelemetryEntry) -> bool {
        let now = self.clock.now();
        let signature = signature(entry);

        let admit = match self.last_seen.get(&signature) {
            Some(last_seen) => elapsed(now, *last_seen) >= self.window,
            None => true,
        };
        if admit {
            self.last_seen.insert(signature, now);
        }

        let retention = self.window.saturating_mul(2);
        self.last_seen
            .retain(|_, last_seen| elapsed(now, *last_seen) < retention);

        admit
    }

    /// Drop the record for `entry`'s signature, e.g. because the entry it admitted was never
    /// queued.
    pub fn forget(&mut self, entry: &TelemetryEntry) {
        self.last_seen.remove(&signature(entry));
    }

    /// Number of remembered signatures.
    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    /// Whether no signature is remembered.
    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

fn signature(entry: &TelemetryEntry) -> Signature {
    let stack_prefix: String = entry
        .stack_trace
        .as_deref()
        .unwrap_or_default()
        .chars()
        .take(STACK_PREFIX_CHARS)
        .collect();
    (
        entry.message.clone(),
        entry.exception_message.clone(),
        entry.status_code,
        entry.request_url.clone(),
        stack_prefix,
    )
}
