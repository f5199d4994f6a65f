//! Ordered list of pending entries, mirrored to a [`Store`] after every mutation.

use crate::{models::TelemetryEntry, Error, FallbackLogger, Store};
use std::{collections::VecDeque, sync::Arc};

/// FIFO queue of entries waiting to be sent.
///
/// The in-memory list is authoritative. Persistence is write-behind and best-effort: a failed
/// save is reported to the fallback logger and never undoes or blocks the mutation.
#[derive(Debug)]
pub struct TelemetryQueue {
    entries: VecDeque<TelemetryEntry>,
    max_size: Option<usize>,
    store: Arc<dyn Store>,
    storage_key: String,
    fallback: Arc<dyn FallbackLogger>,
}

impl TelemetryQueue {
    /// Restore the queue persisted under `storage_key`, or start empty.
    ///
    /// A queue persisted with more entries than `max_size` keeps its oldest entries.
    pub fn load(
        store: Arc<dyn Store>,
        storage_key: impl Into<String>,
        max_size: Option<usize>,
        fallback: Arc<dyn FallbackLogger>,
    ) -> Self {
        let storage_key = storage_key.into();
        let mut entries = match read_persisted(store.as_ref(), &storage_key) {
            Ok((entries, 0)) => entries,
            Ok((entries, skipped)) => {
                fallback.warn(&format!(
                    "Skipped {} unreadable entries while restoring telemetry queue",
                    skipped
                ));
                entries
            }
            Err(err) => {
                fallback.warn(&format!(
                    "Could not restore telemetry queue, starting empty: {}",
                    err
                ));
                VecDeque::new()
            }
        };
        if let Some(max_size) = max_size {
            if entries.len() > max_size {
                let dropped = entries.len() - max_size;
                entries.truncate(max_size);
                fallback.warn(&format!(
                    "Restored telemetry queue exceeds capacity {}; dropped {} entries",
                    max_size, dropped
                ));
            }
        }
        TelemetryQueue {
            entries,
            max_size,
            store,
            storage_key,
            fallback,
        }
    }

    /// Add an entry to the tail and persist.
    ///
    /// When the queue is full the entry is dropped and a warning goes to the fallback logger.
    /// Returns whether the entry was queued.
    pub fn append(&mut self, entry: TelemetryEntry) -> bool {
        if self.is_full() {
            self.fallback.warn(&format!(
                "Telemetry queue full ({} entries); dropping entry: {}",
                self.entries.len(),
                entry.message
            ));
            return false;
        }
        self.entries.push_back(entry);
        self.persist();
        true
    }

    /// Copy of up to `n` entries from the head, in order. The queue is not modified.
    pub fn take_front(&self, n: usize) -> Vec<TelemetryEntry> {
        self.entries.iter().take(n).cloned().collect()
    }

    /// Remove exactly `count` entries (or all, if fewer are queued) from the head and persist.
    ///
    /// Only call this once the transport accepted those entries.
    pub fn remove_front(&mut self, count: usize) {
        let count = count.min(self.entries.len());
        self.entries.drain(..count);
        self.persist();
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the next [`append`](Self::append) would be refused.
    pub fn is_full(&self) -> bool {
        self.max_size
            .map_or(false, |max_size| self.entries.len() >= max_size)
    }

    /// Iterate over queued entries, head first.
    pub fn iter(&self) -> impl Iterator<Item = &TelemetryEntry> {
        self.entries.iter()
    }

    fn persist(&self) {
        if let Err(err) = self.try_persist() {
            self.fallback
                .warn(&format!("Could not persist telemetry queue: {}", err));
        }
    }

    fn try_persist(&self) -> Result<(), Error> {
        let serialized = serde_json::to_string(&self.entries).map_err(Error::SerializeQueue)?;
        self.store.save(&self.storage_key, &serialized)
    }
}

/// Read the persisted queue element by element. Elements that don't parse as an entry are
/// skipped and counted; only a payload that isn't a JSON array fails as a whole.
fn read_persisted(
    store: &dyn Store,
    key: &str,
) -> Result<(VecDeque<TelemetryEntry>, usize), Error> {
    let serialized = match store.load(key)? {
        Some(serialized) => serialized,
        None => return Ok((VecDeque::new(), 0)),
    };
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(&serialized).map_err(Error::DeserializeQueue)?;
    let total = raw.len();
    let entries: VecDeque<TelemetryEntry> = raw
        .into_iter()
        .filter_map(|value| serde_json::from_value(value).ok())
        .collect();
    let skipped = total - entries.len();
    Ok((entries, skipped))
}
