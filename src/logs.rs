//! Bounded, timestamped log ring shared by the orchestrator and its
//! subscribers (terminal view, status panel).
//!
//! Every process output line, state transition and retry decision lands here
//! as one entry. Capacity is fixed; the oldest entry is dropped once full, so
//! a chatty dev server can never grow the buffer without bound.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::watch;

/// A single immutable log entry.
#[derive(Clone, Debug)]
pub struct LogEntry {
    /// Capture time, not display time.
    pub timestamp: DateTime<Local>,
    pub text: String,
}

/// Append-only, capacity-bounded log store.
///
/// Readers take snapshots; nothing hands out references into the ring, so
/// subscribers can never mutate history.
pub struct LogAggregator {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    revision_tx: watch::Sender<u64>,
}

impl LogAggregator {
    pub fn new(capacity: usize) -> Self {
        let (revision_tx, _) = watch::channel(0);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            revision_tx,
        }
    }

    /// Append one entry, evicting the oldest if the ring is full.
    pub fn push(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(target: "livepreview::logs", "{text}");
        {
            let mut entries = self.entries.lock();
            if entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(LogEntry {
                timestamp: Local::now(),
                text,
            });
        }
        self.revision_tx.send_modify(|rev| *rev += 1);
    }

    /// Ordered copy of the current entries, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Change notification: the value increments on every append.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Render entries as `[HH:MM:SS] text` lines, for export or debugging.
    pub fn export(&self) -> String {
        self.entries
            .lock()
            .iter()
            .map(|e| format!("[{}] {}", e.timestamp.format("%H:%M:%S"), e.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
