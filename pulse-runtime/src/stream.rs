//! Append-only review stream
//!
//! Producers append field maps; consumers read everything after a cursor,
//! blocking for a bounded time when nothing new is there.
//!
//! The in-memory log keeps at most `max_len` entries
//! ([`DEFAULT_STREAM_MAX_LEN`] unless configured). Appending past the cap
//! drops the oldest entries, so a consumer lagging further behind than
//! that silently skips what was trimmed.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use pulse_core::StreamId;

/// Field map carried by one stream entry
pub type StreamFields = BTreeMap<String, String>;

/// One entry of the stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamItem {
    pub id: StreamId,
    pub fields: StreamFields,
}

impl StreamItem {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Stream errors
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Rejected entry: {0}")]
    Rejected(String),

    #[error("Stream backend error: {0}")]
    Backend(String),
}

/// Append-only log addressed by [`StreamId`]
#[async_trait]
pub trait StreamLog: Send + Sync {
    /// Append an entry and return its id
    async fn append(&self, fields: StreamFields) -> Result<StreamId, StreamError>;

    /// Up to `count` entries with an id greater than `cursor`, in id order.
    /// Waits up to `block` for the first entry; an empty result means the
    /// wait expired.
    async fn read_after(
        &self,
        cursor: StreamId,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamItem>, StreamError>;
}

pub type SharedStream = Arc<dyn StreamLog>;

/// Entries retained by a [`MemoryStreamLog`] unless configured otherwise
pub const DEFAULT_STREAM_MAX_LEN: usize = 10_000;

#[derive(Debug, Default)]
struct Entries {
    items: VecDeque<StreamItem>,
    last_id: StreamId,
}

/// In-process stream with blocking reads
#[derive(Debug)]
pub struct MemoryStreamLog {
    entries: Mutex<Entries>,
    appended: Notify,
    max_len: usize,
}

impl Default for MemoryStreamLog {
    fn default() -> Self {
        Self::with_max_len(DEFAULT_STREAM_MAX_LEN)
    }
}

impl MemoryStreamLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max_len` entries (at least one)
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            appended: Notify::new(),
            max_len: max_len.max(1),
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn len(&self) -> usize {
        self.entries.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn collect_after(&self, cursor: StreamId, count: usize) -> Vec<StreamItem> {
        let entries = self.entries.lock();
        let start = entries.items.partition_point(|item| item.id <= cursor);
        entries.items.range(start..).take(count).cloned().collect()
    }
}

#[async_trait]
impl StreamLog for MemoryStreamLog {
    async fn append(&self, fields: StreamFields) -> Result<StreamId, StreamError> {
        if fields.is_empty() {
            return Err(StreamError::Rejected("entry has no fields".to_string()));
        }

        let now_millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let id = {
            let mut entries = self.entries.lock();
            let id = entries.last_id.next_after(now_millis);
            entries.last_id = id;
            entries.items.push_back(StreamItem { id, fields });
            while entries.items.len() > self.max_len {
                entries.items.pop_front();
            }
            id
        };

        self.appended.notify_waiters();
        debug!("Appended stream entry {}", id);
        Ok(id)
    }

    async fn read_after(
        &self,
        cursor: StreamId,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamItem>, StreamError> {
        let deadline = Instant::now() + block;

        loop {
            // register interest before looking so an append in between still wakes us
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.collect_after(cursor, count.max(1));
            if !batch.is_empty() || block.is_zero() {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }
}

/// Appends reviews onto a stream under a fixed text field
#[derive(Clone)]
pub struct ReviewProducer {
    log: SharedStream,
    text_field: String,
}

impl ReviewProducer {
    pub fn new(log: SharedStream, text_field: &str) -> Self {
        Self {
            log,
            text_field: text_field.to_string(),
        }
    }

    pub async fn append(&self, text: &str) -> Result<StreamId, StreamError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(StreamError::Rejected(format!("{} is empty", self.text_field)));
        }
        let mut fields = StreamFields::new();
        fields.insert(self.text_field.clone(), text.to_string());
        self.log.append(fields).await
    }
}
