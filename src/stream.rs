//! Upstream message-stream seam.
//!
//! The archiver never reads from the stream; it only trims entries that have
//! been archived. Offsets are per-topic, monotonically increasing integers.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use crate::{Error, Result};

pub trait StreamTrimmer: Send + Sync {
    /// Deletes entries of `topic` at or before `offset`.
    fn trim(&self, topic: &str, offset: u64) -> Result<()>;
}

/// In-memory message stream.
#[derive(Debug, Default)]
pub struct MemoryStream {
    inner: Mutex<MemoryStreamInner>,
}

#[derive(Debug, Default)]
struct MemoryStreamInner {
    topics: BTreeMap<String, VecDeque<(u64, Vec<u8>)>>,
    next_offset: BTreeMap<String, u64>,
    trims: Vec<(String, u64)>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and returns its offset.
    pub fn append(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<u64> {
        let mut inner = self.lock()?;
        let next = inner.next_offset.entry(topic.to_string()).or_insert(1);
        let offset = *next;
        *next += 1;
        inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .push_back((offset, payload.into()));
        Ok(offset)
    }

    pub fn len(&self, topic: &str) -> usize {
        self.lock()
            .map(|inner| inner.topics.get(topic).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    pub fn first_offset(&self, topic: &str) -> Option<u64> {
        let inner = self.lock().ok()?;
        inner.topics.get(topic)?.front().map(|(offset, _)| *offset)
    }

    /// Every trim request received, in order.
    pub fn trims(&self) -> Vec<(String, u64)> {
        self.lock()
            .map(|inner| inner.trims.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryStreamInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::LockPoisoned("memory stream"))
    }
}

impl StreamTrimmer for MemoryStream {
    fn trim(&self, topic: &str, offset: u64) -> Result<()> {
        let mut inner = self.lock()?;
        inner.trims.push((topic.to_string(), offset));
        if let Some(entries) = inner.topics.get_mut(topic) {
            while entries.front().is_some_and(|(first, _)| *first <= offset) {
                entries.pop_front();
            }
        }
        Ok(())
    }
}
