//! Time-ordered reading over sources whose records arrive slightly out of
//! order.

use std::collections::VecDeque;
use std::io::{Cursor, Read};
use std::sync::Arc;

use log::debug;

use crate::record::Record;
use crate::segment::SegmentReader;
use crate::storage::ObjectStore;
use crate::Result;

pub const DEFAULT_BUFFER_DEPTH: usize = 10;

/// A sequential producer of records.
pub trait RecordSource {
    /// Returns the next record, or `None` once the source is exhausted.
    fn next_record(&mut self) -> Result<Option<Record>>;
}

impl<R: Read> RecordSource for SegmentReader<R> {
    fn next_record(&mut self) -> Result<Option<Record>> {
        SegmentReader::next_record(self)
    }
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn next_record(&mut self) -> Result<Option<Record>> {
        (**self).next_record()
    }
}

/// Adapts any iterator of records.
pub struct IterSource<I> {
    records: I,
}

impl<I: Iterator<Item = Record>> IterSource<I> {
    pub fn new(records: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            records: records.into_iter(),
        }
    }
}

impl<I: Iterator<Item = Record>> RecordSource for IterSource<I> {
    fn next_record(&mut self) -> Result<Option<Record>> {
        Ok(self.records.next())
    }
}

/// Chains the records of every archived segment under a key prefix.
///
/// Keys are fetched in lexical order, which for segment keys is the order of
/// their first timestamps.
pub struct ArchiveSource {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    keys: VecDeque<String>,
    current: Option<(String, SegmentReader<Cursor<Vec<u8>>>)>,
}

impl ArchiveSource {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: &str, prefix: &str) -> Result<Self> {
        let keys = store.list(bucket, prefix)?;
        Ok(Self::from_keys(store, bucket, keys))
    }

    pub fn from_keys(
        store: Arc<dyn ObjectStore>,
        bucket: &str,
        keys: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            keys: keys.into_iter().collect(),
            current: None,
        }
    }

    /// Key of the segment currently being read.
    pub fn current_key(&self) -> Option<&str> {
        self.current.as_ref().map(|(key, _)| key.as_str())
    }

    pub fn remaining_keys(&self) -> usize {
        self.keys.len()
    }
}

impl RecordSource for ArchiveSource {
    fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            if let Some((_, reader)) = self.current.as_mut() {
                if let Some(record) = reader.next_record()? {
                    return Ok(Some(record));
                }
                self.current = None;
            }
            let Some(key) = self.keys.pop_front() else {
                return Ok(None);
            };
            let data = self.store.get(&self.bucket, &key)?;
            debug!("reading {}/{key} ({} bytes)", self.bucket, data.len());
            self.current = Some((key, SegmentReader::from_bytes(data)));
        }
    }
}

/// Look-ahead window that re-sorts records by timestamp.
///
/// The window is topped up to `depth` records before every read, and each new
/// record is inserted after any records with an equal timestamp. Ordering is
/// therefore guaranteed only among records that were in the window together:
/// a record arriving more than `depth` positions late is returned late.
pub struct BufferedSegmentReader<S> {
    source: S,
    depth: usize,
    buffer: VecDeque<Record>,
    exhausted: bool,
}

impl<S: RecordSource> BufferedSegmentReader<S> {
    pub fn new(source: S) -> Self {
        Self::with_depth(source, DEFAULT_BUFFER_DEPTH)
    }

    /// A depth of zero behaves like one.
    pub fn with_depth(source: S, depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            source,
            depth,
            buffer: VecDeque::with_capacity(depth),
            exhausted: false,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Timestamp of the record the next [`read`](Self::read) returns.
    pub fn peek_time(&mut self) -> Result<Option<u64>> {
        self.fill()?;
        Ok(self.buffer.front().map(|record| record.timestamp_ns))
    }

    pub fn read(&mut self) -> Result<Option<Record>> {
        self.fill()?;
        Ok(self.buffer.pop_front())
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    fn fill(&mut self) -> Result<()> {
        while !self.exhausted && self.buffer.len() < self.depth {
            let Some(record) = self.source.next_record()? else {
                self.exhausted = true;
                break;
            };
            let at = self
                .buffer
                .partition_point(|buffered| buffered.timestamp_ns <= record.timestamp_ns);
            self.buffer.insert(at, record);
        }
        Ok(())
    }
}

impl<S: RecordSource> Iterator for BufferedSegmentReader<S> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}
