//! Read/write stream log writers for one interface.

use crate::config::WriterConfig;
use crate::writer::{SegmentWriter, WriterContext};
use crate::Result;

pub const PAIR_CYCLE_TIME_SECS: u64 = 600;
pub const PAIR_CYCLE_SIZE: u64 = 50_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Read,
    Write,
}

impl StreamDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamDirection::Read => "read",
            StreamDirection::Write => "write",
        }
    }
}

/// Two writers capturing the raw bytes an interface reads and writes.
pub struct StreamLogPair {
    name: String,
    remote_dir: String,
    context: WriterContext,
    cycle_time_secs: u64,
    cycle_size: u64,
    read: SegmentWriter,
    write: SegmentWriter,
}

impl StreamLogPair {
    /// Creates both writers. `thresholds` overrides the default
    /// `(cycle_time_secs, cycle_size)`.
    pub fn new(
        name: &str,
        remote_dir: &str,
        context: &WriterContext,
        thresholds: Option<(u64, u64)>,
    ) -> Result<Self> {
        let (cycle_time_secs, cycle_size) =
            thresholds.unwrap_or((PAIR_CYCLE_TIME_SECS, PAIR_CYCLE_SIZE));
        Self::build(
            name,
            remote_dir,
            context.clone(),
            cycle_time_secs,
            cycle_size,
            true,
        )
    }

    fn build(
        name: &str,
        remote_dir: &str,
        context: WriterContext,
        cycle_time_secs: u64,
        cycle_size: u64,
        logging_enabled: bool,
    ) -> Result<Self> {
        let config = |direction: StreamDirection| {
            let label = format!("{name}_stream_{}", direction.as_str());
            WriterConfig {
                name: label.clone(),
                remote_dir: remote_dir.to_string(),
                labels: vec![label],
                logging_enabled,
                cycle_time_secs: Some(cycle_time_secs),
                cycle_size: Some(cycle_size),
                ..WriterConfig::default()
            }
        };
        let read = context.writer(config(StreamDirection::Read))?;
        let write = context.writer(config(StreamDirection::Write))?;
        Ok(Self {
            name: name.to_string(),
            remote_dir: remote_dir.to_string(),
            context,
            cycle_time_secs,
            cycle_size,
            read,
            write,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read_log(&self) -> &SegmentWriter {
        &self.read
    }

    pub fn write_log(&self) -> &SegmentWriter {
        &self.write
    }

    pub fn log(&self, direction: StreamDirection) -> &SegmentWriter {
        match direction {
            StreamDirection::Read => &self.read,
            StreamDirection::Write => &self.write,
        }
    }

    pub fn start(&self) -> Result<()> {
        self.read.start()?;
        self.write.start()
    }

    pub fn stop(&self) -> Result<()> {
        self.read.stop()?;
        self.write.stop()
    }

    pub fn shutdown(&self) -> Result<()> {
        let read = self.read.shutdown();
        let write = self.write.shutdown();
        read.and(write)
    }

    /// Builds a fresh pair with the same configuration and logging state.
    pub fn try_clone(&self) -> Result<Self> {
        Self::build(
            &self.name,
            &self.remote_dir,
            self.context.clone(),
            self.cycle_time_secs,
            self.cycle_size,
            self.read.logging_enabled(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::scheduler::CycleScheduler;
    use crate::storage::MemoryObjectStore;
    use crate::stream::MemoryStream;
    use std::sync::Arc;

    fn context() -> WriterContext {
        WriterContext {
            scheduler: CycleScheduler::default(),
            store: Arc::new(MemoryObjectStore::new()),
            trimmer: Arc::new(MemoryStream::new()),
            registry: None,
            clock: Arc::new(SystemClock),
        }
    }

    #[test]
    fn defaults_and_overrides() {
        let context = context();
        let pair = StreamLogPair::new("MYINT", "DEFAULT/stream_logs", &context, None).unwrap();
        for log in [pair.read_log(), pair.write_log()] {
            assert!(log.logging_enabled());
            assert_eq!(log.config().cycle_time_secs, Some(600));
            assert_eq!(log.config().cycle_size, Some(50_000_000));
        }
        assert_eq!(pair.read_log().name(), "MYINT_stream_read");
        assert_eq!(pair.write_log().name(), "MYINT_stream_write");
        pair.shutdown().unwrap();

        let pair = StreamLogPair::new("MYINT2", "DEFAULT/stream_logs", &context, Some((300, 100_000)))
            .unwrap();
        assert_eq!(pair.log(StreamDirection::Read).config().cycle_time_secs, Some(300));
        assert_eq!(pair.log(StreamDirection::Write).config().cycle_size, Some(100_000));
        pair.shutdown().unwrap();
        assert_eq!(context.scheduler.live_writers(), 0);
    }

    #[test]
    fn stop_and_start() {
        let pair = StreamLogPair::new("MYINT", "logs", &context(), None).unwrap();
        pair.stop().unwrap();
        assert!(!pair.read_log().logging_enabled());
        assert!(!pair.write_log().logging_enabled());
        pair.start().unwrap();
        assert!(pair.read_log().logging_enabled());
        assert!(pair.write_log().logging_enabled());
    }

    #[test]
    fn clone_carries_logging_state() {
        let pair = StreamLogPair::new("MYINT", "logs", &context(), None).unwrap();
        let first = pair.try_clone().unwrap();
        pair.stop().unwrap();
        pair.shutdown().unwrap();
        assert!(!pair.write_log().logging_enabled());
        assert!(first.write_log().logging_enabled());

        let second = pair.try_clone().unwrap();
        assert!(first.read_log().logging_enabled());
        assert!(!second.read_log().logging_enabled());
        assert!(!second.write_log().logging_enabled());
    }
}
