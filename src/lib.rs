//! Telemetry segment archiver.
//!
//! Records are appended to time-bounded segment files, uploaded to object
//! storage under sortable time-range keys, and trimmed from the upstream
//! stream once archived. Archived segments awaiting roll-up are tracked per
//! reduction tier.

pub mod clock;
pub mod config;
pub mod error;
pub mod key;
pub mod pair;
pub mod reader;
pub mod record;
pub mod reduction;
pub mod scheduler;
pub mod segment;
pub mod storage;
pub mod stream;
pub mod timestamp;
pub mod writer;

pub use clock::{Clock, ManualClock, QuantaClock, SystemClock};
pub use config::{SchedulerConfig, WriterConfig};
pub use error::{Error, Result};
pub use key::{SegmentKey, Tier};
pub use pair::{StreamDirection, StreamLogPair};
pub use reader::{ArchiveSource, BufferedSegmentReader, IterSource, RecordSource};
pub use record::{Record, RecordKind, StreamPosition};
pub use reduction::{FileSetStore, MemorySetStore, ReductionFileRegistry, SetStore};
pub use scheduler::CycleScheduler;
pub use segment::SegmentReader;
pub use storage::{LocalObjectStore, MemoryObjectStore, ObjectStore};
pub use stream::{MemoryStream, StreamTrimmer};
pub use writer::{PendingCleanup, SegmentWriter, WriterContext};
