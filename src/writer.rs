//! Segment writer: appends records to a local segment file and archives each
//! completed segment to object storage.
//!
//! A segment is opened lazily by the first write after the previous one
//! closed. It closes when a write would exceed the size threshold, when a
//! record's timestamp regresses past [`TIME_TOLERANCE_NS`], when the shared
//! [`CycleScheduler`] finds a time predicate due, or on stop/shutdown.
//!
//! Closing uploads the segment under its time-range key, registers the key
//! with the reduction registry and, unless a batch is already pending,
//! schedules a trim of every stream offset seen so far once the cleanup delay
//! has passed. Trims never reach the offsets of a segment whose upload failed.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{WriterConfig, TIME_TOLERANCE_NS};
use crate::key::SegmentKey;
use crate::record::{Record, StreamPosition};
use crate::reduction::ReductionFileRegistry;
use crate::scheduler::CycleScheduler;
use crate::segment::{encoded_len, write_record};
use crate::storage::ObjectStore;
use crate::stream::StreamTrimmer;
use crate::timestamp::{calendar_fields, format_timestamp};
use crate::{Error, Result};

static NEXT_WRITER_ID: AtomicU64 = AtomicU64::new(1);

/// Stream offsets waiting for their trim deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCleanup {
    pub deadline_ns: u64,
    pub offsets: BTreeMap<String, u64>,
}

/// Everything a writer needs besides its own configuration.
#[derive(Clone)]
pub struct WriterContext {
    pub scheduler: CycleScheduler,
    pub store: Arc<dyn ObjectStore>,
    pub trimmer: Arc<dyn StreamTrimmer>,
    pub registry: Option<Arc<ReductionFileRegistry>>,
    pub clock: Arc<dyn Clock>,
}

impl WriterContext {
    pub fn writer(&self, config: WriterConfig) -> Result<SegmentWriter> {
        SegmentWriter::new(
            config,
            &self.scheduler,
            Arc::clone(&self.store),
            Arc::clone(&self.trimmer),
            self.registry.clone(),
            Arc::clone(&self.clock),
        )
    }
}

pub struct SegmentWriter {
    core: Arc<WriterCore>,
    scheduler: CycleScheduler,
    shut_down: AtomicBool,
}

impl SegmentWriter {
    /// Validates `config` and registers the writer with `scheduler`, starting
    /// its loop if this is the first live writer.
    pub fn new(
        config: WriterConfig,
        scheduler: &CycleScheduler,
        store: Arc<dyn ObjectStore>,
        trimmer: Arc<dyn StreamTrimmer>,
        registry: Option<Arc<ReductionFileRegistry>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate(scheduler.tick_interval())?;
        let core = Arc::new(WriterCore {
            id: NEXT_WRITER_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(WriterState {
                logging_enabled: config.logging_enabled,
                ..WriterState::default()
            }),
            config,
            store,
            trimmer,
            registry,
            clock,
        });
        scheduler.register(Arc::clone(&core))?;
        Ok(Self {
            core,
            scheduler: scheduler.clone(),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Appends `record` to the active segment, cycling first when needed.
    ///
    /// Does nothing while logging is disabled. `position` is remembered as the
    /// newest offset of its topic and trimmed once a later close archives it.
    pub fn write(&self, record: &Record, position: Option<&StreamPosition>) -> Result<()> {
        self.core.write(record, position)
    }

    /// Closes any open segment and re-enables logging.
    pub fn start(&self) -> Result<()> {
        let mut state = self.core.lock()?;
        self.core.close_segment(&mut state);
        state.logging_enabled = true;
        Ok(())
    }

    /// Disables logging and closes the open segment.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.core.lock()?;
        state.logging_enabled = false;
        self.core.close_segment(&mut state);
        Ok(())
    }

    /// Stops the writer and removes it from the scheduler. Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let stopped = self.stop();
        self.scheduler.deregister(self.core.id)?;
        stopped
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn config(&self) -> &WriterConfig {
        &self.core.config
    }

    pub fn logging_enabled(&self) -> bool {
        self.core
            .lock()
            .map(|state| state.logging_enabled)
            .unwrap_or(false)
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        let state = self.core.lock().ok()?;
        state.active.as_ref().map(|segment| segment.path.clone())
    }

    pub fn current_size(&self) -> u64 {
        self.core
            .lock()
            .ok()
            .and_then(|state| state.active.as_ref().map(|segment| segment.size))
            .unwrap_or(0)
    }

    /// Segments successfully archived by this writer.
    pub fn segments_closed(&self) -> u64 {
        self.core
            .lock()
            .map(|state| state.segments_closed)
            .unwrap_or(0)
    }

    pub fn pending_cleanup(&self) -> Option<PendingCleanup> {
        self.core.lock().ok()?.cleanup.clone()
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            error!("shutdown of {} failed: {err}", self.core.name());
        }
    }
}

/// Writer state shared with the scheduler.
pub(crate) struct WriterCore {
    id: u64,
    config: WriterConfig,
    store: Arc<dyn ObjectStore>,
    trimmer: Arc<dyn StreamTrimmer>,
    registry: Option<Arc<ReductionFileRegistry>>,
    clock: Arc<dyn Clock>,
    state: Mutex<WriterState>,
}

#[derive(Default)]
struct WriterState {
    logging_enabled: bool,
    active: Option<ActiveSegment>,
    last_offsets: BTreeMap<String, u64>,
    /// First offset per topic of any segment whose upload failed. Trims
    /// stay below it.
    unarchived: BTreeMap<String, u64>,
    cleanup: Option<PendingCleanup>,
    segments_closed: u64,
}

impl WriterState {
    fn trimmable_offsets(&self) -> BTreeMap<String, u64> {
        self.last_offsets
            .iter()
            .filter_map(|(topic, &offset)| {
                let limit = match self.unarchived.get(topic) {
                    Some(&first) => offset.min(first.checked_sub(1)?),
                    None => offset,
                };
                Some((topic.clone(), limit))
            })
            .collect()
    }
}

struct ActiveSegment {
    path: PathBuf,
    file: BufWriter<File>,
    /// Bytes of complete frames.
    size: u64,
    opened_at_ns: u64,
    min_ts: Option<u64>,
    max_ts: Option<u64>,
    /// Timestamp of the most recent record, for the regression check.
    prev_ts: Option<u64>,
    first_offsets: BTreeMap<String, u64>,
}

impl ActiveSegment {
    fn observe(&mut self, timestamp_ns: u64, position: Option<&StreamPosition>) {
        self.min_ts = Some(self.min_ts.map_or(timestamp_ns, |ts| ts.min(timestamp_ns)));
        self.max_ts = Some(self.max_ts.map_or(timestamp_ns, |ts| ts.max(timestamp_ns)));
        self.prev_ts = Some(timestamp_ns);
        if let Some(position) = position {
            self.first_offsets
                .entry(position.topic.clone())
                .or_insert(position.offset);
        }
    }

    /// Cuts the file back to its complete frames, dropping any partially
    /// written one.
    fn truncate_to_size(self) -> Result<Self> {
        let (mut file, buffered) = self.file.into_parts();
        let buffered = buffered.unwrap_or_else(|panicked| panicked.into_inner());
        file.write_all(&buffered)?;
        file.set_len(self.size)?;
        file.seek(SeekFrom::Start(self.size))?;
        Ok(Self {
            file: BufWriter::new(file),
            ..self
        })
    }
}

impl WriterCore {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    fn lock(&self) -> Result<MutexGuard<'_, WriterState>> {
        self.state
            .lock()
            .map_err(|_| Error::LockPoisoned("segment writer"))
    }

    fn write(&self, record: &Record, position: Option<&StreamPosition>) -> Result<()> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        if !state.logging_enabled {
            return Ok(());
        }

        let len = encoded_len(record);
        let cycle = match &state.active {
            None => true,
            Some(segment) => {
                self.config
                    .cycle_size
                    .is_some_and(|max| segment.size + len > max)
                    || segment
                        .prev_ts
                        .is_some_and(|prev| prev > record.timestamp_ns.saturating_add(TIME_TOLERANCE_NS))
            }
        };
        if cycle {
            self.close_segment(state);
            match self.open_segment() {
                Ok(segment) => state.active = Some(segment),
                Err(err) => {
                    error!("{}: failed to start new segment: {err}", self.config.name);
                    state.logging_enabled = false;
                    return Err(err);
                }
            }
        }

        let appended = {
            let segment = state
                .active
                .as_mut()
                .ok_or(Error::Corrupt("no active segment"))?;
            write_record(&mut segment.file, record).map(|len| {
                segment.size += len;
                segment.observe(record.timestamp_ns, position);
            })
        };
        if let Err(err) = appended {
            error!("{}: write failed, closing segment: {err}", self.config.name);
            self.close_torn_segment(state);
            return Err(err);
        }

        if let Some(position) = position {
            state
                .last_offsets
                .insert(position.topic.clone(), position.offset);
        }
        Ok(())
    }

    /// One scheduler pass: cycle on time predicates, then run due trims.
    pub(crate) fn on_tick(&self) -> Result<()> {
        let mut state = self.lock()?;
        let now = self.clock.now();
        let due = match &state.active {
            Some(segment) if state.logging_enabled => self.cycle_due(segment, now)?,
            _ => false,
        };
        if due {
            debug!("{}: time-based cycle", self.config.name);
            self.close_segment(&mut state);
        }
        self.run_due_cleanup(&mut state, now);
        Ok(())
    }

    fn cycle_due(&self, segment: &ActiveSegment, now: u64) -> Result<bool> {
        if let Some(cycle_time) = self.config.cycle_time() {
            if now.saturating_sub(segment.opened_at_ns) > cycle_time.as_nanos() as u64 {
                return Ok(true);
            }
        }
        let Some(minute) = self.config.cycle_minute else {
            return Ok(false);
        };
        let current = calendar_fields(now)?;
        let opened = calendar_fields(segment.opened_at_ns)?;
        Ok(match self.config.cycle_hour {
            Some(hour) => {
                current.hour == hour && current.minute == minute && opened.ordinal != current.ordinal
            }
            None => current.minute == minute && opened.hour != current.hour,
        })
    }

    fn run_due_cleanup(&self, state: &mut WriterState, now: u64) {
        let Some(batch) = state.cleanup.as_mut() else {
            return;
        };
        if batch.deadline_ns > now {
            return;
        }
        batch
            .offsets
            .retain(|topic, offset| match self.trimmer.trim(topic, *offset) {
                Ok(()) => {
                    info!("{}: trimmed {topic} through {offset}", self.config.name);
                    false
                }
                Err(err) => {
                    warn!("{}: trim of {topic} failed, will retry: {err}", self.config.name);
                    true
                }
            });
        if batch.offsets.is_empty() {
            state.cleanup = None;
        }
    }

    fn open_segment(&self) -> Result<ActiveSegment> {
        let now = self.clock.now();
        let (path, file) = self.create_unique_file(now)?;
        debug!("{}: segment opened {}", self.config.name, path.display());
        Ok(ActiveSegment {
            path,
            file: BufWriter::new(file),
            size: 0,
            opened_at_ns: now,
            min_ts: None,
            max_ts: None,
            prev_ts: None,
            first_offsets: BTreeMap::new(),
        })
    }

    /// Creates `{timestamp}__{name}[_{n}].{ext}` in the local directory,
    /// bumping `n` until the name is free.
    fn create_unique_file(&self, now: u64) -> Result<(PathBuf, File)> {
        let dir = self.config.local_dir();
        let stamp = format_timestamp(now)?;
        let ext = self.config.extension();
        std::fs::create_dir_all(&dir).map_err(|err| open_failed(&dir, err))?;

        let mut attempt: u32 = 0;
        loop {
            let name = if attempt == 0 {
                format!("{stamp}__{}.{ext}", self.config.name)
            } else {
                format!("{stamp}__{}_{attempt}.{ext}", self.config.name)
            };
            let path = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => return Err(open_failed(&path, err)),
            }
        }
    }

    /// Archives the active segment, if any. Failures are logged and the
    /// segment is dropped from the writer; its offsets are never trimmed.
    fn close_segment(&self, state: &mut WriterState) {
        let Some(segment) = state.active.take() else {
            return;
        };
        let path = segment.path.clone();
        let first_offsets = segment.first_offsets.clone();
        match self.archive(segment) {
            Ok(Some(key)) => {
                state.segments_closed += 1;
                if let Some(registry) = &self.registry {
                    if let Err(err) = registry.add_file(&key) {
                        error!("{}: failed to register {key}: {err}", self.config.name);
                    }
                }
                let offsets = state.trimmable_offsets();
                if state.cleanup.is_none() && !offsets.is_empty() {
                    let delay = self.config.cleanup_delay().as_nanos() as u64;
                    state.cleanup = Some(PendingCleanup {
                        deadline_ns: self.clock.now().saturating_add(delay),
                        offsets,
                    });
                }
            }
            Ok(None) => {}
            Err(err) => {
                error!(
                    "{}: error closing {}: {err}",
                    self.config.name,
                    path.display()
                );
                for (topic, first) in first_offsets {
                    let held = state.unarchived.entry(topic).or_insert(first);
                    *held = (*held).min(first);
                }
            }
        }
    }

    /// Closes the active segment after a failed append, keeping only the
    /// frames written before it.
    fn close_torn_segment(&self, state: &mut WriterState) {
        let Some(segment) = state.active.take() else {
            return;
        };
        let path = segment.path.clone();
        match segment.truncate_to_size() {
            Ok(segment) => {
                state.active = Some(segment);
                self.close_segment(state);
            }
            Err(err) => error!(
                "{}: dropping {} after failed write: {err}",
                self.config.name,
                path.display()
            ),
        }
    }

    fn archive(&self, segment: ActiveSegment) -> Result<Option<String>> {
        let ActiveSegment {
            path,
            file,
            min_ts,
            max_ts,
            ..
        } = segment;
        let file = file.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        drop(file);
        debug!("{}: segment closed {}", self.config.name, path.display());

        let (Some(start_ns), Some(end_ns)) = (min_ts, max_ts) else {
            std::fs::remove_file(&path)?;
            return Ok(None);
        };
        let key = SegmentKey::new(start_ns, end_ns, self.config.tier)
            .with_labels(self.config.labels.iter().cloned())
            .with_extension(self.config.extension())
            .bucket_key(&self.config.remote_dir)?;

        let data = std::fs::read(&path)?;
        self.store.put(&self.config.bucket, &key, &data)?;
        info!(
            "{}: archived {} bytes to {}/{key}",
            self.config.name,
            data.len(),
            self.config.bucket
        );
        if let Err(err) = std::fs::remove_file(&path) {
            warn!("{}: failed to remove {}: {err}", self.config.name, path.display());
        }
        Ok(Some(key))
    }
}

fn open_failed(path: &Path, source: std::io::Error) -> Error {
    Error::SegmentOpen {
        path: path.to_path_buf(),
        source,
    }
}
