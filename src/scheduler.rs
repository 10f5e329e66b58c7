//! Shared background loop that cycles segments and trims archived offsets.
//!
//! One loop thread serves every registered writer. It is spawned by the first
//! registration and cancelled by the deregistration that empties the registry.
//!
//! Lock order is registry -> writer. The loop-control lock is only taken while
//! the registry lock is held and the loop thread is joined with no lock held.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::config::SchedulerConfig;
use crate::writer::WriterCore;
use crate::{Error, Result};

/// Handle to the shared scheduler; clones refer to the same loop.
#[derive(Clone)]
pub struct CycleScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    writers: Mutex<Vec<Arc<WriterCore>>>,
    control: Mutex<Option<RunningLoop>>,
}

struct RunningLoop {
    handle: JoinHandle<()>,
    token: Arc<CancelToken>,
}

/// Interruptible sleep shared between the loop and whoever stops it.
#[derive(Default)]
struct CancelToken {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl CancelToken {
    fn cancel(&self) {
        if let Ok(mut cancelled) = self.cancelled.lock() {
            *cancelled = true;
        }
        self.wake.notify_all();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.lock().map(|c| *c).unwrap_or(true)
    }

    /// Sleeps for up to `timeout`; returns `true` once cancelled.
    fn sleep(&self, timeout: Duration) -> bool {
        let Ok(guard) = self.cancelled.lock() else {
            return true;
        };
        match self
            .wake
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
        {
            Ok((cancelled, _)) => *cancelled,
            Err(_) => true,
        }
    }
}

impl Default for CycleScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl CycleScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                writers: Mutex::new(Vec::new()),
                control: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn tick_interval(&self) -> Duration {
        self.inner.config.tick_interval()
    }

    /// Runs one evaluation pass over every live writer on the calling thread.
    pub fn tick_now(&self) -> Result<()> {
        self.inner.tick()
    }

    pub fn live_writers(&self) -> usize {
        self.inner.writers().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .control
            .lock()
            .map(|control| control.is_some())
            .unwrap_or(false)
    }

    pub(crate) fn register(&self, writer: Arc<WriterCore>) -> Result<()> {
        let mut writers = self.inner.writers()?;
        writers.push(writer);
        let mut control = self.inner.control()?;
        if control.is_none() {
            match self.spawn_loop() {
                Ok(running) => *control = Some(running),
                Err(err) => {
                    writers.pop();
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn deregister(&self, writer_id: u64) -> Result<()> {
        let running = {
            let mut writers = self.inner.writers()?;
            writers.retain(|writer| writer.id() != writer_id);
            if !writers.is_empty() {
                return Ok(());
            }
            self.inner.control()?.take()
        };

        if let Some(running) = running {
            running.token.cancel();
            if running.handle.thread().id() == thread::current().id() {
                return Ok(());
            }
            if running.handle.join().is_err() {
                error!("cycle scheduler thread panicked");
            }
        }
        Ok(())
    }

    fn spawn_loop(&self) -> Result<RunningLoop> {
        let token = Arc::new(CancelToken::default());
        let thread_token = Arc::clone(&token);
        let inner = Arc::downgrade(&self.inner);
        let interval = self.inner.config.tick_interval();
        let handle = thread::Builder::new()
            .name("segment-cycle".to_string())
            .spawn(move || run_loop(inner, thread_token, interval))?;
        Ok(RunningLoop { handle, token })
    }
}

fn run_loop(inner: Weak<SchedulerInner>, token: Arc<CancelToken>, interval: Duration) {
    debug!("cycle scheduler started");
    loop {
        if token.is_cancelled() {
            break;
        }
        let started = Instant::now();
        {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if let Err(err) = inner.tick() {
                error!("cycle scheduler tick failed: {err}");
            }
        }
        if token.sleep(interval.saturating_sub(started.elapsed())) {
            break;
        }
    }
    debug!("cycle scheduler stopped");
}

impl SchedulerInner {
    fn writers(&self) -> Result<MutexGuard<'_, Vec<Arc<WriterCore>>>> {
        self.writers
            .lock()
            .map_err(|_| Error::LockPoisoned("writer registry"))
    }

    fn control(&self) -> Result<MutexGuard<'_, Option<RunningLoop>>> {
        self.control
            .lock()
            .map_err(|_| Error::LockPoisoned("scheduler control"))
    }

    fn tick(&self) -> Result<()> {
        let writers = self.writers()?;
        for writer in writers.iter() {
            if let Err(err) = writer.on_tick() {
                error!("cycle of {} failed: {err}", writer.name());
            }
        }
        Ok(())
    }
}
