use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tempfile::tempdir;

use telemetry_archive::{
    CycleScheduler, ManualClock, MemoryObjectStore, MemoryStream, Record, SchedulerConfig,
    SegmentWriter, SystemClock, WriterConfig, WriterContext,
};

const JAN_1_2022: u64 = 1_640_995_200_000_000_000;

fn context(scheduler: &CycleScheduler) -> WriterContext {
    WriterContext {
        scheduler: scheduler.clone(),
        store: Arc::new(MemoryObjectStore::new()),
        trimmer: Arc::new(MemoryStream::new()),
        registry: None,
        clock: Arc::new(SystemClock),
    }
}

#[test]
fn last_shutdown_cancels_sleeping_loop_promptly() -> Result<()> {
    let dir = tempdir()?;
    let scheduler = CycleScheduler::new(SchedulerConfig::with_tick_interval(Duration::from_secs(
        3600,
    )));
    let context = context(&scheduler);
    let config = WriterConfig {
        local_dir: Some(dir.path().to_path_buf()),
        ..WriterConfig::default()
    };

    let first = context.writer(config.clone())?;
    let second = context.writer(config)?;
    assert!(scheduler.is_running());
    assert_eq!(scheduler.live_writers(), 2);

    first.shutdown()?;
    assert!(scheduler.is_running());

    // Let the loop reach its hour-long sleep before cancelling it.
    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    second.shutdown()?;
    second.shutdown()?;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!scheduler.is_running());
    assert_eq!(scheduler.live_writers(), 0);
    Ok(())
}

#[test]
fn loop_restarts_after_going_idle() -> Result<()> {
    let dir = tempdir()?;
    let scheduler = CycleScheduler::default();
    let context = context(&scheduler);
    let config = WriterConfig {
        local_dir: Some(dir.path().to_path_buf()),
        ..WriterConfig::default()
    };

    drop(context.writer(config.clone())?);
    assert!(!scheduler.is_running());

    let writer = context.writer(config)?;
    assert!(scheduler.is_running());
    drop(writer);
    assert!(!scheduler.is_running());
    Ok(())
}

#[test]
fn background_loop_cycles_on_time() -> Result<()> {
    let dir = tempdir()?;
    let scheduler = CycleScheduler::new(SchedulerConfig::with_tick_interval(
        Duration::from_millis(20),
    ));
    let store = Arc::new(MemoryObjectStore::new());
    let clock = Arc::new(ManualClock::new(JAN_1_2022));
    let writer = SegmentWriter::new(
        WriterConfig {
            local_dir: Some(dir.path().to_path_buf()),
            cycle_time_secs: Some(1),
            ..WriterConfig::default()
        },
        &scheduler,
        store.clone(),
        Arc::new(MemoryStream::new()),
        None,
        clock.clone(),
    )?;

    writer.write(&Record::raw(JAN_1_2022, vec![1, 2, 3]), None)?;
    clock.advance(Duration::from_secs(2));

    let deadline = Instant::now() + Duration::from_secs(10);
    while writer.segments_closed() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(writer.segments_closed(), 1);
    assert_eq!(store.put_log().len(), 1);
    Ok(())
}

#[test]
fn concurrent_writer_churn_does_not_deadlock() -> Result<()> {
    let dir = tempdir()?;
    let scheduler = CycleScheduler::new(SchedulerConfig::with_tick_interval(
        Duration::from_millis(1),
    ));
    let context = context(&scheduler);
    let local_dir = dir.path().to_path_buf();

    let ticker = {
        let scheduler = scheduler.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                scheduler.tick_now().expect("tick");
            }
        })
    };

    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let context = context.clone();
            let local_dir = local_dir.clone();
            thread::spawn(move || {
                for round in 0..25u64 {
                    let writer = context
                        .writer(WriterConfig {
                            name: format!("w{worker}"),
                            local_dir: Some(local_dir.clone()),
                            cycle_size: Some(128),
                            ..WriterConfig::default()
                        })
                        .expect("writer");
                    for i in 0..5u64 {
                        writer
                            .write(&Record::raw(JAN_1_2022 + round * 10 + i, vec![0u8; 40]), None)
                            .expect("write");
                    }
                    if round % 2 == 0 {
                        writer.shutdown().expect("shutdown");
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker panicked");
    }
    ticker.join().expect("ticker panicked");

    assert_eq!(scheduler.live_writers(), 0);
    assert!(!scheduler.is_running());
    Ok(())
}
