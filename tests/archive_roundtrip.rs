use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;

use telemetry_archive::reader::{ArchiveSource, BufferedSegmentReader};
use telemetry_archive::{
    CycleScheduler, LocalObjectStore, MemoryStream, ObjectStore, Record, SegmentKey,
    SegmentWriter, SystemClock, WriterConfig,
};

const JAN_1_2022: u64 = 1_640_995_200_000_000_000;

#[test]
fn three_records_over_size_threshold_make_two_contiguous_segments() -> Result<()> {
    let temp = tempdir()?;
    let store = Arc::new(LocalObjectStore::new(temp.path().join("bucket"))?);
    let scheduler = CycleScheduler::default();
    let config = WriterConfig {
        name: "INST".to_string(),
        remote_dir: "DEFAULT/raw_logs/tlm/INST".to_string(),
        local_dir: Some(temp.path().join("spool")),
        cycle_size: Some(100),
        ..WriterConfig::default()
    };
    let writer = SegmentWriter::new(
        config,
        &scheduler,
        store.clone(),
        Arc::new(MemoryStream::new()),
        None,
        Arc::new(SystemClock),
    )?;

    let records: Vec<Record> = (0..3u64)
        .map(|i| Record::raw(JAN_1_2022 + i * 1_000_000, vec![i as u8; 26]))
        .collect();
    for record in &records {
        writer.write(record, None)?;
    }
    writer.shutdown()?;

    let keys = store.list("logs", "DEFAULT/raw_logs/tlm/INST/")?;
    assert_eq!(keys.len(), 2);
    let first = SegmentKey::parse(&keys[0])?;
    let second = SegmentKey::parse(&keys[1])?;
    assert_eq!(first.start_ns, records[0].timestamp_ns);
    assert_eq!(first.end_ns, records[1].timestamp_ns);
    assert_eq!(second.start_ns, records[2].timestamp_ns);
    assert!(first.end_ns <= second.start_ns);
    assert!(keys.iter().all(|key| key.contains("/20220101/")));

    assert_eq!(store.get("logs", &keys[0])?.len(), 100);
    assert_eq!(store.get("logs", &keys[1])?.len(), 50);

    let source = ArchiveSource::new(store, "logs", "DEFAULT/raw_logs/tlm/INST/")?;
    let replayed = BufferedSegmentReader::new(source).collect::<Result<Vec<_>, _>>()?;
    assert_eq!(replayed, records);

    let spool: Vec<_> = std::fs::read_dir(temp.path().join("spool"))?.collect();
    assert!(spool.is_empty(), "local segments removed after upload");
    Ok(())
}

#[test]
fn out_of_order_arrival_is_reordered_within_window() -> Result<()> {
    let temp = tempdir()?;
    let store = Arc::new(LocalObjectStore::new(temp.path())?);
    let scheduler = CycleScheduler::default();
    let writer = SegmentWriter::new(
        WriterConfig {
            name: "INST".to_string(),
            remote_dir: "tlm".to_string(),
            local_dir: Some(temp.path().join("spool")),
            ..WriterConfig::default()
        },
        &scheduler,
        store.clone(),
        Arc::new(MemoryStream::new()),
        None,
        Arc::new(SystemClock),
    )?;

    // Regressions below the 1 s tolerance stay in one segment.
    for offset_ms in [5u64, 1, 3, 2, 4] {
        writer.write(&Record::raw(JAN_1_2022 + offset_ms * 1_000_000, vec![0; 8]), None)?;
    }
    writer.stop()?;
    assert_eq!(writer.segments_closed(), 1);

    let keys = store.list("logs", "tlm/")?;
    assert_eq!(keys.len(), 1);
    let key = SegmentKey::parse(&keys[0])?;
    assert_eq!(key.start_ns, JAN_1_2022 + 1_000_000);
    assert_eq!(key.end_ns, JAN_1_2022 + 5_000_000);

    let source = ArchiveSource::new(store.clone(), "logs", "tlm/")?;
    let times: Vec<u64> = BufferedSegmentReader::new(source)
        .map(|record| record.map(|r| (r.timestamp_ns - JAN_1_2022) / 1_000_000))
        .collect::<Result<_, _>>()?;
    assert_eq!(times, vec![1, 2, 3, 4, 5]);

    let source = ArchiveSource::new(store, "logs", "tlm/")?;
    let times: Vec<u64> = BufferedSegmentReader::with_depth(source, 2)
        .map(|record| record.map(|r| (r.timestamp_ns - JAN_1_2022) / 1_000_000))
        .collect::<Result<_, _>>()?;
    assert_eq!(times, vec![1, 3, 2, 4, 5]);
    Ok(())
}
