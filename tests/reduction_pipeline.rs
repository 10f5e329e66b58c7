use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;

use telemetry_archive::{
    CycleScheduler, Error, FileSetStore, MemoryObjectStore, MemoryStream, Record,
    ReductionFileRegistry, SegmentKey, SegmentWriter, SystemClock, Tier, WriterConfig,
};

const JAN_1_2022: u64 = 1_640_995_200_000_000_000;
const MINUTE: u64 = 60_000_000_000;

#[test]
fn decom_segments_flow_through_reduction_tiers() -> Result<()> {
    let temp = tempdir()?;
    let registry = Arc::new(ReductionFileRegistry::new(FileSetStore::open(
        temp.path().join("reducer.json"),
    )?));
    let scheduler = CycleScheduler::default();
    let writer = SegmentWriter::new(
        WriterConfig {
            name: "INST_decom".to_string(),
            remote_dir: "DEFAULT/decom_logs/tlm/INST".to_string(),
            local_dir: Some(temp.path().join("spool")),
            labels: vec!["DEFAULT".into(), "INST".into(), "HEALTH".into()],
            tier: Tier::Decom,
            cycle_size: Some(200),
            ..WriterConfig::default()
        },
        &scheduler,
        Arc::new(MemoryObjectStore::new()),
        Arc::new(MemoryStream::new()),
        Some(registry.clone()),
        Arc::new(SystemClock),
    )?;

    for i in 0..6u64 {
        writer.write(&Record::raw(JAN_1_2022 + i * MINUTE, vec![0u8; 76]), None)?;
    }
    writer.shutdown()?;

    let decom = registry.list_files(Tier::Decom, "INST", "DEFAULT")?;
    assert_eq!(decom.len(), 3);
    assert!(decom.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(decom.iter().all(|key| key.ends_with("__DEFAULT__INST__HEALTH__decom.bin")));

    // A minute reduction consumes the decom files and registers its output.
    let first = SegmentKey::parse(&decom[0])?;
    let last = SegmentKey::parse(&decom[2])?;
    let reduced = SegmentKey::new(first.start_ns, last.end_ns, Tier::Minute)
        .with_labels(["DEFAULT", "INST", "HEALTH"])
        .bucket_key("DEFAULT/reduced_minute_logs/tlm/INST")?;
    for key in &decom {
        assert_eq!(registry.remove_file(key)?, Tier::Decom);
    }
    assert_eq!(registry.add_file(&reduced)?, Some(Tier::Minute));
    assert_eq!(first.tier.next(), Some(Tier::Minute));

    // Reopen from disk to check persistence.
    let registry = ReductionFileRegistry::new(FileSetStore::open(temp.path().join("reducer.json"))?);
    assert!(registry.list_files(Tier::Decom, "INST", "DEFAULT")?.is_empty());
    assert_eq!(registry.list_files(Tier::Minute, "INST", "DEFAULT")?, vec![reduced.clone()]);
    assert!(matches!(
        registry.remove_file(&decom[0]),
        Err(Error::NotRegistered { .. })
    ));
    Ok(())
}
