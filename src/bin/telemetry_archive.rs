use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use telemetry_archive::reader::{ArchiveSource, BufferedSegmentReader, RecordSource};
use telemetry_archive::timestamp::format_timestamp;
use telemetry_archive::{
    FileSetStore, LocalObjectStore, ReductionFileRegistry, SegmentKey, SegmentReader, Tier,
};

#[derive(Parser)]
#[command(name = "telemetry-archive", version, about = "Telemetry segment tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the records of a local segment file in time order
    Replay {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value_t = 10)]
        depth: usize,
    },
    /// Print the records of every archived segment under a prefix in time order
    ArchiveReplay {
        /// Root directory of a local object store
        #[arg(long)]
        archive_root: PathBuf,
        #[arg(long, default_value = "logs")]
        bucket: String,
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long, default_value_t = 10)]
        depth: usize,
    },
    /// Parse a segment key
    Key {
        #[arg(long)]
        key: String,
    },
    /// Inspect or edit the reduction registry
    Reducer {
        /// Path of the JSON set store
        #[arg(long)]
        store: PathBuf,
        #[command(subcommand)]
        action: ReducerAction,
    },
}

#[derive(Subcommand)]
enum ReducerAction {
    Add {
        key: String,
    },
    Remove {
        key: String,
    },
    List {
        #[arg(long)]
        tier: Tier,
        #[arg(long)]
        target: String,
        #[arg(long)]
        scope: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let mut out = io::BufWriter::new(io::stdout());
    match cli.command {
        Commands::Replay { file, depth } => cmd_replay(&file, depth, &mut out)?,
        Commands::ArchiveReplay {
            archive_root,
            bucket,
            prefix,
            depth,
        } => cmd_archive_replay(&archive_root, &bucket, &prefix, depth, &mut out)?,
        Commands::Key { key } => cmd_key(&key, &mut out)?,
        Commands::Reducer { store, action } => cmd_reducer(&store, action, &mut out)?,
    }
    out.flush()?;
    Ok(())
}

fn cmd_replay(file: &Path, depth: usize, out: &mut impl Write) -> Result<()> {
    let source = SegmentReader::open(file)
        .with_context(|| format!("failed to open {}", file.display()))?;
    dump(BufferedSegmentReader::with_depth(source, depth), out)
}

fn cmd_archive_replay(
    root: &Path,
    bucket: &str,
    prefix: &str,
    depth: usize,
    out: &mut impl Write,
) -> Result<()> {
    let store = Arc::new(LocalObjectStore::new(root)?);
    let source = ArchiveSource::new(store, bucket, prefix)?;
    dump(BufferedSegmentReader::with_depth(source, depth), out)
}

fn dump<S: RecordSource>(reader: BufferedSegmentReader<S>, out: &mut impl Write) -> Result<()> {
    let mut count = 0u64;
    for record in reader {
        let record = record?;
        writeln!(
            out,
            "{} {} {}",
            format_timestamp(record.timestamp_ns)?,
            record.kind.as_str(),
            record.payload.len()
        )?;
        count += 1;
    }
    writeln!(out, "records: {count}")?;
    Ok(())
}

fn cmd_key(key: &str, out: &mut impl Write) -> Result<()> {
    let parsed = SegmentKey::parse(key)?;
    writeln!(out, "start: {}", format_timestamp(parsed.start_ns)?)?;
    writeln!(out, "end: {}", format_timestamp(parsed.end_ns)?)?;
    writeln!(out, "tier: {}", parsed.tier)?;
    writeln!(out, "labels: {}", parsed.labels.join(", "))?;
    writeln!(out, "extension: {}", parsed.extension)?;
    if let Some(next) = parsed.tier.next() {
        writeln!(out, "next tier: {next}")?;
    }
    Ok(())
}

fn cmd_reducer(store: &Path, action: ReducerAction, out: &mut impl Write) -> Result<()> {
    let store = FileSetStore::open(store)
        .with_context(|| format!("failed to open set store {}", store.display()))?;
    let registry = ReductionFileRegistry::new(store);
    match action {
        ReducerAction::Add { key } => match registry.add_file(&key)? {
            Some(tier) => writeln!(out, "added {key} to {tier}")?,
            None => writeln!(out, "ignored {key}: not a reducible tier")?,
        },
        ReducerAction::Remove { key } => {
            let tier = registry.remove_file(&key)?;
            writeln!(out, "removed {key} from {tier}")?;
        }
        ReducerAction::List {
            tier,
            target,
            scope,
        } => {
            for file in registry.list_files(tier, &target, &scope)? {
                writeln!(out, "{file}")?;
            }
        }
    }
    Ok(())
}
