use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use script_select::{
    config::SelectionConfig,
    coverage::{CoverageDefinition, SnapshotPolicy},
    providers::{InMemoryProvider, PagedProvider, RecordFileStore, DEFAULT_WINDOW_LEN},
    selection::Selector,
    CandidateProvider,
};

/// Select a recording script from a pool of candidate sentences.
#[derive(Parser, Debug)]
#[command(name = "select", about, long_about = None)]
struct Args {
    /// JSON selection configuration (alphabet, coverage, stop criteria)
    config: PathBuf,

    /// Record file with the candidate feature vectors
    pool: PathBuf,

    /// Coverage snapshot to restore, written after a fresh scan
    snapshot: Option<PathBuf>,

    /// Load every vector up front instead of paging windows in
    #[arg(long)]
    in_memory: bool,

    /// Candidates per paged window
    #[arg(long, default_value_t = DEFAULT_WINDOW_LEN)]
    window_len: usize,

    /// Fail instead of rescanning when the snapshot cannot be used
    #[arg(long)]
    require_snapshot: bool,
}

fn select<P: CandidateProvider>(
    config: SelectionConfig,
    provider: &mut P,
    snapshot: Option<PathBuf>,
    policy: SnapshotPolicy,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut coverage = CoverageDefinition::new(config.alphabet, config.coverage)?;

    let scan_start = Instant::now();
    match &snapshot {
        Some(path) => coverage.load_or_initialise(path, provider, policy)?,
        None => coverage.initialise(provider)?,
    }
    println!("Pool statistics ready in {:.2?}", scan_start.elapsed());
    if let Some(report) = coverage.corpus_report() {
        eprintln!("{report}");
    }

    let select_start = Instant::now();
    let outcome = Selector::new(provider, &mut coverage, config.stop)?.run()?;
    println!(
        "Selected {} sentences in {:.2?}",
        outcome.selected.len(),
        select_start.elapsed()
    );
    eprintln!("{}", coverage.selection_report());

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = SelectionConfig::from_json_file(&args.config)?;
    let mut store = RecordFileStore::open(&args.pool)?;
    let policy = if args.require_snapshot {
        SnapshotPolicy::Require
    } else {
        SnapshotPolicy::Rescan
    };

    if args.in_memory {
        let mut provider = InMemoryProvider::from_store(&mut store)?;
        select(config, &mut provider, args.snapshot, policy)
    } else {
        let mut provider = PagedProvider::new(store)?.with_window_len(args.window_len);
        select(config, &mut provider, args.snapshot, policy)
    }
}
