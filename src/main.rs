//! # Luminex - background analysis driver
//!
//! Opens files as documents and analyzes them through a lazily started,
//! idle-stopped worker.
//!
//! ## Quick Start
//!
//! ```bash
//! # Print line/word/char counts
//! cargo run -- src/main.rs Cargo.toml
//!
//! # Skip blank lines, with debug logging of the worker lifecycle
//! cargo run -- --skip-blank -vv src/main.rs
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use luminex_core::{Config, Document, DocumentId, DocumentStore, IdleLimit};
use luminex_worker::{LocalHost, WorkerContext, WorkerManager, WorkerManagerOptions};

const LABEL: &str = "analysis";
const MODULE: &str = "text-stats";

/// Luminex - analyze files through a background worker
#[derive(Parser, Debug)]
#[command(name = "luminex")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Files to analyze
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Stop the worker after this many idle milliseconds
    #[arg(long, value_name = "MS")]
    idle_ms: Option<u64>,

    /// Do not count blank lines
    #[arg(long)]
    skip_blank: bool,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Creation data for the statistics worker.
#[derive(Debug, Clone, Copy, Default)]
struct StatsOptions {
    skip_blank: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TextStats {
    lines: usize,
    words: usize,
    chars: usize,
}

/// Worker implementation computing [`TextStats`] over synchronized documents.
struct StatsWorker {
    ctx: WorkerContext,
    options: StatsOptions,
}

impl StatsWorker {
    fn stats(&self, id: DocumentId) -> Option<TextStats> {
        let doc = self.ctx.document(id)?;
        let lines = doc
            .text
            .lines()
            .filter(|line| !self.options.skip_blank || !line.trim().is_empty())
            .count();
        Some(TextStats {
            lines,
            words: doc.text.split_whitespace().count(),
            chars: doc.text.chars().count(),
        })
    }
}

fn stats_host(store: &DocumentStore) -> LocalHost<StatsWorker, StatsOptions> {
    LocalHost::new(store.clone()).register(MODULE, |ctx, options: Option<StatsOptions>| {
        StatsWorker {
            ctx,
            options: options.unwrap_or_default(),
        }
    })
}

/// Opens every file and runs the statistics worker over them.
async fn analyze(
    files: &[PathBuf],
    options: WorkerManagerOptions<StatsOptions>,
) -> anyhow::Result<Vec<(PathBuf, TextStats)>> {
    let store = DocumentStore::new();
    let mut opened = Vec::with_capacity(files.len());
    for path in files {
        let id = store.open(Document::from_file(path)?);
        opened.push((path.clone(), id));
    }

    let manager = WorkerManager::new(stats_host(&store), options)?;
    let ids: Vec<DocumentId> = opened.iter().map(|(_, id)| *id).collect();
    let proxy = manager.get_worker(&ids).await?;

    let mut results = Vec::with_capacity(opened.len());
    for (path, id) in opened {
        if let Some(stats) = proxy.call(move |w| w.stats(id)).await? {
            results.push((path, stats));
        }
    }

    manager.dispose();
    Ok(results)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true),
        )
        .with(tracing_subscriber::filter::LevelFilter::from_level(
            log_level,
        ))
        .init();

    tracing::info!("Starting Luminex v{}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    let mut settings = config.worker(LABEL);
    if let Some(ms) = args.idle_ms {
        settings.stop_when_idle = IdleLimit::AfterMs(ms);
    }

    let options = WorkerManagerOptions::from_settings(LABEL, MODULE, &settings).with_create_data(
        StatsOptions {
            skip_blank: args.skip_blank,
        },
    );

    for (path, stats) in analyze(&args.files, options).await? {
        println!(
            "{:>8} {:>8} {:>8}  {}",
            stats.lines,
            stats.words,
            stats.chars,
            path.display()
        );
    }

    Ok(())
}
