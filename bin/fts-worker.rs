use anyhow::{Context, Result};
use clap::Parser;
use ftsengine::driver::IpcWorker;
use ftsengine::{EngineConfig, PostingProfile, RetrievalMode};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "fts-worker")]
#[command(about = "Full-text search worker serving the IPC driver protocol", long_about = None)]
struct Args {
    /// Unix socket to listen on
    #[arg(long, env = "FTS_SOCKET", default_value = "/tmp/fts-worker.sock")]
    socket: PathBuf,

    /// JSON engine configuration; flags below override it
    #[arg(long, env = "FTS_CONFIG")]
    config: Option<PathBuf>,

    /// Segment directory (in-memory index when omitted)
    #[arg(long, env = "FTS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Posting profile (speed, balanced, compact)
    #[arg(long, env = "FTS_PROFILE")]
    profile: Option<PostingProfile>,

    /// Match any query term instead of all of them
    #[arg(long, env = "FTS_OR")]
    or: bool,

    /// Buffered documents per flushed segment
    #[arg(long, env = "FTS_FLUSH_THRESHOLD")]
    flush_threshold: Option<usize>,

    /// Tokenization threads
    #[arg(long, env = "FTS_THREADS")]
    threads: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if args.data_dir.is_some() {
        config.data_dir = args.data_dir.clone();
    }
    if let Some(profile) = args.profile {
        config = config.with_profile(profile);
    }
    if args.or {
        config = config.with_retrieval(RetrievalMode::Or);
    }
    if let Some(threshold) = args.flush_threshold {
        config = config.with_flush_threshold(threshold);
    }
    if let Some(threads) = args.threads {
        config = config.with_worker_threads(threads);
    }

    info!(
        "Starting fts-worker v{} (profile {}, data dir {:?})",
        ftsengine::VERSION,
        config.profile.as_str(),
        config.data_dir
    );

    let worker = IpcWorker::bind(&args.socket, config)
        .with_context(|| format!("binding {}", args.socket.display()))?;
    worker.serve()?;
    Ok(())
}
