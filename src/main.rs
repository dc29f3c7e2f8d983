//! fetchtrack
//!
//! Usage:
//!     fetchtrack index
//!     fetchtrack dump --output counters.json
//!     fetchtrack watch

mod error;
mod signals;

use crate::error::{ErrorKind, Result};
use crate::signals::{Request, Signals};
use clap::{Parser, Subcommand};
use exn::ResultExt;
use fetchtrack_config::{Config, StoreLocation};
use fetchtrack_convert::DirectoryConverter;
use fetchtrack_indexer::error::ErrorKind as IndexErrorKind;
use fetchtrack_indexer::{CancellationToken, Indexer};
use fetchtrack_repo::Repository;
use fetchtrack_store::{MemoryStore, SqliteStore, StoreHandle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fetchtrack", version, about = "Index shared download folders and track file downloads")]
struct Args {
    /// Config file (TOML, YAML or JSON); defaults to the user config directory
    #[arg(long, short, env = "FETCHTRACK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the work directory once and publish it as the new generation
    Index,
    /// Write every live download with its file counters as JSON
    Dump {
        /// Destination file; `-` writes to stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Keep running: index on an interval or SIGUSR1, dump on SIGUSR2
    Watch,
    /// Print the rendered page of a download
    Page { id: String },
    /// Print the per-file counters of a download
    Counters { id: String },
    /// Count one download of a file and print its url
    Hit { id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "fetchtrack=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    info!(
        work_dir = %config.work_dir.display(),
        store = %config.store,
        workers = config.workers,
        "configuration loaded"
    );
    let store = open_store(&config.store).await?;
    let repository = Repository::load(store).await.or_raise(|| ErrorKind::Repository)?;

    match args.command {
        Command::Index => {
            let indexer = build_indexer(&config, repository)?;
            let infos = indexer.index(&CancellationToken::new()).await.or_raise(|| ErrorKind::Index)?;
            for info in infos {
                println!("{}\t{}\t{}", info.id, info.file_count, info.source_path.display());
            }
        },
        Command::Dump { output } => {
            let indexer = build_indexer(&config, repository)?;
            let cancel = CancellationToken::new();
            match output.as_deref() {
                Some(path) if path == Path::new("-") => {
                    let mut stdout = tokio::io::stdout();
                    indexer.dump(&cancel, &mut stdout).await.or_raise(|| ErrorKind::Dump)?;
                },
                path => {
                    let path = path.unwrap_or(config.dump_file.as_path());
                    indexer.dump_to_path(&cancel, path).await.or_raise(|| ErrorKind::Dump)?;
                },
            }
        },
        Command::Watch => {
            let indexer = Arc::new(build_indexer(&config, repository)?);
            watch(indexer, &config).await?;
        },
        Command::Page { id } => {
            let page = repository.page(&id).await.or_raise(|| ErrorKind::Lookup)?;
            println!("{page}");
        },
        Command::Counters { id } => {
            let mut counters: Vec<_> =
                repository.download_counters(&id).await.or_raise(|| ErrorKind::Lookup)?.into_iter().collect();
            counters.sort();
            for (file, counter) in counters {
                println!("{file}\t{counter}");
            }
        },
        Command::Hit { id } => {
            let url = repository.file_url(&id).await.or_raise(|| ErrorKind::Lookup)?;
            let counter = repository.increment_file_counter(&id).await.or_raise(|| ErrorKind::Lookup)?;
            println!("{url}\t{counter}");
        },
    }
    Ok(())
}

async fn open_store(location: &StoreLocation) -> Result<StoreHandle> {
    match location {
        StoreLocation::Memory => {
            warn!("using an in-memory store; nothing outlives this process");
            Ok(Arc::new(MemoryStore::default()))
        },
        StoreLocation::Sqlite(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Store)?;
            }
            let store = SqliteStore::connect(path).await.or_raise(|| ErrorKind::Store)?;
            Ok(Arc::new(store))
        },
    }
}

fn build_indexer(config: &Config, repository: Repository) -> Result<Indexer> {
    let converter = DirectoryConverter::new(&config.work_dir, &config.url)
        .or_raise(|| ErrorKind::Converter)?
        .with_skip_files(config.skip_files.iter().cloned());
    Ok(Indexer::new(&config.work_dir, Arc::new(converter), repository)
        .with_workers(config.workers)
        .with_scan_timeout(config.index_timeout()))
}

/// Run until asked to stop, starting with an index.
///
/// Index and dump run as background tasks so that signals stay responsive;
/// overlapping requests are turned away by the indexer's single-flight slot.
async fn watch(indexer: Arc<Indexer>, config: &Config) -> Result<()> {
    let mut signals = Signals::install().or_raise(|| ErrorKind::Signal)?;
    let mut ticker = config.interval().map(|period| {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    tasks.spawn(index_task(indexer.clone(), cancel.clone()));
    info!(interval = ?config.interval(), "watching");

    loop {
        let request = tokio::select! {
            request = signals.recv() => request,
            () = tick(&mut ticker) => Request::Index,
            Some(_) = tasks.join_next(), if !tasks.is_empty() => continue,
        };
        match request {
            Request::Index => {
                tasks.spawn(index_task(indexer.clone(), cancel.clone()));
            },
            Request::Dump => {
                tasks.spawn(dump_task(indexer.clone(), cancel.clone(), config.dump_file.clone()));
            },
            Request::Shutdown => break,
        }
    }

    info!("shutting down");
    cancel.cancel();
    if tokio::time::timeout(SHUTDOWN_GRACE, async { while tasks.join_next().await.is_some() {} }).await.is_err() {
        warn!("background work did not stop in time; aborting");
        tasks.shutdown().await;
    }
    Ok(())
}

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        },
        None => std::future::pending().await,
    }
}

async fn index_task(indexer: Arc<Indexer>, cancel: CancellationToken) {
    match indexer.index(&cancel).await {
        Ok(infos) => info!(downloads = infos.len(), "published"),
        Err(err) if matches!(&*err, IndexErrorKind::AlreadyRunning) => {
            warn!("index requested while busy; skipped");
        },
        Err(err) if err.is_retryable() => warn!("index failed, retrying next cycle: {err:?}"),
        Err(err) => error!("{err:?}"),
    }
}

async fn dump_task(indexer: Arc<Indexer>, cancel: CancellationToken, path: PathBuf) {
    match indexer.dump_to_path(&cancel, &path).await {
        Ok(()) => info!(path = %path.display(), "counters dumped"),
        Err(err) if matches!(&*err, IndexErrorKind::AlreadyRunning) => {
            warn!("dump requested while busy; skipped");
        },
        Err(err) if err.is_retryable() => warn!("dump failed, retry with SIGUSR2: {err:?}"),
        Err(err) => error!("{err:?}"),
    }
}
