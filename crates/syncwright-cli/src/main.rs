//! syncwright command-line driver.
//!
//! Usage:
//!   syncwright list paper.tex
//!   syncwright create paper.tex --line 12
//!   syncwright sync paper.tex --uid ab12cd --instruction "keep it formal"
//!   syncwright sync paper.tex --all
//!   syncwright gc paper.tex
//!   syncwright export paper.tex
//!
//! Logs go to stderr; set `RUST_LOG=syncwright_kernel=debug` for detail.

mod session;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use syncwright_kernel::{
    CachingGenerator, Exporter, Generator, OpenAiGenerator, Snapshot, SnapshotCache, SnapshotStore,
    SqliteSnapshotStore, SyncConfig, SyncRequest, SyncResult, SyncTask,
};
use syncwright_types::{DocumentId, PartKind, Uid};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::session::{Session, document_id};

/// Keep source and target text of bilingual documents in sync.
#[derive(Parser, Debug)]
#[command(name = "syncwright", version)]
struct Args {
    /// Config file (default: <config dir>/syncwright/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Snapshot database (default: <data dir>/syncwright/snapshots.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every block with its status
    List {
        file: PathBuf,
        /// Print the outline as JSON
        #[arg(long)]
        json: bool,
    },

    /// Insert a new block whose target is the given line
    Create {
        file: PathBuf,
        /// 1-based line number
        #[arg(long)]
        line: usize,
    },

    /// Sync one block, or every dirty block
    Sync {
        file: PathBuf,
        #[arg(long, conflicts_with_all = ["line", "all"])]
        uid: Option<String>,
        /// 1-based marker or target line
        #[arg(long, conflicts_with = "all")]
        line: Option<usize>,
        #[arg(long)]
        all: bool,
        /// Authoritative side: source or target
        #[arg(long)]
        from: Option<String>,
        /// Extra instruction for the generator
        #[arg(long)]
        instruction: Option<String>,
    },

    /// Drop snapshots of blocks that no longer exist in the file
    Gc { file: PathBuf },

    /// Drop every snapshot of a file that was deleted
    Forget {
        /// Path the document used to live at
        file: PathBuf,
    },

    /// Write the file without comments, with includes expanded
    Export {
        file: PathBuf,
        /// Directory includes resolve against (default: the file's directory)
        #[arg(long)]
        base: Option<PathBuf>,
        /// Print to stdout instead of writing <name>-exported
        #[arg(long)]
        stdout: bool,
    },
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("syncwright").join("config.toml"))
}

fn default_db_path() -> Result<PathBuf> {
    let dir = dirs::data_local_dir()
        .context("no local data directory; pass --db")?
        .join("syncwright");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    Ok(dir.join("snapshots.db"))
}

fn load_config(args: &Args) -> Result<SyncConfig> {
    match args.config.clone().or_else(default_config_path) {
        Some(path) => SyncConfig::load(&path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(SyncConfig::default()),
    }
}

fn open_store(args: &Args) -> Result<Arc<dyn SnapshotStore>> {
    let path = match &args.db {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    let store = SqliteSnapshotStore::open(&path)
        .with_context(|| format!("failed to open snapshot store {}", path.display()))?;
    Ok(Arc::new(store))
}

fn generator(config: &SyncConfig) -> Arc<dyn Generator> {
    let gen_config = &config.generation;
    let mut openai = OpenAiGenerator::new(&gen_config.base_url, &gen_config.model);
    match gen_config.resolve_api_key() {
        Some(key) => openai = openai.with_api_key(key),
        None => warn!(env = %gen_config.api_key_env, "no API key configured"),
    }
    Arc::new(CachingGenerator::new(Arc::new(openai), config.cache.responses))
}

fn parse_from(from: Option<&str>) -> Result<Option<PartKind>> {
    from.map(|s| PartKind::from_str(s).with_context(|| format!("--from must be source or target, got {s:?}")))
        .transpose()
}

fn one_based(line: usize) -> Result<usize> {
    line.checked_sub(1).context("line numbers start at 1")
}

async fn wait_all(session: &Session, tasks: Vec<SyncTask>) -> Vec<(Uid, Option<SyncResult<Snapshot>>)> {
    let syncer = session.syncer().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, rolling back");
            syncer.cancel_all().await;
        }
    });

    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        let uid = task.uid();
        results.push((uid, task.wait().await));
    }
    interrupt.abort();
    results
}

async fn run_sync(
    session: &Session,
    uid: Option<String>,
    line: Option<usize>,
    all: bool,
    from: Option<PartKind>,
    instruction: Option<String>,
) -> Result<()> {
    let mut requests = Vec::new();
    if all {
        for block in session.syncer().outline() {
            if block.status.is_dirty() {
                requests.push(SyncRequest::uid(block.uid));
            }
        }
    } else if let Some(uid) = uid {
        requests.push(SyncRequest::uid(Uid::parse(&uid)?));
    } else if let Some(line) = line {
        requests.push(SyncRequest::line(one_based(line)?));
    } else {
        bail!("pass --uid, --line or --all");
    }
    if requests.is_empty() {
        println!("nothing to sync");
        return Ok(());
    }

    let mut tasks = Vec::with_capacity(requests.len());
    for mut request in requests {
        request.from = from.or(request.from);
        request.instruction = instruction.clone();
        tasks.push(session.syncer().sync(request).await?);
    }

    let mut failed = 0;
    for (uid, result) in wait_all(session, tasks).await {
        match result {
            Some(Ok(snapshot)) => println!("{uid}  synced  {}", snapshot.target),
            Some(Err(e)) if e.is_cancellation() => println!("{uid}  cancelled"),
            Some(Err(e)) => {
                failed += 1;
                println!("{uid}  failed  {e}");
            }
            None => println!("{uid}  cancelled"),
        }
    }
    session.save()?;
    if failed > 0 {
        bail!("{failed} block(s) failed to sync");
    }
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    match args.command {
        Command::List { ref file, json } => {
            let session = Session::open(file, &config, open_store(&args)?, generator(&config))?;
            let outline = session.syncer().outline();
            if json {
                println!("{}", serde_json::to_string_pretty(&outline)?);
            } else {
                let text = session.text();
                let lines: Vec<&str> = text.split('\n').collect();
                for block in &outline {
                    let source = lines.get(*block.lines.start()).copied().unwrap_or_default();
                    println!(
                        "{:>5}  {}  {:<7}  {}",
                        block.lines.start() + 1,
                        block.uid,
                        block.status,
                        truncate(source.trim(), 60)
                    );
                }
            }
        }

        Command::Create { ref file, line } => {
            let session = Session::open(file, &config, open_store(&args)?, generator(&config))?;
            let block = session.syncer().create_block(one_based(line)?).await?;
            session.save()?;
            println!("{}", block.uid);
        }

        Command::Sync {
            ref file,
            ref uid,
            line,
            all,
            ref from,
            ref instruction,
        } => {
            let from = parse_from(from.as_deref())?;
            let session = Session::open(file, &config, open_store(&args)?, generator(&config))?;
            run_sync(&session, uid.clone(), line, all, from, instruction.clone()).await?;
        }

        Command::Gc { ref file } => {
            let session = Session::open(file, &config, open_store(&args)?, generator(&config))?;
            let blocks = session.syncer().reload()?;
            info!(path = %session.path().display(), live = blocks.len(), "snapshots collected");
            println!("{} live block(s)", blocks.len());
        }

        Command::Forget { ref file } => {
            let store = open_store(&args)?;
            let removed = forget(file, store)?;
            println!("removed {removed} snapshot(s)");
        }

        Command::Export {
            ref file,
            ref base,
            stdout,
        } => {
            let extension = file.extension().and_then(|e| e.to_str());
            let base = match base {
                Some(base) => base.clone(),
                None => file.parent().map(Path::to_path_buf).unwrap_or_default(),
            };
            let exporter = Exporter::new(config.parser(extension), base);
            if stdout {
                exporter.check(file)?;
                print!("{}", exporter.render(file)?);
            } else {
                let out = exporter.export(file)?;
                println!("{}", out.display());
            }
        }
    }
    Ok(())
}

/// The file may already be gone, so the identity comes from its parent.
fn forget(file: &Path, store: Arc<dyn SnapshotStore>) -> Result<usize> {
    let id = match document_id(file) {
        Ok(id) => id,
        Err(_) => {
            let parent = file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = file.file_name().context("not a file path")?;
            let canonical = parent
                .canonicalize()
                .with_context(|| format!("failed to resolve {}", parent.display()))?
                .join(name);
            DocumentId::from_uri(&format!("file://{}", canonical.display()))
        }
    };
    let removed = SnapshotCache::new(id, store).reserve(std::iter::empty())?;
    info!(document = %id, removed = removed.len(), "document forgotten");
    Ok(removed.len())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    run(args).await
}
