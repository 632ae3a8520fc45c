// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use repotree::{
    config::{Layout, Settings},
    path::{default_layout_path, default_settings_path},
    store::{memory::RepositoryOptions, MemoryStore},
    transfer::InquireFrontend,
    tree::{SortOrder, TreeFilter},
    EntryOutcome, Gesture, Location, Node, TreeEvent, TreeModel, TransferEngine,
};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    fs,
    path::{Path, PathBuf},
    process::exit,
    sync::Arc,
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How long to wait for a background fetch before checking on it again.
const FETCH_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  repotree [options] <repotree-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Repository layout file to operate on.
    #[arg(short, long, global = true, value_name = "path")]
    pub layout: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let settings = load_settings()?;
        let layout_path = match self.layout.or_else(|| settings.layout.clone()) {
            Some(path) => path,
            None => default_layout_path()?,
        };

        match self.command {
            Command::Init(opts) => run_init(opts, layout_path),
            Command::Tree(opts) => run_tree(opts, settings, layout_path).await,
            Command::Copy(opts) => run_transfer(opts, Gesture::Copy, layout_path).await,
            Command::Move(opts) => run_transfer(opts, Gesture::Move, layout_path).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Add new repository to layout.
    #[command(override_usage = "repotree init [options] <repository>")]
    Init(InitOptions),

    /// Show repository hierarchy.
    #[command(override_usage = "repotree tree [options] [<location>]")]
    Tree(TreeOptions),

    /// Copy entries into target folder.
    #[command(override_usage = "repotree copy <target> <source>...")]
    Copy(TransferOptions),

    /// Move entries into target folder.
    #[command(override_usage = "repotree move <target> <source>...")]
    Move(TransferOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Name of repository to add.
    #[arg(value_name = "repository")]
    pub repository: String,

    /// Do not create a connections folder.
    #[arg(long)]
    pub no_connections: bool,

    /// Refuse modification of repository.
    #[arg(long)]
    pub read_only: bool,

    /// Delay every folder listing, marking repository as slow.
    #[arg(long, value_name = "millis")]
    pub latency_ms: Option<u64>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct TreeOptions {
    /// Folder to start from, e.g., "//Local/processes".
    #[arg(value_name = "location")]
    pub location: Option<Location>,

    /// Order of children in each folder.
    #[arg(short, long, value_enum, value_name = "order")]
    pub sort: Option<SortArg>,

    /// Show folders only.
    #[arg(long)]
    pub only_folders: bool,

    /// Show writable repositories only.
    #[arg(long)]
    pub only_writable: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Name,
    LastModified,
}

impl From<SortArg> for SortOrder {
    fn from(sort: SortArg) -> Self {
        match sort {
            SortArg::Name => SortOrder::Name,
            SortArg::LastModified => SortOrder::LastModified,
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct TransferOptions {
    /// Folder receiving the entries.
    #[arg(required = true, value_name = "target")]
    pub target: Location,

    /// Entries to transfer.
    #[arg(required = true, value_name = "source")]
    pub sources: Vec<Location>,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

fn load_settings() -> Result<Settings> {
    let path = default_settings_path()?;
    if !path.exists() {
        return Ok(Settings::default());
    }

    Ok(fs::read_to_string(&path)?.parse()?)
}

fn load_layout(path: &Path) -> Result<MemoryStore> {
    if !path.exists() {
        info!("no layout at {}, start empty", path.display());
        return Ok(MemoryStore::new());
    }

    let layout: Layout = fs::read_to_string(path)?.parse()?;
    Ok(layout.to_store()?)
}

fn save_layout(path: &Path, store: &MemoryStore) -> Result<()> {
    if let Some(parent) = path.parent() {
        mkdirp::mkdirp(parent)?;
    }

    fs::write(path, Layout::from_store(store)?.to_string())?;
    Ok(())
}

fn run_init(opts: InitOptions, layout_path: PathBuf) -> Result<()> {
    let store = load_layout(&layout_path)?;
    let options = RepositoryOptions {
        writable: !opts.read_only,
        connections: !opts.no_connections,
        latency: opts.latency_ms.map(Duration::from_millis),
    };
    let root = store.add_repository(&opts.repository, options)?;
    save_layout(&layout_path, &store)?;
    info!("initialized repository {root}");

    Ok(())
}

async fn run_tree(opts: TreeOptions, settings: Settings, layout_path: PathBuf) -> Result<()> {
    let store = Arc::new(load_layout(&layout_path)?);
    let filter: TreeFilter = settings
        .tree_filter()
        .only_folders(opts.only_folders || settings.tree.only_folders)
        .only_writable(opts.only_writable || settings.tree.only_writable);
    let sort = opts.sort.map(SortOrder::from).unwrap_or(settings.tree.sort);
    let mut model = TreeModel::new(store, filter, sort);
    model.subscribe(Box::new(|event| {
        if let TreeEvent::FetchFailed { folder, message } = event {
            warn!("cannot load {folder}: {message}");
        }
    }));

    let roots = match opts.location {
        Some(location) => vec![location],
        None => model
            .repositories()
            .into_iter()
            .map(|root| root.location)
            .collect(),
    };

    let mut stack = roots
        .into_iter()
        .rev()
        .map(|location| (location, 0_usize))
        .collect::<Vec<_>>();
    while let Some((folder, depth)) = stack.pop() {
        println!("{}{}", "  ".repeat(depth), folder.name());

        let Some(children) = model.settled_children(&folder, FETCH_POLL).await else {
            println!("{}<unavailable>", "  ".repeat(depth + 1));
            continue;
        };

        for node in children.into_iter().rev() {
            match node {
                Node::Entry(entry) if entry.is_folder() => stack.push((entry.location, depth + 1)),
                Node::Entry(entry) => println!("{}{}", "  ".repeat(depth + 1), entry.name()),
                Node::Pending(_) => {}
            }
        }
    }

    Ok(())
}

async fn run_transfer(opts: TransferOptions, gesture: Gesture, layout_path: PathBuf) -> Result<()> {
    let store = Arc::new(load_layout(&layout_path)?);

    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<30}  [{wide_bar:.yellow/blue}]",
    )?
    .progress_chars("-Cco.");
    bar.set_style(style);
    bar.set_message(opts.target.to_string());

    let frontend = Arc::new(InquireFrontend::new(bar.clone()));
    let engine = TransferEngine::new(Arc::clone(&store), frontend);
    let handle = engine.transfer(&opts.target, opts.sources, gesture, bar)?;
    let report = handle.await?;

    for (source, outcome) in &report.outcomes {
        match outcome {
            EntryOutcome::Done(location) => info!("{source} -> {location}"),
            EntryOutcome::Skipped => info!("{source} skipped"),
            EntryOutcome::Aborted => info!("{source} stopped the batch"),
        }
    }
    for source in &report.not_attempted {
        info!("{source} not attempted");
    }

    save_layout(&layout_path, &store)?;
    if report.cancelled {
        return Err(anyhow!("transfer into {} cancelled", report.target));
    }

    Ok(())
}
