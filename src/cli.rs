use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::chapter_key::ChapterNumber;
use crate::sweep::SweepReach;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// YAML configuration file (defaults to `comichub.yaml` when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding `index.json` and the comic documents.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Queue document path.
    #[arg(long, global = true)]
    pub queue: Option<PathBuf>,

    /// Skip the git publish step even when publishing is configured.
    #[arg(long, global = true)]
    pub no_publish: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add a comic from its landing page and fetch its first chapter.
    Add(AddArgs),
    /// Fetch missing chapters of one comic.
    Sync(SyncArgs),
    /// Advance every comic in the index past its latest known chapter.
    Sweep(SweepArgs),
    /// Rewrite stored source URLs.
    Rewrite {
        #[command(subcommand)]
        command: RewriteCommand,
    },
    /// Print the comics in the index.
    List,
    /// Regenerate index entries from the comic documents.
    RebuildIndex,
    /// Commit and push the data directory.
    Publish,
    /// Inspect or drain the task queue.
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum RewriteCommand {
    /// Point one comic at a new source URL.
    Url(RewriteUrlArgs),
    /// Replace a URL fragment (typically a domain) everywhere.
    All(RewriteAllArgs),
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Enqueue an add-comic task.
    Add(AddArgs),
    /// Enqueue a chapter sync task.
    Sync(SyncArgs),
    /// Enqueue a single-comic source rewrite.
    RewriteUrl(RewriteUrlArgs),
    /// Enqueue a catalog-wide URL rewrite.
    RewriteAll(RewriteAllArgs),
    /// Claim and run one batch of tasks.
    Run(QueueRunArgs),
    /// Print the queue.
    List,
    /// Reset failed tasks to pending.
    Retry,
    /// Remove failed tasks.
    ClearFailed,
}

#[derive(Debug, Clone, Args)]
pub struct AddArgs {
    /// Comic landing page URL (must be http/https).
    #[arg(long)]
    pub url: String,
}

#[derive(Debug, Clone, Args)]
pub struct SyncArgs {
    /// Comic landing page URL (must be http/https).
    #[arg(long)]
    pub url: String,

    /// Lowest chapter to consider (inclusive).
    #[arg(long)]
    pub start: Option<ChapterNumber>,

    /// Highest chapter to consider (inclusive).
    #[arg(long)]
    pub end: Option<ChapterNumber>,

    /// Re-fetch chapters that are already stored.
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Args)]
pub struct SweepArgs {
    /// How far to advance each comic: `next` or `all`.
    #[arg(long, value_parser = SweepReach::parse)]
    pub reach: Option<SweepReach>,

    /// Enqueue a sync task for every comic that failed.
    #[arg(long)]
    pub requeue_failed: bool,
}

#[derive(Debug, Clone, Args)]
pub struct RewriteUrlArgs {
    /// Comic id as stored in the index.
    #[arg(long)]
    pub comic_id: String,

    /// New source URL.
    #[arg(long)]
    pub new_url: String,
}

#[derive(Debug, Clone, Args)]
pub struct RewriteAllArgs {
    /// Fragment to replace.
    #[arg(long)]
    pub old: String,

    /// Replacement.
    #[arg(long)]
    pub new: String,
}

#[derive(Debug, Clone, Args)]
pub struct QueueRunArgs {
    /// Maximum tasks claimed in this batch.
    #[arg(long)]
    pub max_tasks: Option<usize>,

    /// Maximum tasks running at once.
    #[arg(long)]
    pub max_parallelism: Option<usize>,
}
