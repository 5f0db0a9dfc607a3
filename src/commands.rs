use anyhow::Context as _;
use serde::Serialize;

use crate::app::App;
use crate::app::model::{
    AddComicPayload, QueueEntry, RewriteUrlPayload, SyncChaptersPayload, TaskKind,
};
use crate::chapter_key::ChapterRange;
use crate::cli::{Cli, Command, QueueCommand, RewriteCommand, SyncArgs};
use crate::config::AppConfig;
use crate::sweep::sweep_all;
use crate::sync::SyncRequest;

/// Resolve configuration from file, environment and global flags.
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref()).context("load config")?;
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(queue) = &cli.queue {
        config.queue_path = queue.clone();
    }
    Ok(config)
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let app = App::from_config(config, !cli.no_publish)?;
    run_with(&app, cli.command)
}

/// Execute one command. Commands that change the catalog publish once at the
/// end.
pub fn run_with(app: &App, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Add(args) => {
            let report = app.synchronizer().add_comic(&args.url).context("add comic")?;
            print_json(&report)?;
            publish(app)?;
        }
        Command::Sync(args) => {
            let report = app.synchronizer().sync(&sync_request(&args)).context("sync")?;
            print_json(&report)?;
            publish(app)?;
        }
        Command::Sweep(args) => {
            let reach = args.reach.unwrap_or(app.config().sweep.reach);
            let report = sweep_all(app.synchronizer(), reach).context("sweep")?;
            print_json(&report)?;
            if args.requeue_failed {
                for failure in &report.failed {
                    let Some(source_url) = &failure.source_url else {
                        tracing::warn!(comic_id = %failure.comic_id, "cannot requeue comic without source_url");
                        continue;
                    };
                    let payload = SyncChaptersPayload {
                        source_url: source_url.clone(),
                        start: None,
                        end: None,
                        overwrite: false,
                        comic_id: Some(failure.comic_id.clone()),
                    };
                    app.tasks()
                        .enqueue(TaskKind::SyncChapters, serde_json::to_value(payload)?)?;
                }
            }
            publish(app)?;
        }
        Command::Rewrite {
            command: RewriteCommand::Url(args),
        } => {
            let changed = app
                .catalog()
                .rewrite_source_location(&args.comic_id, &args.new_url)
                .context("rewrite url")?;
            println!("{}: {}", args.comic_id, if changed { "updated" } else { "unchanged" });
            publish(app)?;
        }
        Command::Rewrite {
            command: RewriteCommand::All(args),
        } => {
            let report = app
                .catalog()
                .rewrite_all_occurrences(&args.old, &args.new)
                .context("rewrite all")?;
            print_json(&report)?;
            publish(app)?;
        }
        Command::List => {
            let index = app.catalog().index()?;
            if index.is_empty() {
                println!("no comics");
            }
            for (comic_id, entry) in index {
                println!(
                    "- {} ({comic_id}) [{} chapter(s)]",
                    entry.title, entry.total_chapters
                );
            }
        }
        Command::RebuildIndex => {
            let report = app.catalog().rebuild_index().context("rebuild index")?;
            print_json(&report)?;
            publish(app)?;
        }
        Command::Publish => {
            print_json(&app.publish()?)?;
        }
        Command::Queue { command } => run_queue(app, command)?,
    }
    Ok(())
}

fn run_queue(app: &App, command: QueueCommand) -> anyhow::Result<()> {
    let tasks = app.tasks();
    match command {
        QueueCommand::Add(args) => {
            let payload = AddComicPayload {
                source_url: args.url,
            };
            print_json(&tasks.enqueue(TaskKind::AddComic, serde_json::to_value(payload)?)?)?;
        }
        QueueCommand::Sync(args) => {
            let payload = SyncChaptersPayload {
                source_url: args.url,
                start: args.start,
                end: args.end,
                overwrite: args.overwrite,
                comic_id: None,
            };
            print_json(&tasks.enqueue(TaskKind::SyncChapters, serde_json::to_value(payload)?)?)?;
        }
        QueueCommand::RewriteUrl(args) => {
            let payload = RewriteUrlPayload::Comic {
                comic_id: args.comic_id,
                new_source_url: args.new_url,
            };
            print_json(&tasks.enqueue(TaskKind::RewriteUrl, serde_json::to_value(payload)?)?)?;
        }
        QueueCommand::RewriteAll(args) => {
            let payload = RewriteUrlPayload::Domain {
                old: args.old,
                new: args.new,
            };
            print_json(&tasks.enqueue(TaskKind::RewriteUrl, serde_json::to_value(payload)?)?)?;
        }
        QueueCommand::Run(args) => {
            let queue_config = &app.config().queue;
            let summary = app
                .processor()
                .process_queue(
                    args.max_tasks.unwrap_or(queue_config.max_tasks),
                    args.max_parallelism.unwrap_or(queue_config.max_parallelism),
                )
                .context("process queue")?;
            print_json(&summary)?;
            if !summary.completed.is_empty() {
                publish(app)?;
            }
        }
        QueueCommand::List => {
            let queue = tasks.list()?;
            let malformed = queue
                .iter()
                .filter(|entry| matches!(entry, QueueEntry::Malformed(_)))
                .count();
            if malformed > 0 {
                tracing::warn!(malformed, "queue holds entries that are not valid tasks");
            }
            print_json(&queue)?;
        }
        QueueCommand::Retry => println!("reset {} failed task(s)", tasks.retry_failed()?),
        QueueCommand::ClearFailed => println!("removed {} failed task(s)", tasks.clear_failed()?),
    }
    Ok(())
}

fn sync_request(args: &SyncArgs) -> SyncRequest {
    SyncRequest::new(
        args.url.clone(),
        ChapterRange::from_options(args.start.clone(), args.end.clone()),
    )
    .overwrite(args.overwrite)
}

fn publish(app: &App) -> anyhow::Result<()> {
    let outcome = app.publish()?;
    tracing::debug!(?outcome, "publish step finished");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("render json")?;
    println!("{rendered}");
    Ok(())
}
