pub mod model;
pub mod processor;
pub mod queue;
pub mod runner;
pub mod task_store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::fetch::HttpFetcher;
use crate::mirror::build_mirror;
use crate::publish::{NoopPublisher, PublishOutcome, Publisher, build_publisher};
use crate::scrape::KomikuScraper;
use crate::store::DocumentStore;
use crate::sync::Synchronizer;

use self::processor::QueueProcessor;
use self::runner::TaskRunner;
use self::task_store::TaskStore;

/// Wired-up components for one process run.
pub struct App {
    config: AppConfig,
    synchronizer: Synchronizer,
    tasks: TaskStore,
    publisher: Box<dyn Publisher>,
}

impl App {
    /// Build every component from configuration. With `publish` false the
    /// publisher is a no-op regardless of configuration.
    pub fn from_config(config: AppConfig, publish: bool) -> anyhow::Result<Self> {
        let store = document_store(&config);
        let catalog = Catalog::new(store, &config.data_dir);
        let fetcher = HttpFetcher::new(&config.http).context("build fetcher")?;
        let scraper = KomikuScraper::new().context("build scraper")?;
        let mirror = build_mirror(&config.mirror, &config.http).context("build mirror")?;
        let synchronizer = Synchronizer::new(catalog, Arc::new(fetcher), Arc::new(scraper), mirror);

        let publisher: Box<dyn Publisher> = if publish {
            build_publisher(&config.publish, &config.data_dir, config.http.retry_policy())
        } else {
            Box::new(NoopPublisher)
        };
        Ok(Self::with_parts(config, synchronizer, publisher))
    }

    pub fn with_parts(
        config: AppConfig,
        synchronizer: Synchronizer,
        publisher: Box<dyn Publisher>,
    ) -> Self {
        let tasks = TaskStore::new(
            document_store(&config),
            &config.queue_path,
            Duration::from_secs(config.queue.stale_after_secs),
        );
        Self {
            config,
            synchronizer,
            tasks,
            publisher,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        self.synchronizer.catalog()
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn processor(&self) -> QueueProcessor {
        QueueProcessor::new(self.tasks.clone(), TaskRunner::new(self.synchronizer.clone()))
    }

    pub fn publish(&self) -> anyhow::Result<PublishOutcome> {
        self.publisher.publish().context("publish")
    }
}

fn document_store(config: &AppConfig) -> DocumentStore {
    DocumentStore::new(config.lock_dir())
        .with_lock_timeout(config.lock_timeout())
        .with_backups(config.backup_on_write)
}
