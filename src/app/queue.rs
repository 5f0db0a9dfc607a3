use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Runs blocking jobs on OS threads, at most `max_parallelism` at a time.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    permits: usize,
}

impl WorkerPool {
    pub fn new(max_parallelism: usize) -> Self {
        let permits = max_parallelism.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            permits,
        }
    }

    /// Run every job and return their results in job order. A job that panics
    /// yields `Err` with the panic message; the other jobs are unaffected.
    pub fn run_all<J, T>(&self, jobs: Vec<J>) -> anyhow::Result<Vec<Result<T, String>>>
    where
        J: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(self.permits)
            .thread_name("comichub-worker")
            .build()
            .context("build worker runtime")?;

        let total = jobs.len();
        let results = runtime.block_on(async {
            let mut set = JoinSet::new();
            for (position, job) in jobs.into_iter().enumerate() {
                let semaphore = Arc::clone(&self.semaphore);
                set.spawn(async move {
                    let result = match semaphore.acquire_owned().await {
                        Ok(_permit) => tokio::task::spawn_blocking(job)
                            .await
                            .map_err(panic_message),
                        Err(err) => Err(format!("worker pool closed: {err}")),
                    };
                    (position, result)
                });
            }

            let mut results: Vec<Option<Result<T, String>>> = (0..total).map(|_| None).collect();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((position, result)) => results[position] = Some(result),
                    Err(err) => tracing::error!(?err, "worker supervisor task failed"),
                }
            }
            results
        });

        Ok(results
            .into_iter()
            .map(|result| result.unwrap_or_else(|| Err("worker did not report".to_owned())))
            .collect())
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return format!("worker cancelled: {err}");
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned());
    format!("worker panicked: {message}")
}
