//! Worker pool for cache lookups and provider requests

use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};

/// Runs fire-and-forget fetch tasks on the runtime it was created on.
///
/// With `max_workers` set, at most that many tasks make progress at once and
/// the rest wait for a permit. `close` stops intake and lets running tasks
/// finish; `abort` also abandons whatever is still running or waiting.
pub struct FetchExecutor {
    name: String,
    handle: Handle,
    permits: Option<Arc<Semaphore>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl FetchExecutor {
    /// Create a pool bound to the current tokio runtime
    pub fn new(name: impl Into<String>, max_workers: Option<usize>) -> AppResult<Self> {
        let name = name.into();
        let handle = Handle::try_current().map_err(|e| {
            AppError::internal(format!("Fetch executor '{name}' needs a tokio runtime: {e}"))
        })?;
        if max_workers == Some(0) {
            return Err(AppError::invalid_argument(
                "max_workers",
                "must be at least 1 when set",
            ));
        }

        info!(
            "Fetch executor '{}' started (workers: {})",
            name,
            max_workers.map_or_else(|| "unbounded".to_string(), |n| n.to_string())
        );

        Ok(Self {
            name,
            handle,
            permits: max_workers.map(|n| Arc::new(Semaphore::new(n))),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Schedule `task`. Returns false once the pool is closed.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_alive() {
            debug!("Fetch executor '{}' is closed; dropping task", self.name);
            return false;
        }

        let permits = self.permits.clone();
        let cancel = self.cancel.clone();
        self.tracker.spawn_on(
            async move {
                let run = async move {
                    let _permit = match permits {
                        Some(permits) => match permits.acquire_owned().await {
                            Ok(permit) => Some(permit),
                            Err(_) => return,
                        },
                        None => None,
                    };
                    task.await;
                };
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = run => {}
                }
            },
            &self.handle,
        );
        true
    }

    /// Stop accepting tasks; tasks already submitted run to completion
    pub fn close(&self) {
        if self.tracker.close() {
            info!(
                "Fetch executor '{}' closed with {} task(s) outstanding",
                self.name,
                self.tracker.len()
            );
        }
    }

    /// Stop accepting tasks and abandon the ones still outstanding
    pub fn abort(&self) {
        self.tracker.close();
        if !self.cancel.is_cancelled() {
            info!(
                "Fetch executor '{}' aborted with {} task(s) outstanding",
                self.name,
                self.tracker.len()
            );
            self.cancel.cancel();
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.tracker.is_closed() && !self.cancel.is_cancelled()
    }

    /// Tasks submitted and not yet finished
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Resolves once the pool is closed and every task has finished.
    ///
    /// The future does not borrow the executor, so it can outlive it.
    pub fn idle(&self) -> impl Future<Output = ()> + Send + use<> {
        let tracker = self.tracker.clone();
        async move { tracker.wait().await }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
