//! Bounded worker pool shared by file resolution and health checking
//!
//! A [`WorkerPool`] is created once per run and handed to every component that needs to fan
//! work out. The pool bounds how many items run at the same time across *all* calls made
//! against it; individual calls may narrow that further with [`WorkerPool::map_limited`].
//!
//! # Ordering
//!
//! Results are always returned in input order, regardless of the order in which the items
//! complete.
//!
//! # Error handling
//!
//! There are two variants:
//!
//! - [`WorkerPool::map`] waits for every item to settle and then surfaces the error of the
//!   first failing item (by input order)
//! - [`WorkerPool::try_map`] returns as soon as any item fails and aborts the remaining ones
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), pool::TaskError> {
//! let pool = pool::WorkerPool::new(4);
//! let lengths = pool
//!     .map(vec!["a", "bb", "ccc"], |item| async move {
//!         Ok::<_, pool::TaskError>(item.len())
//!     })
//!     .await?;
//! assert_eq!(lengths, vec![1, 2, 3]);
//! # Ok(())
//! # }
//! ```
//!
//! The pool is not reentrant: a task that calls back into the same pool while holding its
//! permit may wait forever once the pool is saturated.

use std::future::Future;
use std::sync::Arc;
use tracing::instrument;

mod semaphore;

pub use semaphore::Semaphore;

/// Failure of the worker machinery itself, as opposed to an error returned by a work item
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("worker task panicked: {0}")]
    Panicked(String),
    #[error("worker task was cancelled")]
    Cancelled,
    #[error("worker pool is shut down")]
    Closed,
}

impl From<tokio::task::JoinError> for TaskError {
    fn from(error: tokio::task::JoinError) -> Self {
        if error.is_cancelled() {
            return TaskError::Cancelled;
        }
        let payload = error.into_panic();
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            message.to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_string()
        };
        TaskError::Panicked(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    All,
    FailFast,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Semaphore,
    size: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(0)
    }
}

impl WorkerPool {
    /// Creates a pool running at most `size` items at once (0 = number of CPU cores)
    pub fn new(size: usize) -> Self {
        let size = if size == 0 { num_cpus::get() } else { size };
        tracing::debug!("worker pool size: {}", size);
        Self {
            permits: Semaphore::new(size),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of items that could start right now without waiting
    pub fn idle(&self) -> usize {
        self.permits.available()
    }

    /// Stops handing out permits; items waiting for a slot fail with [`TaskError::Closed`]
    pub fn shutdown(&self) {
        tracing::debug!("shutting down worker pool");
        self.permits.close();
    }

    pub async fn map<T, R, E, F, Fut>(&self, items: Vec<T>, work: F) -> Result<Vec<R>, E>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: From<TaskError> + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        self.run(items, 0, Settle::All, work).await
    }

    /// Like [`WorkerPool::map`] but with at most `limit` items of this call in flight
    pub async fn map_limited<T, R, E, F, Fut>(
        &self,
        limit: usize,
        items: Vec<T>,
        work: F,
    ) -> Result<Vec<R>, E>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: From<TaskError> + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        self.run(items, limit, Settle::All, work).await
    }

    pub async fn try_map<T, R, E, F, Fut>(&self, items: Vec<T>, work: F) -> Result<Vec<R>, E>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: From<TaskError> + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        self.run(items, 0, Settle::FailFast, work).await
    }

    pub async fn each<T, E, F, Fut>(&self, items: Vec<T>, work: F) -> Result<(), E>
    where
        T: Send + 'static,
        E: From<TaskError> + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.run(items, 0, Settle::All, work).await.map(|_| ())
    }

    #[instrument(skip(self, items, work), fields(items = items.len()))]
    async fn run<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        limit: usize,
        settle: Settle,
        work: F,
    ) -> Result<Vec<R>, E>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: From<TaskError> + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let total = items.len();
        let work = Arc::new(work);
        let call_permits = Semaphore::new(limit);
        let mut join_set = tokio::task::JoinSet::new();
        for (index, item) in items.into_iter().enumerate() {
            let work = work.clone();
            let pool_permits = self.permits.clone();
            let call_permits = call_permits.clone();
            join_set.spawn(async move {
                // narrower limit first so waiting items don't hold pool slots
                let _call_permit = match call_permits.acquire().await {
                    Ok(permit) => permit,
                    Err(error) => return (index, Err(E::from(error))),
                };
                let _pool_permit = match pool_permits.acquire().await {
                    Ok(permit) => permit,
                    Err(error) => return (index, Err(E::from(error))),
                };
                (index, work(item).await)
            });
        }
        let mut results: Vec<Option<R>> = (0..total).map(|_| None).collect();
        let mut first_error: Option<(usize, E)> = None;
        while let Some(joined) = join_set.join_next().await {
            let (index, result) = match joined {
                Ok(pair) => pair,
                Err(error) => (usize::MAX, Err(E::from(TaskError::from(error)))),
            };
            match result {
                Ok(value) => {
                    if let Some(slot) = results.get_mut(index) {
                        *slot = Some(value);
                    }
                }
                Err(error) => {
                    if settle == Settle::FailFast {
                        tracing::debug!("item {} failed, aborting remaining items", index);
                        join_set.abort_all();
                        return Err(error);
                    }
                    if first_error
                        .as_ref()
                        .is_none_or(|(first_index, _)| index < *first_index)
                    {
                        first_error = Some((index, error));
                    }
                }
            }
        }
        if let Some((_, error)) = first_error {
            return Err(error);
        }
        results
            .into_iter()
            .map(|value| value.ok_or_else(|| E::from(TaskError::Cancelled)))
            .collect()
    }
}
