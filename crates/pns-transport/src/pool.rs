//! Worker pool executing delivery tasks.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::warn;

/// Executes delivery tasks; callers never wait for submitted work
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Schedule the task and return immediately
    fn submit(&self, task: BoxFuture<'static, ()>);

    /// Run the task on the caller, still counting against the pool's bound
    async fn execute_now(&self, task: BoxFuture<'static, ()>);
}

/// Pool on the tokio runtime bounding the number of tasks in flight.
///
/// Submitted tasks are spawned right away and wait for a permit inside the
/// spawned task, so `submit` never blocks.
#[derive(Clone)]
pub struct TokioWorkerPool {
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
    max_concurrent: usize,
}

impl TokioWorkerPool {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            tasks: TaskTracker::new(),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of tasks currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Wait until every submitted task has finished, including tasks still
    /// waiting for a permit. Tasks submitted meanwhile are waited for as well.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

#[async_trait]
impl WorkerPool for TokioWorkerPool {
    fn submit(&self, task: BoxFuture<'static, ()>) {
        let permits = Arc::clone(&self.permits);
        self.tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                warn!("Worker pool closed, dropping task");
                return;
            };
            task.await;
        });
    }

    async fn execute_now(&self, task: BoxFuture<'static, ()>) {
        let Ok(_permit) = self.permits.acquire().await else {
            warn!("Worker pool closed, dropping task");
            return;
        };
        task.await;
    }
}
