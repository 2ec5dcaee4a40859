//! A pool of [`Worker`]s serving a single queue: scaling, waking N paused
//! workers, start/stop.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::store::Store;
use crate::worker::{spawn_worker, JobHandler, JobOptions, WorkerHandle};

struct PoolWorker {
    handle: WorkerHandle,
    join: JoinHandle<()>,
}

/// Owns the set of workers for one queue. Pools are independent of each
/// other and share nothing mutable — binding to a queue is by name only, at
/// the [`crate::manager::Manager`] level.
pub struct WorkerPool<S, H> {
    job_name: String,
    store: S,
    handler: Arc<H>,
    options: JobOptions,
    workers: RwLock<Vec<PoolWorker>>,
    next_id: RwLock<usize>,
    resuming: RwLock<bool>,
}

impl<S, H> WorkerPool<S, H>
where
    S: Store + Clone,
    H: JobHandler + 'static,
{
    pub fn new(job_name: impl Into<String>, store: S, handler: Arc<H>, options: JobOptions) -> Self {
        WorkerPool {
            job_name: job_name.into(),
            store,
            handler,
            options,
            workers: RwLock::new(Vec::new()),
            next_id: RwLock::new(0),
            resuming: RwLock::new(false),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Grows or shrinks the worker set until it has exactly `n` workers.
    pub async fn scale(&self, n: usize) {
        loop {
            let len = self.workers.read().await.len();
            if len == n {
                return;
            }
            if len < n {
                let mut next_id = self.next_id.write().await;
                *next_id += 1;
                let id = *next_id;
                drop(next_id);
                let (handle, join) = spawn_worker(
                    id,
                    self.store.clone(),
                    self.job_name.clone(),
                    self.handler.clone(),
                    self.options.clone(),
                );
                self.workers.write().await.push(PoolWorker { handle, join });
            } else {
                let popped = self.workers.write().await.pop();
                if let Some(worker) = popped {
                    worker.handle.stop().await;
                    let _ = worker.join.await;
                }
            }
        }
    }

    /// Wakes up to `n` currently paused workers. Suppresses concurrent
    /// resume storms with a `resuming` guard, matching the source's
    /// coalesced-wakeup behavior.
    pub async fn resume(&self, mut n: usize) {
        {
            let mut resuming = self.resuming.write().await;
            if *resuming {
                return;
            }
            *resuming = true;
        }

        let workers = self.workers.read().await;
        for worker in workers.iter() {
            if n == 0 {
                break;
            }
            if !worker.handle.is_working().await {
                worker.handle.resume().await;
                n -= 1;
            }
        }
        drop(workers);

        *self.resuming.write().await = false;
    }

    /// Resumes every currently paused worker.
    pub async fn start(&self) {
        let len = self.workers.read().await.len();
        self.resume(len).await;
    }

    /// Stops every worker in the pool, waiting for each to acknowledge.
    pub async fn stop(&self) {
        let mut workers = self.workers.write().await;
        for worker in workers.drain(..) {
            worker.handle.stop().await;
            let _ = worker.join.await;
        }
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }
}
