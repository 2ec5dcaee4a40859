//! The per-queue worker: claim one task, run the handler under a deadline,
//! commit or requeue. See [`crate::pool::WorkerPool`] for the set of workers
//! serving one queue and [`crate::manager::Manager`] for the orchestrator
//! that wakes them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

use crate::error::{BoxError, WorkError};
use crate::store::{DequeueHandle, Store, TaskRowUpdate};
use crate::task::{Task, TaskRow};
use crate::validation;

/// A user-supplied handler invoked once per dequeued task. Returning `Err`
/// triggers a requeue when [`JobOptions::requeuing`] is set; returning `Ok`
/// commits the dequeue (the row is gone for good).
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle_task(&self, task: &Task) -> Result<(), BoxError>;
}

/// Per-queue options governing a [`crate::pool::WorkerPool`] and every
/// [`Worker`] inside it.
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub worker_pool_size: i64,
    pub requeuing: bool,
    pub retries: i64,
    pub timeout_enabled: bool,
    pub timeout: Duration,
    pub ttl: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        JobOptions {
            worker_pool_size: 1,
            requeuing: true,
            retries: 5,
            timeout_enabled: true,
            timeout: Duration::from_secs(5),
            ttl: Duration::from_secs(5),
        }
    }
}

impl JobOptions {
    pub fn validate(&self) -> Result<(), crate::error::ValidationError> {
        validation::validate_pool_size(self.worker_pool_size)?;
        validation::validate_retries(self.retries)?;
        if self.timeout_enabled {
            validation::validate_timeout(self.timeout)?;
        }
        validation::validate_timeout(self.ttl)?;
        Ok(())
    }

    pub fn with_worker_pool_size(mut self, size: i64) -> Self {
        self.worker_pool_size = size;
        self
    }

    pub fn with_requeuing(mut self, requeuing: bool) -> Self {
        self.requeuing = requeuing;
        self
    }

    pub fn with_retries(mut self, retries: i64) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_enabled = true;
        self.timeout = timeout;
        self
    }

    pub fn with_timeout_disabled(mut self) -> Self {
        self.timeout_enabled = false;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Debounce after an empty dequeue, to avoid a thundering herd of workers
/// immediately re-polling the same empty queue.
const EMPTY_QUEUE_DEBOUNCE: Duration = Duration::from_millis(100);
/// Backoff after a transient error or a canceled handler.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

enum Command {
    Resume(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

/// The control surface for a spawned worker: `resume`/`pause`/`stop` perform
/// a synchronous handshake with the run loop, mirroring the source's
/// `runch`/`okch`/`stopch` three-channel protocol (kept as three distinct
/// acknowledged requests rather than collapsed into a single enum, since the
/// handshake itself — not just the request — is part of the contract
/// `WorkerPool::resume` relies on).
#[derive(Clone)]
pub struct WorkerHandle {
    id: usize,
    working: Arc<RwLock<bool>>,
    cmd_tx: mpsc::Sender<Command>,
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub async fn is_working(&self) -> bool {
        *self.working.read().await
    }

    /// Wakes the worker and waits for it to acknowledge before returning.
    pub async fn resume(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Resume(ack_tx)).await.is_err() {
            return; // run loop already exited
        }
        let _ = ack_rx.await;
    }

    /// Marks the worker paused without waiting for it to observe the change.
    pub async fn pause(&self) {
        *self.working.write().await = false;
    }

    /// Pauses, then asks the run loop to exit and waits for acknowledgment.
    /// A worker mid-handler finishes its current task before observing this.
    pub async fn stop(&self) {
        self.pause().await;
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stop(ack_tx)).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }
}

/// Spawns a worker's run loop on its own task and returns the control handle
/// plus the loop's `JoinHandle`.
pub fn spawn_worker<S, H>(
    id: usize,
    store: S,
    job_name: String,
    handler: Arc<H>,
    options: JobOptions,
) -> (WorkerHandle, JoinHandle<()>)
where
    S: Store + Clone,
    H: JobHandler + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(1);
    let working = Arc::new(RwLock::new(false));

    let run_loop = WorkerLoop {
        id,
        store,
        job_name,
        handler,
        options,
        working: working.clone(),
        cmd_rx,
    };

    let join = tokio::spawn(run_loop.run());
    let handle = WorkerHandle {
        id,
        working,
        cmd_tx,
    };
    (handle, join)
}

struct WorkerLoop<S, H> {
    id: usize,
    store: S,
    job_name: String,
    handler: Arc<H>,
    options: JobOptions,
    working: Arc<RwLock<bool>>,
    cmd_rx: mpsc::Receiver<Command>,
}

impl<S, H> WorkerLoop<S, H>
where
    S: Store,
    H: JobHandler + 'static,
{
    async fn run(mut self) {
        loop {
            if !*self.working.read().await {
                match self.cmd_rx.recv().await {
                    Some(Command::Resume(ack)) => {
                        *self.working.write().await = true;
                        let _ = ack.send(());
                    }
                    Some(Command::Stop(ack)) => {
                        let _ = ack.send(());
                        return;
                    }
                    None => return,
                }
                continue;
            }

            match self.work().await {
                Ok(()) => {}
                Err(WorkError::EmptyQueue) => {
                    *self.working.write().await = false;
                    tokio::time::sleep(EMPTY_QUEUE_DEBOUNCE).await;
                }
                Err(WorkError::Canceled) => {
                    tracing::warn!(worker_id = self.id, job_name = %self.job_name, "handler exceeded ttl");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
                Err(e) => {
                    tracing::error!(worker_id = self.id, job_name = %self.job_name, error = %e, "unhandled work error");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    #[tracing::instrument(skip(self), fields(worker_id = self.id, job_name = %self.job_name))]
    async fn work(&self) -> Result<(), WorkError> {
        let mut handle = match self.store.dequeue(&self.job_name).await {
            Ok(handle) => handle,
            Err(crate::error::StoreError::EmptyQueue) => return Err(WorkError::EmptyQueue),
            Err(e) => return Err(WorkError::Store(e)),
        };

        let outcome = self.run_handler(handle.task()).await;
        self.finish(&mut handle, outcome).await
    }

    async fn run_handler(&self, row: &TaskRow) -> HandlerOutcome {
        let task = Task::new(row.clone(), self.id);
        match tokio::time::timeout(self.options.ttl, self.handler.handle_task(&task)).await {
            Ok(Ok(())) => HandlerOutcome::Success,
            Ok(Err(err)) => {
                tracing::debug!(task_id = row.id, error = %err, "handler returned an error");
                HandlerOutcome::Failed
            }
            Err(_elapsed) => HandlerOutcome::Canceled,
        }
    }

    async fn finish(
        &self,
        handle: &mut S::Handle,
        outcome: HandlerOutcome,
    ) -> Result<(), WorkError> {
        let failed = matches!(outcome, HandlerOutcome::Failed | HandlerOutcome::Canceled);
        if failed && self.options.requeuing {
            let update = compute_requeue_update(handle.task(), &self.options);
            if let Err(e) = handle.requeue(update).await {
                let _ = handle.rollback().await;
                return Err(WorkError::Store(e));
            }
        }

        if let Err(e) = handle.commit().await {
            let _ = handle.rollback().await;
            return Err(WorkError::Store(e));
        }

        match outcome {
            HandlerOutcome::Canceled => Err(WorkError::Canceled),
            _ => Ok(()),
        }
    }
}

enum HandlerOutcome {
    Success,
    Failed,
    Canceled,
}

/// The retry/back-off policy applied to a row whose handler failed or timed
/// out: decrement the remaining retries, or — once exhausted — reset them
/// and park the row behind `now + timeout`.
fn compute_requeue_update(row: &TaskRow, options: &JobOptions) -> TaskRowUpdate {
    if row.retries > 0 {
        TaskRowUpdate {
            retries: row.retries - 1,
            timeout: row.timeout,
        }
    } else {
        let timeout = if options.timeout_enabled {
            chrono::Duration::from_std(options.timeout)
                .ok()
                .map(|d| Utc::now() + d)
        } else {
            None
        };
        TaskRowUpdate {
            retries: options.retries,
            timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requeue_decrements_retries_while_positive() {
        let row = TaskRow {
            id: 1,
            uid: uuid::Uuid::new_v4(),
            job_name: "logjob".into(),
            body: b"hi".to_vec(),
            retries: 3,
            timeout: None,
            start_at: None,
        };
        let opts = JobOptions::default();
        let update = compute_requeue_update(&row, &opts);
        assert_eq!(update.retries, 2);
        assert_eq!(update.timeout, None);
    }

    #[test]
    fn requeue_resets_and_parks_on_exhaustion() {
        let row = TaskRow {
            id: 1,
            uid: uuid::Uuid::new_v4(),
            job_name: "logjob".into(),
            body: b"hi".to_vec(),
            retries: 0,
            timeout: None,
            start_at: None,
        };
        let opts = JobOptions::default().with_retries(5).with_timeout(Duration::from_secs(5));
        let update = compute_requeue_update(&row, &opts);
        assert_eq!(update.retries, 5);
        assert!(update.timeout.unwrap() > Utc::now());
    }

    #[test]
    fn requeue_skips_timeout_when_disabled() {
        let row = TaskRow {
            id: 1,
            uid: uuid::Uuid::new_v4(),
            job_name: "logjob".into(),
            body: b"hi".to_vec(),
            retries: 0,
            timeout: None,
            start_at: None,
        };
        let opts = JobOptions::default().with_timeout_disabled();
        let update = compute_requeue_update(&row, &opts);
        assert_eq!(update.timeout, None);
    }

    #[test]
    fn job_options_validate_rejects_bad_pool_size() {
        let opts = JobOptions::default().with_worker_pool_size(0);
        assert!(opts.validate().is_err());
    }
}
