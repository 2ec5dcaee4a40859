//! The top-level orchestrator: registers jobs, runs migrations, starts
//! pools, routes listener events to the right pool, and runs the periodic
//! safety-net resume.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use crate::error::ManagerError;
use crate::listener::Listener;
use crate::pool::WorkerPool;
use crate::store::Store;
use crate::worker::{JobHandler, JobOptions};

/// Brings the backing schema up to date. Implemented concretely by
/// `jobq_postgres::Migrator`; kept abstract here so [`Manager::run`] does
/// not need to know about SQL.
#[async_trait]
pub trait Migrator: Send + Sync {
    async fn migrate(&self) -> Result<(), anyhow::Error>;
}

/// Safety-net tick: resumes every pool unconditionally, bounding reliance on
/// notifications for crash-recovered or `start_at`/`timeout`-delayed rows.
const SAFETY_NET_INTERVAL: Duration = Duration::from_secs(5);

/// Type-erased pool operations, so a [`Manager`] can hold pools for handlers
/// of different concrete types in one map.
#[async_trait]
trait AnyPool: Send + Sync {
    async fn resume_one(&self);
    async fn start(&self);
    async fn stop(&self);
}

#[async_trait]
impl<S, H> AnyPool for WorkerPool<S, H>
where
    S: Store + Clone,
    H: JobHandler + 'static,
{
    async fn resume_one(&self) {
        self.resume(1).await;
    }

    async fn start(&self) {
        WorkerPool::start(self).await;
    }

    async fn stop(&self) {
        WorkerPool::stop(self).await;
    }
}

struct StopHandle {
    tx: mpsc::Sender<oneshot::Sender<()>>,
}

/// Owns `queue_name -> pool` and drives the event loop that ties the
/// notification listener to pool resumption. Registration is only valid
/// before [`Manager::run`]; the manager enforces this with `started`.
pub struct Manager<S> {
    store: S,
    registrations: RwLock<HashMap<String, Arc<dyn AnyPool>>>,
    started: AtomicBool,
    stop: Mutex<Option<StopHandle>>,
}

impl<S> Manager<S>
where
    S: Store + Clone,
{
    pub fn new(store: S) -> Self {
        Manager {
            store,
            registrations: RwLock::new(HashMap::new()),
            started: AtomicBool::new(false),
            stop: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Registers a handler for `job_name` with the given options, scaling
    /// its pool immediately. Must be called before [`Manager::run`].
    ///
    /// ```
    /// use async_trait::async_trait;
    /// use jobq_core::{BoxError, JobHandler, JobOptions, Manager, Task};
    /// use jobq_testing::MemoryStore;
    ///
    /// struct PrintHandler;
    ///
    /// #[async_trait]
    /// impl JobHandler for PrintHandler {
    ///     async fn handle_task(&self, task: &Task) -> Result<(), BoxError> {
    ///         println!("handling task {}", task.id());
    ///         Ok(())
    ///     }
    /// }
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let manager = Manager::new(MemoryStore::new());
    /// manager
    ///     .register("logjob", PrintHandler, JobOptions::default().with_worker_pool_size(2))
    ///     .await?;
    ///
    /// // A second registration under the same queue name is rejected.
    /// assert!(manager.register("logjob", PrintHandler, JobOptions::default()).await.is_err());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// # }).unwrap();
    /// ```
    pub async fn register<H>(
        &self,
        job_name: impl Into<String>,
        handler: H,
        options: JobOptions,
    ) -> Result<(), ManagerError>
    where
        H: JobHandler + 'static,
    {
        if self.started.load(Ordering::SeqCst) {
            return Err(ManagerError::AlreadyRunning);
        }
        let job_name = job_name.into();
        crate::validation::validate_job_name(&job_name)?;
        options.validate()?;

        let mut registrations = self.registrations.write().await;
        if registrations.contains_key(&job_name) {
            return Err(ManagerError::AlreadyRegistered(job_name));
        }

        let pool = WorkerPool::new(job_name.clone(), self.store.clone(), Arc::new(handler), options.clone());
        pool.scale(options.worker_pool_size as usize).await;
        registrations.insert(job_name, Arc::new(pool));
        Ok(())
    }

    /// Runs the Migrator, starts every registered pool, then drives the
    /// event loop until [`Manager::close`] is called or the listener fails
    /// fatally.
    pub async fn run<M, L>(&self, migrator: &M, mut listener: L) -> Result<(), ManagerError>
    where
        M: Migrator,
        L: Listener + Send + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ManagerError::AlreadyRunning);
        }

        migrator.migrate().await.map_err(ManagerError::Migration)?;

        {
            let pools = self.registrations.read().await;
            for pool in pools.values() {
                pool.start().await;
            }
        }

        let (stop_tx, mut stop_rx) = mpsc::channel::<oneshot::Sender<()>>(1);
        *self.stop.lock().await = Some(StopHandle { tx: stop_tx });

        let mut safety_net = tokio::time::interval(SAFETY_NET_INTERVAL);
        safety_net.tick().await; // first tick fires immediately; consume it

        loop {
            tokio::select! {
                ack = stop_rx.recv() => {
                    self.stop_all_pools().await;
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    return Ok(());
                }
                event = listener.recv() => {
                    match event {
                        Ok(event) => {
                            let pools = self.registrations.read().await;
                            if let Some(pool) = pools.get(&event.job_name) {
                                pool.resume_one().await;
                            }
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "listener failed fatally, shutting down");
                            self.stop_all_pools().await;
                            return Err(ManagerError::Listener(err));
                        }
                    }
                }
                _ = safety_net.tick() => {
                    let pools = self.registrations.read().await;
                    for pool in pools.values() {
                        pool.resume_one().await;
                    }
                }
            }
        }
    }

    async fn stop_all_pools(&self) {
        let pools = self.registrations.read().await;
        for pool in pools.values() {
            pool.stop().await;
        }
    }

    /// Initiates graceful shutdown and waits for the event loop to
    /// acknowledge. Safe to call once; a second call is a no-op.
    pub async fn close(&self) -> Result<(), ManagerError> {
        let stop = self.stop.lock().await.take();
        if let Some(stop) = stop {
            let (ack_tx, ack_rx) = oneshot::channel();
            if stop.tx.send(ack_tx).await.is_ok() {
                let _ = ack_rx.await;
            }
        }
        Ok(())
    }
}
