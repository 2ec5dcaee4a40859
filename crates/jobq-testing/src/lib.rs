//! # jobq-testing
//!
//! In-memory `Store`/`Listener` test doubles for `jobq-core`, so the
//! coordination core (worker/pool/manager state machine) can be exercised in
//! fast, deterministic `#[tokio::test]`s without a live database. Never
//! wired into `jobq-postgres` or production code paths — application-level
//! "claimed" sets break crash-safety, so this in-memory table is an explicit
//! exception scoped to tests only.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use jobq_core::{
    DequeueHandle, Listener, ListenerError, ListenerEvent, Manager, Migrator, NewTaskRow, Store,
    StoreError, TaskRow, TaskRowUpdate,
};
use tokio::sync::broadcast;

/// An in-memory `jobq_tasks` stand-in. Cheap to clone; every clone shares the
/// same underlying table.
#[derive(Clone)]
pub struct MemoryStore {
    rows: Arc<Mutex<Vec<TaskRow>>>,
    next_id: Arc<AtomicI64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore {
            rows: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row currently visible in the table, for assertions.
    pub fn snapshot(&self) -> Vec<TaskRow> {
        self.rows.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Handle = MemoryHandle;

    async fn queue(&self, row: &NewTaskRow) -> Result<TaskRow, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let task_row = TaskRow {
            id,
            uid: row.uid,
            job_name: row.job_name.clone(),
            body: row.body.clone(),
            retries: row.retries,
            timeout: None,
            start_at: row.start_at,
        };
        self.rows.lock().unwrap().push(task_row.clone());
        Ok(task_row)
    }

    async fn dequeue(&self, job_name: &str) -> Result<Self::Handle, StoreError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap();
        let visible = |r: &TaskRow| {
            r.job_name == job_name
                && r.timeout.map(|t| t < now).unwrap_or(true)
                && r.start_at.map(|t| t < now).unwrap_or(true)
        };
        let position = rows
            .iter()
            .enumerate()
            .filter(|(_, r)| visible(r))
            .min_by_key(|(_, r)| r.id)
            .map(|(i, _)| i);

        match position {
            Some(i) => {
                let row = rows.remove(i);
                Ok(MemoryHandle {
                    store: self.clone(),
                    row,
                    requeued: None,
                    decided: false,
                })
            }
            None => Err(StoreError::EmptyQueue),
        }
    }
}

/// Owns the single row removed by [`MemoryStore::dequeue`] until committed
/// or rolled back.
pub struct MemoryHandle {
    store: MemoryStore,
    row: TaskRow,
    requeued: Option<TaskRow>,
    decided: bool,
}

#[async_trait]
impl DequeueHandle for MemoryHandle {
    fn task(&self) -> &TaskRow {
        &self.row
    }

    async fn requeue(&mut self, update: TaskRowUpdate) -> Result<(), StoreError> {
        let mut row = self.row.clone();
        row.retries = update.retries;
        row.timeout = update.timeout;
        self.requeued = Some(row);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.decided {
            return Ok(());
        }
        if let Some(row) = self.requeued.take() {
            self.store.rows.lock().unwrap().push(row);
        }
        self.decided = true;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if self.decided {
            return Ok(());
        }
        self.store.rows.lock().unwrap().push(self.row.clone());
        self.decided = true;
        Ok(())
    }
}

/// An in-memory fan-out of [`ListenerEvent`]s for tests that need to drive
/// the Manager's event loop without a real notification transport.
#[derive(Clone)]
pub struct MemoryBus {
    tx: broadcast::Sender<ListenerEvent>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        MemoryBus { tx }
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: ListenerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> MemoryListener {
        MemoryListener {
            rx: self.tx.subscribe(),
        }
    }
}

pub struct MemoryListener {
    rx: broadcast::Receiver<ListenerEvent>,
}

#[async_trait]
impl Listener for MemoryListener {
    async fn recv(&mut self) -> Result<ListenerEvent, ListenerError> {
        self.rx
            .recv()
            .await
            .map_err(|e| ListenerError::Transport(e.into()))
    }
}

/// A migrator that does nothing, for tests exercising the coordination core
/// against [`MemoryStore`], which has no schema to prepare.
pub struct NoOpMigrator;

#[async_trait]
impl Migrator for NoOpMigrator {
    async fn migrate(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Convenience alias for a [`Manager`] wired to [`MemoryStore`], for tests.
pub type MemoryManager = Manager<MemoryStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use jobq_core::{NewTaskRow, Store};
    use uuid::Uuid;

    fn new_row(job_name: &str, body: &[u8]) -> NewTaskRow {
        NewTaskRow {
            uid: Uuid::new_v4(),
            job_name: job_name.to_string(),
            body: body.to_vec(),
            retries: 5,
            start_at: None,
        }
    }

    #[tokio::test]
    async fn dequeue_returns_rows_fifo_by_id() {
        let store = MemoryStore::new();
        store.queue(&new_row("logjob", b"a")).await.unwrap();
        store.queue(&new_row("logjob", b"b")).await.unwrap();

        let mut first = store.dequeue("logjob").await.unwrap();
        assert_eq!(first.task().body, b"a");
        first.commit().await.unwrap();

        let mut second = store.dequeue("logjob").await.unwrap();
        assert_eq!(second.task().body, b"b");
        second.commit().await.unwrap();

        assert!(store.dequeue("logjob").await.is_err());
    }

    #[tokio::test]
    async fn rollback_restores_the_row() {
        let store = MemoryStore::new();
        store.queue(&new_row("logjob", b"a")).await.unwrap();

        let mut handle = store.dequeue("logjob").await.unwrap();
        handle.rollback().await.unwrap();
        assert_eq!(store.len(), 1);

        // idempotent: a second rollback is a no-op, not a double-insert.
        handle.rollback().await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn future_start_at_is_invisible() {
        let store = MemoryStore::new();
        let mut row = new_row("logjob", b"a");
        row.start_at = Some(Utc::now() + chrono::Duration::seconds(60));
        store.queue(&row).await.unwrap();

        assert!(store.dequeue("logjob").await.is_err());
    }
}
