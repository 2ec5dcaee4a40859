//! The transactional dequeue/enqueue/requeue seam. Concrete backends (see
//! `jobq-postgres`) implement [`Store`] and [`DequeueHandle`]; this crate
//! knows nothing about SQL or connection pools.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::task::{NewTaskRow, TaskRow};

/// Update applied to a dequeued row before it is re-inserted under the same
/// `id`/`uid` ([`DequeueHandle::requeue`]).
#[derive(Debug, Clone)]
pub struct TaskRowUpdate {
    pub retries: i64,
    pub timeout: Option<DateTime<Utc>>,
}

/// Transactional dequeue/enqueue primitives with row-level locking.
///
/// `Handle` is an associated type rather than a trait object so that
/// `requeue`/`commit`/`rollback` can be called without boxing the future at
/// every call site; implementations are expected to be `Clone` and cheap to
/// share across workers (e.g. wrapping a `sqlx::PgPool`).
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Handle: DequeueHandle + Send + 'static;

    /// Inserts a fresh row via the store's own connection pool. Commits
    /// immediately; callers who need enqueue to be atomic with other writes
    /// should use the backend-specific executor-flexible variant instead
    /// (see `jobq_postgres::PgStore::queue_with`).
    async fn queue(&self, row: &NewTaskRow) -> Result<TaskRow, StoreError>;

    /// Claims the oldest visible row for `job_name` inside a fresh
    /// transaction. Fails with [`StoreError::EmptyQueue`] when no row is
    /// currently dequeueable; any other database error is also a
    /// `StoreError`, and in both cases the transaction is rolled back before
    /// this returns.
    async fn dequeue(&self, job_name: &str) -> Result<Self::Handle, StoreError>;
}

/// Owns the transaction opened by [`Store::dequeue`]. Exactly one of
/// [`commit`](DequeueHandle::commit)/[`rollback`](DequeueHandle::rollback)
/// decides the transaction; both are idempotent so callers (and RAII
/// cleanup paths) can call `rollback` unconditionally after an early return
/// without double-deciding an already-committed handle.
#[async_trait]
pub trait DequeueHandle: Send {
    /// The row claimed by the dequeue that opened this handle.
    fn task(&self) -> &TaskRow;

    /// Re-inserts the claimed row under the same `id`/`uid` with an updated
    /// retry/timeout, inside the same transaction that deleted it. Valid
    /// only before the handle is committed or rolled back.
    async fn requeue(&mut self, update: TaskRowUpdate) -> Result<(), StoreError>;

    /// Commits the transaction, permanently removing the original row
    /// (unless [`requeue`](DequeueHandle::requeue) re-inserted it first).
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Rolls back the transaction, leaving the original row intact. Safe to
    /// call after `commit` (a no-op in that case) and safe to call more than
    /// once.
    async fn rollback(&mut self) -> Result<(), StoreError>;
}
