//! # jobq-core
//!
//! Database-agnostic coordination core for a transactional job queue:
//! producers enqueue tasks atomically with their own business-state writes,
//! workers dequeue one task at a time under a database transaction, execute
//! a handler, and either commit or requeue with back-off.
//!
//! This crate defines the data model ([`task`]), the transactional
//! dequeue/enqueue seam ([`store`]), the notification event seam
//! ([`listener`]), and the coordination state machine that ties them
//! together: [`worker`], [`pool`], [`manager`].
//!
//! All in-flight coordination on task rows is delegated to the backing
//! database via `SELECT ... FOR UPDATE SKIP LOCKED`; this crate adds no
//! application-level "claimed" set or in-memory queue on top of it. A
//! concrete PostgreSQL backend lives in `jobq-postgres`; an in-memory
//! `Store`/`Listener` pair for exercising this crate's state machine without
//! a database lives in `jobq-testing`.

pub mod error;
pub mod listener;
pub mod manager;
pub mod pool;
pub mod store;
pub mod task;
pub mod validation;
pub mod worker;

pub use error::{BoxError, ListenerError, ManagerError, StoreError, TaskError, ValidationError, WorkError};
pub use listener::{Listener, ListenerConfig, ListenerEvent};
pub use manager::{Manager, Migrator};
pub use pool::WorkerPool;
pub use store::{DequeueHandle, Store, TaskRowUpdate};
pub use task::{Json, NewTaskRow, NullTime, PreparedTask, Scanner, Task, TaskOptions, TaskRow, Valuer};
pub use worker::{JobHandler, JobOptions};

pub use async_trait::async_trait;
