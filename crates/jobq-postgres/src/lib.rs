//! PostgreSQL implementation of `jobq-core`'s `Store`/`Listener`/`Migrator`
//! seams: `FOR UPDATE SKIP LOCKED` dequeue, `LISTEN`/`NOTIFY` notifications,
//! and a small forward-only migrator for the `jobq_tasks`/`jobq_version`
//! schema.

pub mod listener;
pub mod migrate;
pub mod store;

pub use listener::PgListener;
pub use migrate::{default_migrations, Migration, MigrationSet, PgMigrator};
pub use store::{PgDequeueHandle, PgStore};
