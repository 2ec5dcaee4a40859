//! Integration test for `PgListener` against a real Postgres database: a
//! committed enqueue must fire the `jobq_task_created` trigger and the
//! listener must deliver a parsed notification for it.

use std::time::Duration;

use jobq_core::{Listener, NewTaskRow, Store};
use jobq_postgres::{default_migrations, MigrationSet, PgListener, PgMigrator, PgStore};
use sqlx::PgPool;
use uuid::Uuid;

#[sqlx::test]
async fn listener_receives_notification_for_committed_enqueue(pool: PgPool) {
    let migrator = PgMigrator::new(pool.clone(), MigrationSet::register(default_migrations()));
    jobq_core::Migrator::migrate(&migrator).await.unwrap();

    let mut listener = PgListener::connect(pool.clone()).await.unwrap();
    let store = PgStore::new(pool.clone());

    store
        .queue(&NewTaskRow {
            uid: Uuid::new_v4(),
            job_name: "notifyjob".to_string(),
            body: b"hi".to_vec(),
            retries: 5,
            start_at: None,
        })
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), listener.recv())
        .await
        .expect("no notification received in time")
        .expect("listener returned a fatal error");

    assert_eq!(event.job_name, "notifyjob");
    assert!(!event.timeout.is_valid());
    assert!(!event.start_at.is_valid());
}
