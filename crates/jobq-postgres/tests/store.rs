//! Integration tests against a real Postgres database (via `#[sqlx::test]`,
//! a fresh ephemeral database per test) covering the surface the in-memory
//! double in `jobq-testing` cannot: the literal `SKIP LOCKED` dequeue SQL,
//! requeue's id/uid preservation, and migration idempotency.

use std::collections::HashSet;
use std::sync::Arc;

use jobq_core::{DequeueHandle, NewTaskRow, Store, TaskRowUpdate};
use jobq_postgres::{default_migrations, MigrationSet, PgMigrator, PgStore};
use sqlx::PgPool;
use uuid::Uuid;

async fn migrate(pool: &PgPool) {
    let migrator = PgMigrator::new(pool.clone(), MigrationSet::register(default_migrations()));
    jobq_core::Migrator::migrate(&migrator).await.unwrap();
}

fn new_row(job_name: &str, body: &[u8]) -> NewTaskRow {
    NewTaskRow {
        uid: Uuid::new_v4(),
        job_name: job_name.to_string(),
        body: body.to_vec(),
        retries: 5,
        start_at: None,
    }
}

#[sqlx::test]
async fn migrate_is_idempotent_on_rerun(pool: PgPool) {
    migrate(&pool).await;

    let version_before: i64 = sqlx::query_scalar("SELECT id FROM jobq_version WHERE active = true")
        .fetch_one(&pool)
        .await
        .unwrap();

    // Second run against an already-migrated database must be a no-op: no
    // error, and the active version row is unchanged.
    migrate(&pool).await;

    let version_after: i64 = sqlx::query_scalar("SELECT id FROM jobq_version WHERE active = true")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(version_before, version_after);

    let active_rows: i64 = sqlx::query_scalar("SELECT count(*) FROM jobq_version WHERE active = true")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(active_rows, 1, "exactly one active jobq_version row");
}

#[sqlx::test]
async fn requeue_preserves_id_and_uid(pool: PgPool) {
    migrate(&pool).await;
    let store = PgStore::new(pool.clone());

    let queued = store.queue(&new_row("retryjob", b"payload")).await.unwrap();

    let mut handle = store.dequeue("retryjob").await.unwrap();
    assert_eq!(handle.task().id, queued.id);
    assert_eq!(handle.task().uid, queued.uid);

    handle
        .requeue(TaskRowUpdate {
            retries: 2,
            timeout: None,
        })
        .await
        .unwrap();
    handle.commit().await.unwrap();

    let row: (i64, Uuid, i64) =
        sqlx::query_as("SELECT id, uid, retries FROM jobq_tasks WHERE job_name = 'retryjob'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(row.0, queued.id, "requeue must preserve the original id");
    assert_eq!(row.1, queued.uid, "requeue must preserve the original uid");
    assert_eq!(row.2, 2);
}

#[sqlx::test]
async fn concurrent_dequeue_skip_locked_claims_each_row_exactly_once(pool: PgPool) {
    const ROWS: usize = 20;
    const WORKERS: usize = 8;

    migrate(&pool).await;
    let store = Arc::new(PgStore::new(pool.clone()));

    let mut seeded = HashSet::new();
    for i in 0..ROWS {
        let row = store.queue(&new_row("bulkjob", format!("{i}").as_bytes())).await.unwrap();
        seeded.insert(row.id);
    }

    // More concurrent claimants than rows: the tail workers must see
    // EmptyQueue rather than a duplicate or blocked row, proving SKIP
    // LOCKED lets each worker's transaction proceed independently.
    let mut tasks = Vec::new();
    for _ in 0..WORKERS {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            loop {
                match store.dequeue("bulkjob").await {
                    Ok(mut handle) => {
                        claimed.push(handle.task().id);
                        handle.commit().await.unwrap();
                    }
                    Err(jobq_core::StoreError::EmptyQueue) => break,
                    Err(e) => panic!("unexpected store error: {e}"),
                }
            }
            claimed
        }));
    }

    let mut claimed_ids = Vec::new();
    for task in tasks {
        claimed_ids.extend(task.await.unwrap());
    }

    assert_eq!(claimed_ids.len(), ROWS, "every seeded row must be claimed exactly once");
    let claimed_set: HashSet<i64> = claimed_ids.iter().copied().collect();
    assert_eq!(claimed_set.len(), ROWS, "no row may be claimed twice");
    assert_eq!(claimed_set, seeded);

    let remaining: i64 = sqlx::query_scalar("SELECT count(*) FROM jobq_tasks WHERE job_name = 'bulkjob'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}
