//! PostgreSQL implementation of [`jobq_core::Store`]: dequeue via
//! `DELETE ... RETURNING` under `FOR UPDATE SKIP LOCKED`, enqueue/requeue via
//! plain `INSERT`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use jobq_core::{DequeueHandle, NewTaskRow, Store, StoreError, TaskRow, TaskRowUpdate};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// `timeout`/`start_at` are `timestamp` (no time zone) columns, so the
/// `pg_notify` payload the trigger emits carries no offset — matching
/// [`jobq_core::NullTime`]'s wire format. Converting at the boundary keeps
/// `TaskRow` on `DateTime<Utc>` without forcing that convention onto SQL.
fn to_naive(t: Option<DateTime<Utc>>) -> Option<NaiveDateTime> {
    t.map(|t| t.naive_utc())
}

fn from_naive(t: Option<NaiveDateTime>) -> Option<DateTime<Utc>> {
    t.map(|t| DateTime::from_naive_utc_and_offset(t, Utc))
}

/// A `jobq_tasks`-backed [`Store`]. Cheap to clone — wraps a [`PgPool`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Enqueues `row` on any execution target implementing
    /// `sqlx::Executor` — a bare connection, a `PgPool`, or an open
    /// `Transaction`. This is the primitive a producer uses to make task
    /// creation atomic with its own business-state writes: pass the same
    /// transaction you're about to commit.
    pub async fn queue_with<'e, E>(&self, exec: E, row: &NewTaskRow) -> Result<TaskRow, StoreError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let id: i64 = sqlx::query_scalar(
            r#"
                INSERT INTO jobq_tasks (uid, job_name, body, retries, timeout, start_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id
            "#,
        )
        .bind(row.uid)
        .bind(&row.job_name)
        .bind(&row.body)
        .bind(row.retries)
        .bind(None::<NaiveDateTime>)
        .bind(to_naive(row.start_at))
        .fetch_one(exec)
        .await
        .map_err(StoreError::backend)?;

        Ok(TaskRow {
            id,
            uid: row.uid,
            job_name: row.job_name.clone(),
            body: row.body.clone(),
            retries: row.retries,
            timeout: None,
            start_at: row.start_at,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    type Handle = PgDequeueHandle;

    async fn queue(&self, row: &NewTaskRow) -> Result<TaskRow, StoreError> {
        self.queue_with(&self.pool, row).await
    }

    async fn dequeue(&self, job_name: &str) -> Result<Self::Handle, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        let row: Option<(i64, Uuid, Vec<u8>, i64, Option<NaiveDateTime>, Option<NaiveDateTime>)> =
            sqlx::query_as(
                r#"
                    DELETE FROM jobq_tasks WHERE id = (
                        SELECT id FROM jobq_tasks
                        WHERE job_name = $1
                        AND (timeout IS NULL OR timeout < NOW())
                        AND (start_at IS NULL OR start_at < NOW())
                        ORDER BY id ASC
                        FOR UPDATE SKIP LOCKED
                        LIMIT 1
                    ) RETURNING id, uid, body, retries, timeout, start_at
                "#,
            )
            .bind(job_name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::backend)?;

        let (id, uid, body, retries, timeout, start_at) = match row {
            Some(row) => row,
            None => {
                let _ = tx.rollback().await;
                return Err(StoreError::EmptyQueue);
            }
        };

        Ok(PgDequeueHandle {
            tx: Some(tx),
            row: TaskRow {
                id,
                uid,
                job_name: job_name.to_string(),
                body,
                retries,
                timeout: from_naive(timeout),
                start_at: from_naive(start_at),
            },
        })
    }
}

/// Owns the transaction opened by [`PgStore::dequeue`] until committed or
/// rolled back. `requeue` inserts the replacement row inside the same
/// transaction, ahead of the delete's commit.
pub struct PgDequeueHandle {
    tx: Option<Transaction<'static, Postgres>>,
    row: TaskRow,
}

#[async_trait]
impl DequeueHandle for PgDequeueHandle {
    fn task(&self) -> &TaskRow {
        &self.row
    }

    async fn requeue(&mut self, update: TaskRowUpdate) -> Result<(), StoreError> {
        let tx = self.tx.as_mut().ok_or(StoreError::EmptyQueue)?;
        sqlx::query(
            r#"
                INSERT INTO jobq_tasks (id, uid, job_name, body, retries, timeout, start_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(self.row.id)
        .bind(self.row.uid)
        .bind(&self.row.job_name)
        .bind(&self.row.body)
        .bind(update.retries)
        .bind(to_naive(update.timeout))
        .bind(to_naive(self.row.start_at))
        .execute(&mut **tx)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await.map_err(StoreError::backend)?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.map_err(StoreError::backend)?;
        }
        Ok(())
    }
}
