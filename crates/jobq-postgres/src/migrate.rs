//! Schema migrations: a `jobq_version` table tracking exactly one active
//! migration id, advanced by running registered `up`/`down` SQL in order.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

/// A single reversible schema step. `up`/`down` are plain SQL, run verbatim
/// inside the migration transaction.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub id: i64,
    pub up: &'static str,
    pub down: &'static str,
}

/// An explicitly-built, sorted list of [`Migration`]s. Unlike the source's
/// `init()`-based global registry, migrations are assembled by calling
/// [`MigrationSet::register`] with the full list up front.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    pub fn register(mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.id);
        MigrationSet { migrations }
    }

    fn find(&self, id: i64) -> Option<usize> {
        self.migrations.iter().position(|m| m.id == id)
    }
}

/// The five schema steps shipped by this crate: table, notify function,
/// trigger, then the later `uid` column and its uniqueness constraint.
pub fn default_migrations() -> Vec<Migration> {
    vec![
        Migration {
            id: 1,
            up: r#"
                CREATE TABLE IF NOT EXISTS jobq_tasks (
                    id BIGSERIAL,
                    job_name varchar(100) NOT NULL,
                    body bytea NOT NULL,
                    retries bigint NOT NULL,
                    timeout timestamp,
                    start_at timestamp,
                    PRIMARY KEY(id)
                );
            "#,
            down: r#"
                DROP TABLE IF EXISTS jobq_tasks;
            "#,
        },
        Migration {
            id: 2,
            up: r#"
                CREATE OR REPLACE FUNCTION jobq_notify_task_created() RETURNS TRIGGER AS $$
                DECLARE
                    notification jsonb;
                BEGIN
                    notification = json_build_object(
                        'job_name', NEW.job_name,
                        'timeout', NEW.timeout,
                        'start_at', NEW.start_at
                    );
                    PERFORM pg_notify('jobq_task_created', notification::text);
                    RETURN NULL;
                END;
                $$ LANGUAGE plpgsql;
            "#,
            down: r#"
                DROP FUNCTION IF EXISTS jobq_notify_task_created();
            "#,
        },
        Migration {
            id: 3,
            up: r#"
                DO $$ BEGIN
                    IF NOT EXISTS(SELECT *
                        FROM information_schema.triggers
                        WHERE event_object_table = 'jobq_tasks'
                        AND trigger_name = 'jobq_task_trigger'
                        )
                        THEN
                            CREATE TRIGGER jobq_task_trigger
                                AFTER INSERT ON jobq_tasks
                                FOR EACH ROW EXECUTE PROCEDURE jobq_notify_task_created();
                    END IF;
                END $$;
            "#,
            down: r#"
                DROP TRIGGER IF EXISTS jobq_task_trigger ON jobq_tasks;
            "#,
        },
        Migration {
            id: 4,
            up: r#"
                ALTER TABLE jobq_tasks
                ADD COLUMN IF NOT EXISTS uid uuid NOT NULL DEFAULT gen_random_uuid();
            "#,
            down: r#"
                ALTER TABLE jobq_tasks
                DROP COLUMN IF EXISTS uid;
            "#,
        },
        Migration {
            id: 5,
            up: r#"
                DO $$ BEGIN
                    IF NOT EXISTS(SELECT * FROM pg_constraint WHERE conname = 'jobq_task_uid_unique')
                        THEN
                            ALTER TABLE jobq_tasks
                            ADD CONSTRAINT jobq_task_uid_unique UNIQUE (uid);
                    END IF;
                END $$;
            "#,
            down: r#"
                ALTER TABLE jobq_tasks
                DROP CONSTRAINT IF EXISTS jobq_task_uid_unique;
            "#,
        },
    ]
}

// Every helper below takes a plain `&mut PgConnection` (rather than
// `&mut Transaction<'_, Postgres>` or a bare generic `E: Executor`) so the
// caller can reborrow the same transaction across several sequential calls.
// `sqlx::query` is used for the DDL steps rather than `sqlx::raw_sql`: mixing
// `raw_sql` with `query`/`query_scalar` against the same connection inside
// one async fn trips a known rustc/sqlx HRTB inference failure
// ("implementation of `Executor` is not general enough").

async fn setup_version_table(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            CREATE TABLE IF NOT EXISTS jobq_version (
                id bigint,
                active boolean NOT NULL,
                PRIMARY KEY(id)
            );
        "#,
    )
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        r#"
            CREATE UNIQUE INDEX IF NOT EXISTS jobq_version_unique_active
            ON jobq_version (active) WHERE (active = true);
        "#,
    )
    .execute(conn)
    .await?;
    Ok(())
}

async fn exec_raw(conn: &mut PgConnection, sql: &str) -> Result<(), sqlx::Error> {
    sqlx::query(sql).execute(conn).await?;
    Ok(())
}

async fn active_version_id(conn: &mut PgConnection) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar(r#"SELECT id FROM jobq_version WHERE active = true"#)
        .fetch_optional(conn)
        .await
}

async fn set_active(conn: &mut PgConnection, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(r#"UPDATE jobq_version SET active = false WHERE active = true"#)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        r#"
            INSERT INTO jobq_version (id, active)
            VALUES ($1, true)
            ON CONFLICT (id) DO UPDATE SET active = true
        "#,
    )
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Brings a `jobq_tasks`/`jobq_version` schema up to the highest registered
/// migration id, applying `up` (or `down`, if the active id is ahead of the
/// registered set) steps in a single transaction.
pub struct PgMigrator {
    pool: PgPool,
    migrations: MigrationSet,
}

impl PgMigrator {
    pub fn new(pool: PgPool, migrations: MigrationSet) -> Self {
        PgMigrator { pool, migrations }
    }
}

#[async_trait]
impl jobq_core::Migrator for PgMigrator {
    async fn migrate(&self) -> Result<(), anyhow::Error> {
        // Clones (cheap: `PgPool` is `Arc`-backed, `MigrationSet` is a small
        // `Vec`) so the body below borrows nothing through `self`/`&dyn
        // Migrator` — chaining generic-executor calls against a borrow
        // threaded through an async-trait boxed future is a known rustc/sqlx
        // HRTB inference failure ("implementation of `Executor`/`Send` is
        // not general enough").
        run_migrations(self.pool.clone(), self.migrations.clone()).await
    }
}

async fn run_migrations(pool: PgPool, migrations: MigrationSet) -> Result<(), anyhow::Error> {
    if migrations.migrations.is_empty() {
        return Ok(());
    }
    let max = migrations.migrations.len() - 1;

    let mut tx = pool.begin().await?;
    setup_version_table(&mut tx).await?;

    let active_id = active_version_id(&mut tx).await?;
    let start_at = match active_id {
        None => -1,
        Some(id) => migrations
            .find(id)
            .map(|i| i as i64)
            .ok_or_else(|| anyhow::anyhow!("active migration id {id} is not registered"))?,
    };
    let max = max as i64;

    if start_at == max {
        tx.rollback().await?;
        return Ok(());
    }

    if start_at > max {
        let mut at = start_at;
        while at > max {
            let migration = migrations.migrations[at as usize];
            exec_raw(&mut tx, migration.down).await?;
            at -= 1;
        }
    } else {
        for at in (start_at + 1)..=max {
            let migration = migrations.migrations[at as usize];
            exec_raw(&mut tx, migration.up).await?;
        }
    }

    let last_id = migrations.migrations[max as usize].id;
    set_active(&mut tx, last_id).await?;
    tx.commit().await?;
    Ok(())
}
