//! # logjob
//!
//! A minimal producer/consumer demo for the `jobq` coordination core: one
//! job type (`logjob`) whose handler prints its body, registered against a
//! real PostgreSQL database.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use jobq_core::{JobHandler, JobOptions, Json, Manager, PreparedTask, Store, Task, TaskOptions};
use jobq_postgres::{default_migrations, MigrationSet, PgListener, PgMigrator, PgStore};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
struct LogMessage {
    message: String,
}

struct LogHandler;

#[async_trait]
impl JobHandler for LogHandler {
    async fn handle_task(&self, task: &Task) -> Result<(), jobq_core::BoxError> {
        let mut body = Json(LogMessage::default());
        task.scan_body(&mut body)?;
        tracing::info!(task_id = task.id(), message = %body.0.message, "logjob handled");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .context("failed to connect to postgres")?;

    let store = PgStore::new(pool.clone());
    let migrator = PgMigrator::new(pool.clone(), MigrationSet::register(default_migrations()));
    let listener = PgListener::connect(pool.clone()).await?;

    let manager = Manager::new(store.clone());
    manager
        .register(
            "logjob",
            LogHandler,
            JobOptions::default().with_worker_pool_size(4).with_timeout(Duration::from_secs(10)),
        )
        .await?;

    let task = PreparedTask::new(
        "logjob",
        &Json(LogMessage {
            message: "hello from logjob".to_string(),
        }),
        TaskOptions::default(),
    )?;
    store.queue(&task.to_new_row()).await?;

    tracing::info!("starting manager, press ctrl-c to stop");
    let manager = Arc::new(manager);
    let shutdown_manager = manager.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_manager.close().await;
    });

    manager.run(&migrator, listener).await?;
    Ok(())
}
