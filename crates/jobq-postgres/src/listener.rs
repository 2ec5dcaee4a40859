//! PostgreSQL implementation of [`jobq_core::Listener`]: a long-lived
//! `LISTEN jobq_task_created` connection, self-healing on reconnect, that
//! forwards parsed payloads onto an internal channel.

use std::time::Duration;

use async_trait::async_trait;
use jobq_core::{ListenerConfig, ListenerError, ListenerEvent};
use serde::Deserialize;
use sqlx::postgres::PgListener as SqlxPgListener;
use sqlx::{Executor, PgPool};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const NOTIFY_CHANNEL: &str = "jobq_task_created";

/// Doubles `min_reconnect_interval` on each consecutive failure, capped at
/// `max_reconnect_interval`, and resets once a connection succeeds.
struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(config: &ListenerConfig) -> Self {
        Backoff {
            min: config.min_reconnect_interval,
            max: config.max_reconnect_interval,
            current: config.min_reconnect_interval,
        }
    }

    fn reset(&mut self) {
        self.current = self.min;
    }

    async fn wait_and_grow(&mut self) {
        tokio::time::sleep(self.current).await;
        self.current = (self.current * 2).min(self.max);
    }
}

#[derive(Debug, Deserialize)]
struct Payload {
    job_name: String,
    timeout: Option<String>,
    start_at: Option<String>,
}

fn parse_payload(raw: &str) -> Result<ListenerEvent, serde_json::Error> {
    let payload: Payload = serde_json::from_str(raw)?;
    Ok(ListenerEvent {
        job_name: payload.job_name,
        timeout: parse_null_time(payload.timeout),
        start_at: parse_null_time(payload.start_at),
    })
}

fn parse_null_time(raw: Option<String>) -> jobq_core::task::NullTime {
    match raw {
        None => jobq_core::task::NullTime::NULL,
        Some(s) => serde_json::from_value(serde_json::Value::String(s))
            .unwrap_or(jobq_core::task::NullTime::NULL),
    }
}

/// Subscribes to `jobq_task_created`, forwarding every parsed notification
/// onto a bounded channel consumed via [`jobq_core::Listener::recv`].
/// Transport failures and malformed payloads are handled internally — only
/// channel closure (this listener was dropped) ends the background task.
pub struct PgListener {
    rx: mpsc::Receiver<ListenerEvent>,
    task: JoinHandle<()>,
}

impl PgListener {
    /// Connects immediately so construction fails fast on an unreachable
    /// database; reconnects transparently afterward.
    pub async fn connect(pool: PgPool) -> Result<Self, ListenerError> {
        Self::connect_with_config(pool, ListenerConfig::default()).await
    }

    /// Like [`connect`](Self::connect), with explicit reconnect backoff
    /// bounds and keepalive interval.
    pub async fn connect_with_config(pool: PgPool, config: ListenerConfig) -> Result<Self, ListenerError> {
        let listener = connect_and_listen(&pool)
            .await
            .map_err(ListenerError::Transport)?;

        // Bounded at 1: the closest approximation to a rendezvous channel
        // tokio's mpsc supports (it refuses capacity 0). A slow consumer
        // stalls the background task's next recv, never silently drops a
        // notification.
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(run(pool, Some(listener), tx, config));
        Ok(PgListener { rx, task })
    }
}

impl Drop for PgListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl jobq_core::Listener for PgListener {
    async fn recv(&mut self) -> Result<ListenerEvent, ListenerError> {
        self.rx.recv().await.ok_or(ListenerError::Closed)
    }
}

async fn connect_and_listen(pool: &PgPool) -> Result<SqlxPgListener, anyhow::Error> {
    let mut listener = SqlxPgListener::connect_with(pool).await?;
    listener.listen(NOTIFY_CHANNEL).await?;
    Ok(listener)
}

async fn run(
    pool: PgPool,
    mut listener: Option<SqlxPgListener>,
    tx: mpsc::Sender<ListenerEvent>,
    config: ListenerConfig,
) {
    let mut backoff = Backoff::new(&config);
    let mut keepalive = tokio::time::interval(config.keepalive_interval);
    keepalive.tick().await; // first tick fires immediately; consume it

    loop {
        if listener.is_none() {
            match connect_and_listen(&pool).await {
                Ok(l) => {
                    listener = Some(l);
                    backoff.reset();
                }
                Err(err) => {
                    tracing::warn!(error = %err, "jobq listener reconnect failed, retrying");
                    backoff.wait_and_grow().await;
                    continue;
                }
            }
        }

        tokio::select! {
            notification = listener.as_mut().unwrap().try_recv() => match notification {
                Ok(Some(notify)) => match parse_payload(notify.payload()) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            return; // receiver dropped: PgListener was dropped
                        }
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, payload = notify.payload(), "dropping malformed jobq notification");
                    }
                },
                Ok(None) => {
                    listener = None;
                    backoff.wait_and_grow().await;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "jobq listener transport error, reconnecting");
                    listener = None;
                    backoff.wait_and_grow().await;
                }
            },
            _ = keepalive.tick() => {
                if let Err(err) = pool.execute("SELECT 1").await {
                    tracing::warn!(error = %err, "jobq listener keepalive probe failed, reconnecting");
                    listener = None;
                }
            }
        }
    }
}
