//! The notification event model and the trait seam a concrete transport
//! (e.g. `jobq_postgres::PgListener`) implements.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ListenerError;
use crate::task::NullTime;

/// Parsed `jobq_task_created` payload. Every field is advisory: the Manager
/// treats an event as "something may be ready on this queue", never as
/// ground truth (a stale or malformed event just triggers a wasted dequeue
/// attempt that finds nothing).
#[derive(Debug, Clone)]
pub struct ListenerEvent {
    pub job_name: String,
    pub timeout: NullTime,
    pub start_at: NullTime,
}

/// Configuration for a notification transport's reconnect/liveness behavior.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub min_reconnect_interval: Duration,
    pub max_reconnect_interval: Duration,
    pub keepalive_interval: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            min_reconnect_interval: Duration::from_secs(10),
            max_reconnect_interval: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(60),
        }
    }
}

/// A self-healing stream of [`ListenerEvent`]s. Implementations are expected
/// to reconnect internally on transport failure (sleeping briefly between
/// attempts) so that `recv` only ever returns `Err` for a genuinely fatal,
/// non-recoverable condition — at which point the Manager initiates
/// shutdown.
#[async_trait]
pub trait Listener: Send {
    async fn recv(&mut self) -> Result<ListenerEvent, ListenerError>;
}
