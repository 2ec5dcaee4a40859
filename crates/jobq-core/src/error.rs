use std::time::Duration;

/// An opaque error boxed from user code: handlers, [`crate::task::Valuer`]s, and
/// [`crate::task::Scanner`]s are arbitrary callers, so their errors cross the
/// trait seam as `Box<dyn Error>` rather than a typed variant.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while validating queue names, job options, or task options.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid job name {0:?}: must match ^[a-z0-9][a-z0-9_]{{1,48}}[a-z0-9]$")]
    InvalidJobName(String),
    #[error("retries must be >= 0, got {0}")]
    InvalidRetries(i64),
    #[error("worker pool size must be > 0, got {0}")]
    InvalidPoolSize(i64),
    #[error("timeout must be higher than 0, got {0:?}")]
    InvalidTimeout(Duration),
    #[error("start_at must be in the future")]
    InvalidStartTime,
    #[error("task body must not be empty")]
    InvalidTaskBody,
}

/// Errors raised while preparing a task for enqueue.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to encode task body")]
    Encode(#[source] BoxError),
}

/// Errors from a [`crate::store::Store`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No dequeueable row exists for the queue. Not surfaced to users; consumed
    /// internally by [`crate::worker::Worker`] to trigger a pause.
    #[error("queue is empty")]
    EmptyQueue,
    #[error("store backend error")]
    Backend(#[source] anyhow::Error),
}

impl StoreError {
    pub fn backend(err: impl Into<anyhow::Error>) -> Self {
        StoreError::Backend(err.into())
    }
}

/// The outcome of a single [`crate::worker::Worker::work`] iteration.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("queue is empty")]
    EmptyQueue,
    #[error("handler exceeded its time-to-live")]
    Canceled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by a [`crate::listener::Listener`].
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("notification transport error")]
    Transport(#[source] anyhow::Error),
    #[error("listener event channel closed")]
    Closed,
}

/// Errors raised by the [`crate::manager::Manager`].
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("job {0:?} is already registered")]
    AlreadyRegistered(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("manager is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("migration failed")]
    Migration(#[source] anyhow::Error),
    #[error("store setup failed")]
    Store(#[source] anyhow::Error),
}
