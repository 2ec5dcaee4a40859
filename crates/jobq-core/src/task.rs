//! The task data model: the canonical row, the producer-side builder
//! ([`PreparedTask`]), and the consumer-side view ([`Task`]) handed to handlers.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{BoxError, TaskError};
#[cfg(test)]
use crate::error::ValidationError;
use crate::validation;

/// Wire layout for optional timestamps: `2006-01-02T15:04:05.999999999`, no
/// timezone suffix. Deliberately not `Option<DateTime<Utc>>` directly — this
/// type makes the `null` branch an explicit, tested case rather than relying
/// on serde's default `Option` handling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullTime(Option<DateTime<Utc>>);

const TIME_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S%.9f";

impl NullTime {
    pub const NULL: NullTime = NullTime(None);

    pub fn new(time: DateTime<Utc>) -> Self {
        NullTime(Some(time))
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_some()
    }

    pub fn get(&self) -> Option<DateTime<Utc>> {
        self.0
    }
}

impl From<Option<DateTime<Utc>>> for NullTime {
    fn from(t: Option<DateTime<Utc>>) -> Self {
        NullTime(t)
    }
}

impl From<NullTime> for Option<DateTime<Utc>> {
    fn from(nt: NullTime) -> Self {
        nt.0
    }
}

impl Serialize for NullTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0 {
            Some(t) => serializer.serialize_str(&t.format(TIME_LAYOUT).to_string()),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for NullTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            None => Ok(NullTime(None)),
            Some(s) => {
                let naive = NaiveDateTime::parse_from_str(&s, TIME_LAYOUT).map_err(D::Error::custom)?;
                Ok(NullTime(Some(DateTime::from_naive_utc_and_offset(naive, Utc))))
            }
        }
    }
}

/// The canonical persisted unit of work, backend-agnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub id: i64,
    pub uid: Uuid,
    pub job_name: String,
    pub body: Vec<u8>,
    pub retries: i64,
    pub timeout: Option<DateTime<Utc>>,
    pub start_at: Option<DateTime<Utc>>,
}

/// A fresh row awaiting an `id`, used by [`crate::store::Store::queue`].
#[derive(Debug, Clone)]
pub struct NewTaskRow {
    pub uid: Uuid,
    pub job_name: String,
    pub body: Vec<u8>,
    pub retries: i64,
    pub start_at: Option<DateTime<Utc>>,
}

/// Producer side: encode a task body to bytes.
pub trait Valuer {
    fn value(&self) -> Result<Vec<u8>, BoxError>;
}

/// Consumer side: decode a task body from bytes. Kept as a separate trait
/// from [`Valuer`] since a consumer never needs to encode and a producer
/// never needs to decode.
pub trait Scanner {
    fn scan(&mut self, body: &[u8]) -> Result<(), BoxError>;
}

/// A `serde_json`-backed adapter implementing both [`Valuer`] and [`Scanner`]
/// for any serializable/deserializable payload type.
#[derive(Debug, Clone, Default)]
pub struct Json<T>(pub T);

impl<T> Valuer for Json<T>
where
    T: Serialize,
{
    fn value(&self) -> Result<Vec<u8>, BoxError> {
        serde_json::to_vec(&self.0).map_err(Into::into)
    }
}

impl<T> Scanner for Json<T>
where
    T: for<'de> Deserialize<'de>,
{
    fn scan(&mut self, body: &[u8]) -> Result<(), BoxError> {
        self.0 = serde_json::from_slice(body)?;
        Ok(())
    }
}

/// Per-enqueue-call options: initial retry budget and an optional scheduled
/// start time.
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub retries: i64,
    pub start_at: Option<DateTime<Utc>>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        DEFAULT_TASK_OPTIONS.clone()
    }
}

/// Mirrors the source's package-level `DefaultTaskOptions`.
pub static DEFAULT_TASK_OPTIONS: TaskOptions = TaskOptions {
    retries: 5,
    start_at: None,
};

impl TaskOptions {
    pub fn with_retries(mut self, retries: i64) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_start_at(mut self, start_at: DateTime<Utc>) -> Self {
        self.start_at = Some(start_at);
        self
    }
}

/// Producer-side builder. `queue(store)` (or a backend-specific
/// executor-flexible variant, see `jobq-postgres`) materializes the row.
pub struct PreparedTask {
    job_name: String,
    body: Vec<u8>,
    options: TaskOptions,
}

impl PreparedTask {
    /// Validates the queue name and encodes the body eagerly so enqueue
    /// failures surface at construction time, not at the database call.
    ///
    /// ```
    /// use jobq_core::{Json, PreparedTask, Store, TaskOptions};
    /// use jobq_testing::MemoryStore;
    /// use serde::{Deserialize, Serialize};
    ///
    /// #[derive(Serialize, Deserialize, Default)]
    /// struct LogBody {
    ///     message: String,
    /// }
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let store = MemoryStore::new();
    ///
    /// let task = PreparedTask::new(
    ///     "logjob",
    ///     &Json(LogBody { message: "hi".to_string() }),
    ///     TaskOptions::default().with_retries(3),
    /// )?;
    ///
    /// let row = store.queue(&task.to_new_row()).await?;
    /// assert_eq!(row.job_name, "logjob");
    /// assert_eq!(row.retries, 3);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// # }).unwrap();
    /// ```
    pub fn new(
        job_name: impl Into<String>,
        body: &dyn Valuer,
        options: TaskOptions,
    ) -> Result<Self, TaskError> {
        let job_name = job_name.into();
        validation::validate_job_name(&job_name)?;
        if let Some(start_at) = options.start_at {
            validation::validate_start_at(start_at, Utc::now())?;
        }
        let body = body.value().map_err(TaskError::Encode)?;
        validation::validate_task_body(&body)?;
        Ok(PreparedTask {
            job_name,
            body,
            options,
        })
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn to_new_row(&self) -> NewTaskRow {
        NewTaskRow {
            uid: Uuid::new_v4(),
            job_name: self.job_name.clone(),
            body: self.body.clone(),
            retries: self.options.retries,
            start_at: self.options.start_at,
        }
    }
}

/// Consumer-side view handed to [`crate::worker::JobHandler::handle_task`].
#[derive(Debug, Clone)]
pub struct Task {
    row: TaskRow,
    worker_id: usize,
}

impl Task {
    pub fn new(row: TaskRow, worker_id: usize) -> Self {
        Task { row, worker_id }
    }

    pub fn id(&self) -> i64 {
        self.row.id
    }

    pub fn uid(&self) -> Uuid {
        self.row.uid
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn job_name(&self) -> &str {
        &self.row.job_name
    }

    /// Hands the raw body bytes to a user-supplied decoder. May be called
    /// more than once with different scanners over the same bytes.
    pub fn scan_body(&self, body: &mut dyn Scanner) -> Result<(), BoxError> {
        body.scan(&self.row.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bytes(Vec<u8>);
    impl Valuer for Bytes {
        fn value(&self) -> Result<Vec<u8>, BoxError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn null_time_round_trips_valid_and_null() {
        let valid = NullTime::new(Utc::now());
        let encoded = serde_json::to_string(&valid).unwrap();
        let decoded: NullTime = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.is_valid());

        let null = NullTime::NULL;
        let encoded = serde_json::to_string(&null).unwrap();
        assert_eq!(encoded, "null");
        let decoded: NullTime = serde_json::from_str(&encoded).unwrap();
        assert!(!decoded.is_valid());
    }

    #[test]
    fn prepared_task_rejects_invalid_job_name() {
        let err = PreparedTask::new("A", &Bytes(b"x".to_vec()), TaskOptions::default());
        assert!(matches!(err, Err(TaskError::Validation(ValidationError::InvalidJobName(_)))));
    }

    #[test]
    fn prepared_task_rejects_empty_body() {
        let err = PreparedTask::new("logjob", &Bytes(vec![]), TaskOptions::default());
        assert!(matches!(err, Err(TaskError::Validation(ValidationError::InvalidTaskBody))));
    }

    #[test]
    fn prepared_task_generates_fresh_uid_per_row() {
        let task = PreparedTask::new("logjob", &Bytes(b"hi".to_vec()), TaskOptions::default()).unwrap();
        let a = task.to_new_row();
        let b = task.to_new_row();
        assert_ne!(a.uid, b.uid);
        assert_eq!(a.body, b"hi");
    }
}
