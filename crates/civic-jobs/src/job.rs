//! Job model: identifiers, queue names, job types, options and state.

use crate::error::{JobError, JobResult};
use crate::retry::BackoffPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a job ID from a string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The fixed set of named queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    /// Image classification and re-routing of submitted reports.
    ReportProcessing,
    /// Outbound e-mail / push notifications.
    Notifications,
}

impl QueueName {
    /// Every queue, in a stable order.
    pub const ALL: [QueueName; 2] = [QueueName::ReportProcessing, QueueName::Notifications];

    /// Wire name of the queue.
    pub const fn as_str(&self) -> &'static str {
        match self {
            QueueName::ReportProcessing => "report-processing",
            QueueName::Notifications => "notifications",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "report-processing" => Ok(QueueName::ReportProcessing),
            "notifications" => Ok(QueueName::Notifications),
            other => Err(JobError::Configuration(format!("Unknown queue: {}", other))),
        }
    }
}

/// Low-cardinality job label used for metric grouping.
///
/// Always sanitized: lowercase ASCII alphanumerics, `-` and `_`, at most
/// [`JobType::MAX_LEN`] characters. Missing or blank input becomes
/// [`JobType::UNKNOWN`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct JobType(String);

impl JobType {
    /// Maximum label length.
    pub const MAX_LEN: usize = 64;

    /// Label used when no job type was supplied.
    pub const UNKNOWN: &'static str = "unknown";

    /// Creates a sanitized job type.
    pub fn new(raw: &str) -> Self {
        let sanitized: String = raw
            .trim()
            .chars()
            .take(Self::MAX_LEN)
            .map(|c| {
                let c = c.to_ascii_lowercase();
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();

        if sanitized.trim_matches('-').is_empty() {
            Self::unknown()
        } else {
            Self(sanitized)
        }
    }

    /// Creates a job type from an optional label.
    pub fn from_option(raw: Option<&str>) -> Self {
        raw.map_or_else(Self::unknown, Self::new)
    }

    /// The `unknown` category.
    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    /// Returns true for the `unknown` category.
    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }

    /// Returns the label as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobType {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for JobType {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<JobType> for String {
    fn from(job_type: JobType) -> Self {
        job_type.0
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready to be claimed.
    Waiting,
    /// Claimed by a worker.
    Active,
    /// Failed and waiting for its backoff delay to elapse.
    RetryDelayed,
    /// Handler succeeded.
    Completed,
    /// Retry budget exhausted.
    FailedTerminal,
}

impl Default for JobState {
    fn default() -> Self {
        JobState::Waiting
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Waiting => write!(f, "waiting"),
            JobState::Active => write!(f, "active"),
            JobState::RetryDelayed => write!(f, "retry_delayed"),
            JobState::Completed => write!(f, "completed"),
            JobState::FailedTerminal => write!(f, "failed_terminal"),
        }
    }
}

/// Retry options fixed at enqueue time.
///
/// Serialized as `{"attempts": 3, "backoff": {"type": "fixed", "delay": 2000}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Retry budget. `0` disables dead-letter tracking for the job.
    #[serde(default)]
    pub attempts: u32,

    /// Delay policy between attempts.
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl JobOptions {
    /// Creates options with the given budget and backoff.
    pub fn new(attempts: u32, backoff: BackoffPolicy) -> Self {
        Self { attempts, backoff }
    }
}

/// Serialized job stored in the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobData {
    /// Job ID.
    pub id: JobId,

    /// Queue name.
    pub queue: QueueName,

    /// Metric label.
    pub job_type: JobType,

    /// Handler input.
    pub payload: serde_json::Value,

    /// Number of failed handler invocations so far.
    pub attempts_made: u32,

    /// Retry budget (`0` = untracked).
    pub max_attempts: u32,

    /// Delay policy between attempts.
    pub backoff: BackoffPolicy,

    /// Current state.
    pub state: JobState,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// Earliest time the job may run.
    pub due_at: DateTime<Utc>,

    /// Error from the last failed attempt.
    #[serde(default)]
    pub last_error: Option<String>,

    /// Visibility deadline while active.
    #[serde(default)]
    pub lease_until: Option<DateTime<Utc>>,

    /// Worker currently holding the job.
    #[serde(default)]
    pub worker_id: Option<String>,
}

impl JobData {
    /// Creates a waiting job.
    pub fn new(
        queue: QueueName,
        job_type: JobType,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            queue,
            job_type,
            payload,
            attempts_made: 0,
            max_attempts: options.attempts,
            backoff: options.backoff,
            state: JobState::Waiting,
            created_at: now,
            due_at: now,
            last_error: None,
            lease_until: None,
            worker_id: None,
        }
    }

    /// The options this job was enqueued with.
    pub fn options(&self) -> JobOptions {
        JobOptions::new(self.max_attempts, self.backoff)
    }

    /// Returns true if terminal failures of this job are dead-lettered.
    pub fn is_tracked(&self) -> bool {
        self.max_attempts > 0
    }

    /// Returns true once a tracked job has used its whole budget.
    pub fn is_exhausted(&self) -> bool {
        self.is_tracked() && self.attempts_made >= self.max_attempts
    }

    /// Records a failed attempt.
    pub fn record_failure(&mut self, error: &JobError) {
        self.attempts_made = self.attempts_made.saturating_add(1);
        self.last_error = Some(error.to_string());
    }

    /// Marks the job as claimed by `worker_id` until `lease_until`.
    pub fn activate(&mut self, worker_id: &str, lease_until: DateTime<Utc>) {
        self.state = JobState::Active;
        self.worker_id = Some(worker_id.to_string());
        self.lease_until = Some(lease_until);
    }

    /// Marks the job as waiting for a retry at `due_at`.
    pub fn delay_until(&mut self, due_at: DateTime<Utc>) {
        self.state = JobState::RetryDelayed;
        self.due_at = due_at;
        self.worker_id = None;
        self.lease_until = None;
    }

    /// Returns the job to the waiting state, keeping its attempt count.
    pub fn release(&mut self) {
        self.state = JobState::Waiting;
        self.worker_id = None;
        self.lease_until = None;
    }

    /// Create the handler context for one attempt.
    pub fn to_context(&self, worker_id: &str) -> JobContext {
        JobContext {
            job_id: self.id.clone(),
            queue: self.queue,
            job_type: self.job_type.clone(),
            payload: self.payload.clone(),
            attempt: self.attempts_made + 1,
            max_attempts: self.max_attempts,
            worker_id: worker_id.to_string(),
            created_at: self.created_at,
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> JobResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> JobResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Everything a handler sees for one attempt.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job ID. Stable across retries; usable as an idempotency key.
    pub job_id: JobId,

    /// Queue name.
    pub queue: QueueName,

    /// Metric label.
    pub job_type: JobType,

    /// Handler input.
    pub payload: serde_json::Value,

    /// Current attempt number (1-based).
    pub attempt: u32,

    /// Retry budget (`0` = untracked).
    pub max_attempts: u32,

    /// Worker ID processing this job.
    pub worker_id: String,

    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
}

impl JobContext {
    /// Returns true if an earlier attempt of this job already ran.
    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }

    /// Returns true if this is the last attempt of a tracked job.
    pub fn is_last_attempt(&self) -> bool {
        self.max_attempts > 0 && self.attempt >= self.max_attempts
    }

    /// Deserialize the payload into a typed value.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> JobResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}
