use crate::backoff::{Backoff, DEFAULT_FACTOR};
use crate::{to_value, Error, Result, Value};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a task
pub type TaskId = Uuid;

/// Retry, scheduling and result-retention policy of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOption {
    /// Maximum number of retries after the first attempt
    pub retry_count: u32,

    /// Base unit of the retry backoff, in milliseconds
    pub retry_timeout_ms: u64,

    /// How long the backend keeps the result, in seconds
    pub result_expired_secs: u64,

    /// How often a waiting producer checks the backend, in milliseconds
    pub poll_interval_ms: u64,

    /// Skip persisting the result of a successful run
    pub ignore_result: bool,

    /// Absolute start time in epoch milliseconds; `None` runs immediately
    pub start_at: Option<i64>,
}

impl Default for TaskOption {
    fn default() -> Self {
        TaskOption {
            retry_count: 1,
            retry_timeout_ms: 1000,
            result_expired_secs: 3600,
            poll_interval_ms: 100,
            ignore_result: false,
            start_at: None,
        }
    }
}

impl TaskOption {
    pub fn new(retry_count: u32, retry_timeout: Duration) -> Self {
        TaskOption {
            retry_count,
            retry_timeout_ms: retry_timeout.as_millis() as u64,
            ..TaskOption::default()
        }
    }

    pub fn with_ignore_result(mut self, ignore: bool) -> Self {
        self.ignore_result = ignore;
        self
    }

    pub fn with_start_at(mut self, eta: DateTime<Utc>) -> Self {
        self.start_at = Some(eta.timestamp_millis());
        self
    }

    pub fn with_result_expired(mut self, ttl: Duration) -> Self {
        self.result_expired_secs = ttl.as_secs();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    pub fn result_expired(&self) -> Duration {
        Duration::from_secs(self.result_expired_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn start_at_time(&self) -> Option<DateTime<Utc>> {
        self.start_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

/// A named unit of work with positional arguments and an optional success continuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier, generated when absent on the wire
    #[serde(default = "Uuid::new_v4")]
    pub id: TaskId,

    /// Registered handler name
    pub name: String,

    /// Positional arguments, bound to the handler's parameters in order
    #[serde(default)]
    pub args: Vec<Value>,

    #[serde(default)]
    pub option: TaskOption,

    /// Continuation run with this task's return values appended to its args.
    /// Only the first element is used.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_success: Vec<Task>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    backoff: Option<Backoff>,
}

impl Task {
    /// Create a task with the default option
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Result<Self> {
        Task::with_option(TaskOption::default(), name, args)
    }

    pub fn with_option(option: TaskOption, name: impl Into<String>, args: Vec<Value>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidTask("task name must not be empty".to_string()));
        }

        let backoff = Backoff::new(option.retry_timeout(), DEFAULT_FACTOR);
        Ok(Task {
            id: Uuid::new_v4(),
            name,
            args,
            option,
            on_success: Vec::new(),
            backoff: Some(backoff),
        })
    }

    /// Create a new task builder
    pub fn builder(name: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(name)
    }

    /// Link `tasks` so each one continues into the next, returning the head.
    pub fn chain(tasks: Vec<Task>) -> Result<Task> {
        let mut iter = tasks.into_iter().rev();
        let mut next = iter
            .next()
            .ok_or_else(|| Error::InvalidTask("chain must contain at least one task".to_string()))?;
        for mut task in iter {
            task.on_success = vec![next];
            next = task;
        }
        Ok(next)
    }

    /// Last link of the chain starting at this task
    pub fn tail(&self) -> &Task {
        let mut current = self;
        while let Some(next) = current.on_success.first() {
            current = next;
        }
        current
    }

    /// Detach the continuation, if any
    pub fn take_continuation(&mut self) -> Option<Task> {
        if self.on_success.is_empty() {
            None
        } else {
            Some(self.on_success.swap_remove(0))
        }
    }

    /// Check if the task must wait for its start time
    pub fn is_delayed(&self) -> bool {
        self.option.start_at.is_some()
    }

    /// Number of retries scheduled so far
    pub fn attempts(&self) -> u32 {
        self.backoff.as_ref().map_or(0, Backoff::attempts)
    }

    /// Check if task can be retried
    pub fn can_retry(&self) -> bool {
        self.attempts() < self.option.retry_count
    }

    /// Advance the backoff and reschedule the task, returning the delay.
    pub fn schedule_retry(&mut self) -> Duration {
        let retry_timeout = self.option.retry_timeout();
        let delay = self
            .backoff
            .get_or_insert_with(|| Backoff::new(retry_timeout, DEFAULT_FACTOR))
            .next_attempt();
        let start_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        self.option.start_at = Some(start_at);
        delay
    }
}

/// Builder for creating tasks from typed arguments
pub struct TaskBuilder {
    name: String,
    args: Vec<Value>,
    option: TaskOption,
    error: Option<Error>,
}

impl TaskBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        TaskBuilder {
            name: name.into(),
            args: Vec::new(),
            option: TaskOption::default(),
            error: None,
        }
    }

    /// Append a positional argument. Conversion failures surface from [`TaskBuilder::build`].
    pub fn arg<T: Serialize + ?Sized>(mut self, arg: &T) -> Self {
        if self.error.is_none() {
            match to_value(arg) {
                Ok(value) => self.args.push(value),
                Err(e) => self.error = Some(Error::Conversion(e.at(format!("arg[{}]", self.args.len())))),
            }
        }
        self
    }

    pub fn option(mut self, option: TaskOption) -> Self {
        self.option = option;
        self
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.option.retry_count = retry_count;
        self
    }

    pub fn retry_timeout(mut self, timeout: Duration) -> Self {
        self.option.retry_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn ignore_result(mut self, ignore: bool) -> Self {
        self.option.ignore_result = ignore;
        self
    }

    pub fn start_at(mut self, eta: DateTime<Utc>) -> Self {
        self.option.start_at = Some(eta.timestamp_millis());
        self
    }

    pub fn result_expired(mut self, ttl: Duration) -> Self {
        self.option.result_expired_secs = ttl.as_secs();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.option.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn build(self) -> Result<Task> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Task::with_option(self.option, self.name, self.args)
    }
}
