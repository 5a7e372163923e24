//! Queue and result stores.
//!
//! A [`Broker`] hands tasks from producers to workers through per-name FIFO queues, with a
//! time-ordered delayed set per name for scheduled tasks and retries. A [`Backend`] keeps
//! terminal results keyed by task name and id until they expire.

pub mod config;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use config::RedisConfig;
pub use memory::{MemoryBackend, MemoryBroker};
#[cfg(feature = "redis")]
pub use redis_store::{RedisBackend, RedisBroker};

use asq_core::{Outcome, Result, Task, TaskId, TaskResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Queue a task. Tasks with a start time go to the delayed set of their name and become
    /// ready once it has passed.
    async fn push(&self, task: &Task) -> Result<()>;

    /// Wait up to `timeout` for a ready task on any of `names`.
    ///
    /// Returns `Ok(None)` on timeout or when `cancel` fires. Due delayed tasks are moved to
    /// their ready queue atomically on every poll cycle.
    async fn poll(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        names: &[String],
    ) -> Result<Option<Task>>;
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Store a terminal result, expiring after `result.timeout`.
    async fn push(&self, result: &TaskResult) -> Result<()>;

    /// Non-blocking lookup. `Ok(None)` means not available yet.
    async fn poll(&self, id: TaskId, name: &str) -> Result<Option<Outcome>>;
}
