//! Producer side of asq: register handlers, submit tasks and chains, wait for results and
//! start workers in process.
//!
//! ```no_run
//! # async fn demo() -> asq_core::Result<()> {
//! use asq_broker::{MemoryBackend, MemoryBroker};
//! use asq_client::App;
//! use asq_core::Task;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let app = App::new(Arc::new(MemoryBroker::new()), Arc::new(MemoryBackend::new()));
//! app.register("double", |x: i64| -> Result<i64, String> { Ok(x * 2) })?;
//!
//! let cancel = CancellationToken::new();
//! app.start_worker(cancel.clone(), 2);
//!
//! let result = app.submit_task(Task::builder("double").arg(&21).build()?).await?;
//! let (n,): (i64,) = result.get(&cancel).await?.unwrap_or_default();
//! assert_eq!(n, 42);
//! # Ok(())
//! # }
//! ```

mod async_result;

pub use async_result::AsyncResult;

use asq_broker::{Backend, Broker};
use asq_core::{IntoHandler, Result, Task};
use asq_worker::{HandlerRegistry, Worker, WorkerConfig};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A broker, a backend and the handlers workers of this process serve.
#[derive(Clone)]
pub struct App {
    broker: Arc<dyn Broker>,
    backend: Arc<dyn Backend>,
    registry: Arc<HandlerRegistry>,
}

impl App {
    pub fn new(broker: Arc<dyn Broker>, backend: Arc<dyn Backend>) -> Self {
        App {
            broker,
            backend,
            registry: Arc::new(HandlerRegistry::new()),
        }
    }

    /// Build an app on the redis broker and backend.
    #[cfg(feature = "redis")]
    pub fn from_redis(config: &asq_broker::RedisConfig) -> Result<Self> {
        let broker = asq_broker::RedisBroker::new(config)?;
        let backend = asq_broker::RedisBackend::new(config)?;
        Ok(App::new(Arc::new(broker), Arc::new(backend)))
    }

    /// Register `handler` under `name`. Fails with `AlreadyRegistered` on a duplicate name.
    pub fn register<M, H>(&self, name: impl Into<String>, handler: H) -> Result<()>
    where
        H: IntoHandler<M>,
    {
        self.registry.register(name, handler)
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Submit `tasks` as a chain: each link runs after the previous one succeeded and receives
    /// its values appended to its own arguments. The handle tracks the last link.
    pub async fn submit(&self, tasks: Vec<Task>) -> Result<AsyncResult> {
        let head = Task::chain(tasks)?;
        self.submit_task(head).await
    }

    /// Submit a single task, or a chain already linked through `on_success`.
    pub async fn submit_task(&self, task: Task) -> Result<AsyncResult> {
        let result = AsyncResult::new(self.backend.clone(), task.tail());
        self.broker.push(&task).await?;
        debug!(task_id = %task.id, task = %task.name, tail_id = %result.id(), "Task submitted");
        Ok(result)
    }

    /// A worker serving this app's handlers.
    pub fn worker(&self, config: WorkerConfig) -> Worker {
        Worker::new(
            config,
            self.broker.clone(),
            self.backend.clone(),
            self.registry.clone(),
        )
    }

    /// Spawn a worker with `concurrency` loops, running until `cancel` fires.
    pub fn start_worker(&self, cancel: CancellationToken, concurrency: usize) -> JoinHandle<()> {
        let worker = self.worker(WorkerConfig {
            concurrency,
            ..WorkerConfig::default()
        });
        tokio::spawn(async move { worker.run(cancel).await })
    }
}
