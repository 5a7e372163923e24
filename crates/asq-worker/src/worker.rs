use crate::{config::WorkerConfig, executor::TaskExecutor, handler::HandlerRegistry};
use asq_broker::{Backend, Broker};
use asq_core::{Error, Result, Task, TaskResult, Value};

use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Worker process that polls the broker and executes tasks
#[derive(Clone)]
pub struct Worker {
    config: WorkerConfig,
    worker_id: String,
    broker: Arc<dyn Broker>,
    backend: Arc<dyn Backend>,
    registry: Arc<HandlerRegistry>,
    executor: TaskExecutor,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        broker: Arc<dyn Broker>,
        backend: Arc<dyn Backend>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        let worker_id = config.generate_worker_id();
        let executor = TaskExecutor::new(registry.clone());

        Worker {
            config,
            worker_id,
            broker,
            backend,
            registry,
            executor,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run `concurrency` poll loops until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let concurrency = self.config.concurrency.max(1);
        info!(
            worker_id = %self.worker_id,
            concurrency,
            handlers = ?self.registry.names(),
            "Worker started"
        );

        let mut loops = JoinSet::new();
        for index in 0..concurrency {
            let worker = self.clone();
            let cancel = cancel.clone();
            loops.spawn(async move { worker.poll_loop(index, cancel).await });
        }

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!(worker_id = %self.worker_id, error = %e, "Worker loop aborted");
            }
        }

        info!(worker_id = %self.worker_id, "Worker stopped");
    }

    async fn poll_loop(&self, index: usize, cancel: CancellationToken) {
        debug!(worker_id = %self.worker_id, index, "Poll loop started");

        while !cancel.is_cancelled() {
            let names = self.queue_names();
            match self.broker.poll(&cancel, self.config.poll_timeout(), &names).await {
                Ok(Some(task)) => {
                    let task_id = task.id;
                    let name = task.name.clone();
                    if let Err(e) = self.execute(task).await {
                        error!(task_id = %task_id, task = %name, error = %e, "Failed to settle task");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "Broker poll failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_error_pause()) => {}
                    }
                }
            }
        }

        debug!(worker_id = %self.worker_id, index, "Poll loop stopped");
    }

    /// Names to poll, re-read every cycle so late registrations are picked up.
    fn queue_names(&self) -> Vec<String> {
        if self.config.queues.is_empty() {
            self.registry.names()
        } else {
            self.config.queues.clone()
        }
    }

    /// Execute one task and settle its outcome: advance the chain, store the result, or
    /// reschedule it for another attempt.
    ///
    /// Errors returned here come from the broker or backend; handler failures are settled.
    pub async fn execute(&self, task: Task) -> Result<()> {
        debug!(
            task_id = %task.id,
            task = %task.name,
            attempt = task.attempts() + 1,
            "Executing task"
        );

        match self.executor.execute(&task).await {
            Ok(values) => self.on_success(task, values).await,
            Err(e) => self.on_failure(task, e).await,
        }
    }

    async fn on_success(&self, mut task: Task, values: Vec<Value>) -> Result<()> {
        match task.take_continuation() {
            Some(mut next) => {
                next.args.extend(values);
                self.broker.push(&next).await?;
                debug!(
                    task_id = %task.id,
                    task = %task.name,
                    next_id = %next.id,
                    next = %next.name,
                    "Task succeeded, chain advanced"
                );
            }
            None if task.option.ignore_result => {
                debug!(task_id = %task.id, task = %task.name, "Task succeeded");
            }
            None => {
                self.backend.push(&TaskResult::success(&task, values)).await?;
                debug!(task_id = %task.id, task = %task.name, "Task succeeded, result stored");
            }
        }
        Ok(())
    }

    async fn on_failure(&self, mut task: Task, err: Error) -> Result<()> {
        if err.is_invocation() && task.can_retry() {
            let delay = task.schedule_retry();
            warn!(
                task_id = %task.id,
                task = %task.name,
                attempt = task.attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Task failed, retrying"
            );
            return self.broker.push(&task).await;
        }

        error!(
            task_id = %task.id,
            task = %task.name,
            attempt = task.attempts() + 1,
            error = %err,
            "Task failed"
        );
        self.backend.push(&TaskResult::failure(&task, &err)).await?;

        // The producer waits on the last link; let it see the failure too.
        if !task.on_success.is_empty() {
            let tail = task.tail();
            self.backend.push(&TaskResult::failure(tail, &err)).await?;
            debug!(task_id = %tail.id, task = %tail.name, "Chain failure propagated");
        }
        Ok(())
    }
}
