use asq_broker::Backend;
use asq_core::{from_values, Error, Result, Task, TaskId, Value};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Handle to the result of a submitted task (the last link of a chain).
#[derive(Clone)]
pub struct AsyncResult {
    backend: Arc<dyn Backend>,
    id: TaskId,
    name: String,
    ignore_result: bool,
    poll_interval: Duration,
}

impl AsyncResult {
    pub(crate) fn new(backend: Arc<dyn Backend>, task: &Task) -> Self {
        AsyncResult {
            backend,
            id: task.id,
            name: task.name.clone(),
            ignore_result: task.option.ignore_result,
            poll_interval: task.option.poll_interval(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the result.
    ///
    /// Returns the task's values, [`Error::TaskFailed`] when the task failed, or `Ok(None)` once
    /// `cancel` fires. Tasks that ignore their result complete immediately with no values.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<Option<Vec<Value>>> {
        if self.ignore_result {
            return Ok(Some(Vec::new()));
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(task_id = %self.id, task = %self.name, "Wait cancelled");
                    return Ok(None);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            match self.backend.poll(self.id, &self.name).await {
                Ok(Some(outcome)) => return outcome.into_result().map(Some),
                Ok(None) => {}
                Err(e) => {
                    warn!(task_id = %self.id, task = %self.name, error = %e, "Result poll failed");
                }
            }
        }
    }

    /// Wait and convert the values into `T`, usually a tuple with one slot per value.
    pub async fn get<T: DeserializeOwned>(&self, cancel: &CancellationToken) -> Result<Option<T>> {
        match self.wait(cancel).await? {
            Some(values) => Ok(Some(from_values(values)?)),
            None => Ok(None),
        }
    }

    /// Wait in the background, then call `on_success` with the converted values or
    /// `on_failed` with the error. Neither is called when the wait is cancelled or the task
    /// ignores its result.
    pub fn then<T, S, F>(&self, cancel: CancellationToken, on_success: S, on_failed: F) -> JoinHandle<()>
    where
        T: DeserializeOwned + Send + 'static,
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(Error) + Send + 'static,
    {
        let result = self.clone();
        tokio::spawn(async move {
            if result.ignore_result {
                return;
            }
            match result.get::<T>(&cancel).await {
                Ok(Some(value)) => on_success(value),
                Ok(None) => {}
                Err(e) => on_failed(e),
            }
        })
    }
}
