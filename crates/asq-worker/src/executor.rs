use crate::handler::HandlerRegistry;
use asq_core::{invoke, Error, Result, Task, Value};
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, error};

/// Runs handlers for tasks on the blocking pool, containing panics.
#[derive(Clone)]
pub struct TaskExecutor {
    registry: Arc<HandlerRegistry>,
}

impl TaskExecutor {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        TaskExecutor { registry }
    }

    /// Look up the handler for `task` and call it with the task's arguments.
    ///
    /// Every failure comes back as an [`Error`]: an unknown name as `NotRegistered`, a bad
    /// argument list as `Arity`/`Conversion`, a handler error as `Handler` and a panic as `Panic`.
    pub async fn execute(&self, task: &Task) -> Result<Vec<Value>> {
        let handler = self.registry.get(&task.name)?;
        let args = task.args.clone();

        match tokio::task::spawn_blocking(move || invoke(handler.as_ref(), args)).await {
            Ok(result) => {
                if let Err(e) = &result {
                    debug!(task_id = %task.id, task = %task.name, error = %e, "Handler failed");
                }
                result
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(task_id = %task.id, task = %task.name, panic = %message, "Handler panicked");
                Err(Error::Panic(message))
            }
            Err(e) => Err(Error::Panic(e.to_string())),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<HandlerRegistry> {
        let registry = HandlerRegistry::new();
        registry
            .register("double", |x: i64| -> std::result::Result<i64, String> { Ok(x * 2) })
            .unwrap();
        registry
            .register("explode", |_x: i64| -> std::result::Result<i64, String> {
                panic!("kaboom")
            })
            .unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_executor_success() {
        let executor = TaskExecutor::new(registry());
        let task = Task::new("double", vec![Value::from(21)]).unwrap();

        let result = executor.execute(&task).await.unwrap();
        assert_eq!(result, vec![Value::from(42)]);
    }

    #[tokio::test]
    async fn test_executor_contains_panic() {
        let executor = TaskExecutor::new(registry());
        let task = Task::new("explode", vec![Value::from(1)]).unwrap();

        match executor.execute(&task).await {
            Err(Error::Panic(message)) => assert!(message.contains("kaboom")),
            other => panic!("Expected Panic, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_executor_unknown_name() {
        let executor = TaskExecutor::new(registry());
        let task = Task::new("missing", vec![]).unwrap();

        assert!(matches!(
            executor.execute(&task).await,
            Err(Error::NotRegistered(name)) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn test_executor_arity() {
        let executor = TaskExecutor::new(registry());
        let task = Task::new("double", vec![Value::from(1), Value::from(2)]).unwrap();

        assert!(matches!(
            executor.execute(&task).await,
            Err(Error::Arity { expected: 1, actual: 2 })
        ));
    }
}
