use crate::{from_values, Error, Result, Task, TaskId, Value};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Terminal outcome of a task, as handed to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub id: TaskId,
    pub name: String,
    /// Return values, without the error slot
    pub results: Vec<Value>,
    /// Present when the task ultimately failed
    pub error: Option<String>,
    /// Retention of the stored result
    pub timeout: Duration,
}

impl TaskResult {
    pub fn success(task: &Task, results: Vec<Value>) -> Self {
        TaskResult {
            id: task.id,
            name: task.name.clone(),
            results,
            error: None,
            timeout: task.option.result_expired(),
        }
    }

    pub fn failure(task: &Task, error: impl ToString) -> Self {
        TaskResult {
            id: task.id,
            name: task.name.clone(),
            results: Vec::new(),
            error: Some(error.to_string()),
            timeout: task.option.result_expired(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A stored result as read back from a backend.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Outcome {
    pub values: Vec<Value>,
    pub error: Option<String>,
}

impl Outcome {
    /// Surface a persisted error as [`Error::TaskFailed`].
    pub fn into_result(self) -> Result<Vec<Value>> {
        match self.error {
            Some(error) => Err(Error::TaskFailed(error)),
            None => Ok(self.values),
        }
    }

    /// Convert the values into typed output slots.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        let values = self.into_result()?;
        Ok(from_values(values)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_from_task() {
        let task = Task::new("double", vec![Value::from(21)]).unwrap();
        let ok = TaskResult::success(&task, vec![Value::from(42)]);
        assert!(ok.is_success());
        assert_eq!(ok.id, task.id);
        assert_eq!(ok.timeout, Duration::from_secs(3600));

        let failed = TaskResult::failure(&task, Error::Handler("boom".to_string()));
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.results.is_empty());
    }

    #[test]
    fn test_outcome_surfaces_error() {
        let outcome = Outcome {
            values: vec![],
            error: Some("boom".to_string()),
        };
        match outcome.into_result() {
            Err(Error::TaskFailed(msg)) => assert_eq!(msg, "boom"),
            other => panic!("Expected TaskFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_outcome_decode() {
        let outcome = Outcome {
            values: vec![Value::from(1), Value::from("x")],
            error: None,
        };
        let (n, s): (i64, String) = outcome.decode().unwrap();
        assert_eq!((n, s.as_str()), (1, "x"));
    }
}
