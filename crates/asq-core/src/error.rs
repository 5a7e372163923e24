use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("parameter count mismatch: got {actual}, handler takes {expected}")]
    Arity { expected: usize, actual: usize },

    #[error("conversion failed: {0}")]
    Conversion(#[from] ConvertError),

    #[error("function {0} not registered")]
    NotRegistered(String),

    #[error("function {0} already registered")]
    AlreadyRegistered(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Handler(String),

    #[error("panic: {0}")]
    Panic(String),

    /// A failure persisted by a worker and read back by the producer.
    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("invalid task: {0}")]
    InvalidTask(String),
}

impl Error {
    /// Errors coming out of an invocation; these drive the retry decision.
    pub fn is_invocation(&self) -> bool {
        matches!(
            self,
            Error::Arity { .. } | Error::Conversion(_) | Error::Handler(_) | Error::Panic(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure to convert between a [`crate::Value`] and a static type.
///
/// Carries the path of the offending field (`C.N`, `[2]`, ...) so a mismatch deep inside
/// a struct argument is reported where it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertError {
    path: Vec<String>,
    message: String,
    absent: Option<AbsentField>,
}

/// A required struct field with no key in the source map.
#[derive(Debug, Clone, Copy, PartialEq)]
struct AbsentField {
    container: Option<&'static str>,
    field: &'static str,
}

impl ConvertError {
    pub fn new(message: impl Into<String>) -> Self {
        ConvertError {
            path: Vec::new(),
            message: message.into(),
            absent: None,
        }
    }

    /// Name the struct a missing field belongs to, unless an inner struct already did.
    pub(crate) fn in_struct(mut self, name: &'static str) -> Self {
        if let Some(absent) = self.absent.as_mut() {
            absent.container.get_or_insert(name);
        }
        self
    }

    /// `(struct, field)` when this error is a required field missing from a struct's map.
    pub(crate) fn absent_field(&self) -> Option<(&'static str, &'static str)> {
        let absent = self.absent?;
        Some((absent.container?, absent.field))
    }

    /// Prefix the error location with an enclosing field or index.
    pub fn at(mut self, segment: impl Into<String>) -> Self {
        self.path.insert(0, segment.into());
        self
    }

    pub fn path(&self) -> String {
        let mut out = String::new();
        for segment in &self.path {
            if !out.is_empty() && !segment.starts_with('[') {
                out.push('.');
            }
            out.push_str(segment);
        }
        out
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path(), self.message)
        }
    }
}

impl std::error::Error for ConvertError {}

impl serde::de::Error for ConvertError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        ConvertError::new(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        ConvertError {
            absent: Some(AbsentField {
                container: None,
                field,
            }),
            ..ConvertError::new(format!("missing field `{}`", field))
        }
    }
}

impl serde::ser::Error for ConvertError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        ConvertError::new(msg.to_string())
    }
}
