//! Wire encoding of tasks and results.

mod codec;

pub use codec::JsonSerializer;

use asq_core::{Outcome, Task, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Malformed result: {0}")]
    MalformedResult(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<ProtocolError> for asq_core::Error {
    fn from(err: ProtocolError) -> Self {
        asq_core::Error::Transport(err.to_string())
    }
}

/// Maximum size of one encoded task or result: 11MB
pub const MAX_MESSAGE_SIZE: usize = 11 * 1024 * 1024;

/// Encoding of tasks and results into the strings a broker or backend stores.
///
/// A result is the list of return values followed by a trailing error slot; an empty
/// error string means the task succeeded.
pub trait Serializer: Send + Sync + 'static {
    fn encode_task(&self, task: &Task) -> Result<String>;

    fn decode_task(&self, buf: &str) -> Result<Task>;

    fn encode_result(&self, values: &[Value], error: Option<&str>) -> Result<String>;

    fn decode_result(&self, buf: &str) -> Result<Outcome>;
}
