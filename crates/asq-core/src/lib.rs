mod backoff;
mod de;
mod error;
mod invoker;
mod result;
mod ser;
mod task;
mod value;

pub use backoff::{Backoff, DEFAULT_FACTOR, MAX_DELAY_SECS};
pub use de::from_value;
pub use error::{ConvertError, Error, Result};
pub use invoker::{from_values, invoke, to_values, Handler, IntoHandler};
pub use result::{Outcome, TaskResult};
pub use ser::to_value;
pub use task::{Task, TaskBuilder, TaskId, TaskOption};
pub use value::{Map, Number, Value};
