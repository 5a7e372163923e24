use crate::{ProtocolError, Result, Serializer, MAX_MESSAGE_SIZE};
use asq_core::{Outcome, Task, Value};

/// Stored in place of an empty failure message, which would otherwise read back as success.
const UNKNOWN_ERROR: &str = "unknown error";

/// JSON encoding.
///
/// Tasks are plain JSON objects. A result is a JSON array of the return values with the
/// error string appended: `[42, ""]` is a success, `["division by zero"]` a failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        JsonSerializer
    }
}

fn check_size(len: usize) -> Result<()> {
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(len));
    }
    Ok(())
}

impl Serializer for JsonSerializer {
    fn encode_task(&self, task: &Task) -> Result<String> {
        let buf = serde_json::to_string(task)?;
        check_size(buf.len())?;
        Ok(buf)
    }

    fn decode_task(&self, buf: &str) -> Result<Task> {
        check_size(buf.len())?;
        Ok(serde_json::from_str(buf)?)
    }

    fn encode_result(&self, values: &[Value], error: Option<&str>) -> Result<String> {
        let error = match error {
            None => "",
            Some("") => UNKNOWN_ERROR,
            Some(e) => e,
        };

        let mut items = Vec::with_capacity(values.len() + 1);
        items.extend(values.iter().cloned());
        items.push(Value::from(error));

        let buf = serde_json::to_string(&items)?;
        check_size(buf.len())?;
        Ok(buf)
    }

    fn decode_result(&self, buf: &str) -> Result<Outcome> {
        check_size(buf.len())?;
        let mut values: Vec<Value> = serde_json::from_str(buf)?;

        let error = match values.pop() {
            Some(Value::String(e)) if e.is_empty() => None,
            Some(Value::String(e)) => Some(e),
            Some(other) => {
                return Err(ProtocolError::MalformedResult(format!(
                    "error slot must be a string, got {}",
                    other.kind()
                )))
            }
            None => {
                return Err(ProtocolError::MalformedResult(
                    "missing error slot".to_string(),
                ))
            }
        };

        Ok(Outcome { values, error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asq_core::Map;

    #[test]
    fn test_task_roundtrip() {
        let codec = JsonSerializer::new();

        let first = Task::new("inc", vec![Value::from(1)]).unwrap();
        let second = Task::new("inc", vec![]).unwrap();
        let task = Task::chain(vec![first, second]).unwrap();

        let buf = codec.encode_task(&task).unwrap();
        let decoded = codec.decode_task(&buf).unwrap();

        assert_eq!(decoded, task);
        assert_eq!(decoded.tail().name, "inc");
        assert_eq!(decoded.on_success.len(), 1);
    }

    #[test]
    fn test_result_trailing_error_slot() {
        let codec = JsonSerializer::new();

        let buf = codec.encode_result(&[Value::from(42)], None).unwrap();
        assert_eq!(buf, r#"[42,""]"#);

        let buf = codec.encode_result(&[], Some("division by zero")).unwrap();
        assert_eq!(buf, r#"["division by zero"]"#);
    }

    #[test]
    fn test_decode_result() {
        let codec = JsonSerializer::new();

        let mut map = Map::new();
        map.insert("k", Value::from(true));
        let values = vec![Value::from("a"), Value::Map(map), Value::Null];
        let buf = codec.encode_result(&values, None).unwrap();
        let outcome = codec.decode_result(&buf).unwrap();
        assert_eq!(outcome.values, values);
        assert!(outcome.error.is_none());

        let buf = codec.encode_result(&[], Some("boom")).unwrap();
        let outcome = codec.decode_result(&buf).unwrap();
        assert!(outcome.values.is_empty());
        assert_eq!(outcome.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_empty_error_message_stays_a_failure() {
        let codec = JsonSerializer::new();
        let buf = codec.encode_result(&[], Some("")).unwrap();
        let outcome = codec.decode_result(&buf).unwrap();
        assert_eq!(outcome.error.as_deref(), Some(UNKNOWN_ERROR));
    }

    #[test]
    fn test_malformed_result() {
        let codec = JsonSerializer::new();
        assert!(matches!(
            codec.decode_result("[]"),
            Err(ProtocolError::MalformedResult(_))
        ));
        assert!(matches!(
            codec.decode_result("[1, 2]"),
            Err(ProtocolError::MalformedResult(_))
        ));
        assert!(matches!(
            codec.decode_result("{"),
            Err(ProtocolError::SerializationError(_))
        ));
    }

    #[test]
    fn test_message_size_limit() {
        let codec = JsonSerializer::new();
        let large = "x".repeat(MAX_MESSAGE_SIZE + 1);
        match codec.encode_result(&[Value::from(large)], None) {
            Err(ProtocolError::MessageTooLarge(_)) => {}
            other => panic!("Expected MessageTooLarge error, got {:?}", other.map(|_| ())),
        }
    }
}
