use crate::{Backend, Broker, RedisConfig};
use asq_core::{Error, Outcome, Result, Task, TaskId, TaskResult};
use asq_protocol::{JsonSerializer, Serializer};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Moves due members of each delayed set (odd KEYS) behind the tasks already waiting in the
/// matching ready list (even KEYS). Runs as one script, so concurrent pollers never move a
/// task twice.
const PROMOTE_SCRIPT: &str = r#"
local moved = 0
for i = 1, #KEYS, 2 do
    local items = redis.call('ZRANGEBYSCORE', KEYS[i], '-inf', ARGV[1])
    for _, item in ipairs(items) do
        redis.call('LPUSH', KEYS[i + 1], item)
        redis.call('ZREM', KEYS[i], item)
    end
    moved = moved + #items
end
return moved
"#;

/// Shortest blocking pop; a zero timeout would block forever.
const MIN_BLOCK_SECS: f64 = 0.01;

fn transport(err: redis::RedisError) -> Error {
    Error::Transport(err.to_string())
}

/// Connections to one server. Plain commands share a multiplexed connection, opened on first
/// use and reopened after an I/O failure. A blocking pop stalls every command queued behind it
/// on its connection, so pops take a connection of their own from an idle list.
struct Connections {
    client: redis::Client,
    shared: Mutex<Option<MultiplexedConnection>>,
    idle: Mutex<Vec<MultiplexedConnection>>,
}

impl Connections {
    fn open(url: &str) -> Result<Self> {
        Ok(Connections {
            client: redis::Client::open(url).map_err(transport)?,
            shared: Mutex::new(None),
            idle: Mutex::new(Vec::new()),
        })
    }

    async fn connect(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(transport)
    }

    async fn shared(&self) -> Result<MultiplexedConnection> {
        let cached = self.shared.lock().clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }
        let conn = self.connect().await?;
        *self.shared.lock() = Some(conn.clone());
        debug!("Opened shared redis connection");
        Ok(conn)
    }

    /// Map a command error, forgetting the shared connection when the error means it is gone.
    fn failed(&self, err: redis::RedisError) -> Error {
        if err.is_io_error() || err.is_connection_dropped() {
            self.shared.lock().take();
        }
        transport(err)
    }

    async fn take_blocking(&self) -> Result<MultiplexedConnection> {
        let idle = self.idle.lock().pop();
        match idle {
            Some(conn) => Ok(conn),
            None => self.connect().await,
        }
    }

    fn put_blocking(&self, conn: MultiplexedConnection) {
        self.idle.lock().push(conn);
    }
}

/// Key layout shared by broker and backend. The namespace is a hash tag so all keys of one
/// namespace live in the same cluster slot.
#[derive(Debug, Clone)]
struct Keys {
    namespace: String,
}

impl Keys {
    fn ready(&self, name: &str) -> String {
        format!("{{{}}}.tasks.{}", self.namespace, name)
    }

    fn delayed(&self, name: &str) -> String {
        format!("{{{}}}.delayed.{}", self.namespace, name)
    }

    fn result(&self, name: &str, id: TaskId) -> String {
        format!("{{{}}}.result.{}.{}", self.namespace, name, id)
    }
}

/// Redis broker: ready tasks in lists (`LPUSH`/`BRPOP`), delayed tasks in sorted sets scored
/// by start time.
pub struct RedisBroker {
    conns: Connections,
    keys: Keys,
    promote_interval: Duration,
    promote_script: redis::Script,
    serializer: Arc<dyn Serializer>,
}

impl RedisBroker {
    pub fn new(config: &RedisConfig) -> Result<Self> {
        Self::with_serializer(config, Arc::new(JsonSerializer::new()))
    }

    pub fn with_serializer(config: &RedisConfig, serializer: Arc<dyn Serializer>) -> Result<Self> {
        Ok(RedisBroker {
            conns: Connections::open(&config.url)?,
            keys: Keys {
                namespace: config.namespace.clone(),
            },
            promote_interval: config.promote_interval(),
            promote_script: redis::Script::new(PROMOTE_SCRIPT),
            serializer,
        })
    }

    /// Check the server is reachable.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conns.shared().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| self.conns.failed(e))?;
        Ok(())
    }

    async fn promote(&self, conn: &mut MultiplexedConnection, names: &[String]) -> Result<()> {
        let mut invocation = self.promote_script.prepare_invoke();
        for name in names {
            invocation.key(self.keys.delayed(name)).key(self.keys.ready(name));
        }
        invocation.arg(Utc::now().timestamp_millis());

        let moved: i64 = invocation
            .invoke_async(conn)
            .await
            .map_err(|e| self.conns.failed(e))?;
        if moved > 0 {
            debug!(moved, "Promoted delayed tasks");
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push(&self, task: &Task) -> Result<()> {
        let buf = self.serializer.encode_task(task)?;

        let mut conn = self.conns.shared().await?;
        match task.option.start_at {
            Some(start_at) => {
                redis::cmd("ZADD")
                    .arg(self.keys.delayed(&task.name))
                    .arg(start_at)
                    .arg(&buf)
                    .query_async::<_, i64>(&mut conn)
                    .await
                    .map_err(|e| self.conns.failed(e))?;
            }
            None => {
                redis::cmd("LPUSH")
                    .arg(self.keys.ready(&task.name))
                    .arg(&buf)
                    .query_async::<_, i64>(&mut conn)
                    .await
                    .map_err(|e| self.conns.failed(e))?;
            }
        }

        debug!(task_id = %task.id, task = %task.name, delayed = task.is_delayed(), "Task pushed");
        Ok(())
    }

    async fn poll(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        names: &[String],
    ) -> Result<Option<Task>> {
        let deadline = Instant::now() + timeout;

        if names.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {}
            }
            return Ok(None);
        }

        let mut blocking = self.conns.take_blocking().await?;
        let popped = self.pop_ready(cancel, deadline, names, &mut blocking).await;
        // A failed pop may leave the connection mid-reply; only clean ones go back.
        if popped.is_ok() {
            self.conns.put_blocking(blocking);
        }

        match popped?.map(|(key, buf)| (key, self.serializer.decode_task(&buf))) {
            Some((_, Ok(task))) => Ok(Some(task)),
            Some((key, Err(e))) => {
                warn!(key = %key, error = %e, "Dropping undecodable task");
                Err(e.into())
            }
            None => Ok(None),
        }
    }
}

impl RedisBroker {
    /// Pop the raw `(key, task)` of the next ready task.
    ///
    /// The blocking pop is sliced by the promote interval so due delayed tasks and
    /// cancellation are noticed between slices. A pop is never abandoned midway.
    async fn pop_ready(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        names: &[String],
        blocking: &mut MultiplexedConnection,
    ) -> Result<Option<(String, String)>> {
        let ready_keys: Vec<String> = names.iter().map(|name| self.keys.ready(name)).collect();
        let mut shared = self.conns.shared().await?;

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            self.promote(&mut shared, names).await?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let block = remaining.min(self.promote_interval).as_secs_f64().max(MIN_BLOCK_SECS);

            let reply: Option<(String, String)> = redis::cmd("BRPOP")
                .arg(&ready_keys)
                .arg(block)
                .query_async(blocking)
                .await
                .map_err(transport)?;

            if reply.is_some() {
                return Ok(reply);
            }
        }
    }
}

/// Redis result store: one string per result, `SET ... EX` with the result's timeout.
pub struct RedisBackend {
    conns: Connections,
    keys: Keys,
    serializer: Arc<dyn Serializer>,
}

impl RedisBackend {
    pub fn new(config: &RedisConfig) -> Result<Self> {
        Self::with_serializer(config, Arc::new(JsonSerializer::new()))
    }

    pub fn with_serializer(config: &RedisConfig, serializer: Arc<dyn Serializer>) -> Result<Self> {
        Ok(RedisBackend {
            conns: Connections::open(&config.url)?,
            keys: Keys {
                namespace: config.namespace.clone(),
            },
            serializer,
        })
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn push(&self, result: &TaskResult) -> Result<()> {
        let key = self.keys.result(&result.name, result.id);
        let buf = self
            .serializer
            .encode_result(&result.results, result.error.as_deref())?;

        let mut conn = self.conns.shared().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(&key).arg(&buf);
        // EX requires a positive value
        let ttl = result.timeout.as_secs();
        if ttl > 0 {
            cmd.arg("EX").arg(ttl);
        }
        cmd.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| self.conns.failed(e))?;

        debug!(task_id = %result.id, task = %result.name, "Result stored");
        Ok(())
    }

    async fn poll(&self, id: TaskId, name: &str) -> Result<Option<Outcome>> {
        let key = self.keys.result(name, id);
        let mut conn = self.conns.shared().await?;

        let buf: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.conns.failed(e))?;

        match buf {
            Some(buf) => Ok(Some(self.serializer.decode_result(&buf)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asq_core::Value;

    #[test]
    fn test_key_layout() {
        let keys = Keys {
            namespace: "asq".to_string(),
        };
        let id = uuid_for_test();
        assert_eq!(keys.ready("double"), "{asq}.tasks.double");
        assert_eq!(keys.delayed("double"), "{asq}.delayed.double");
        assert_eq!(keys.result("double", id), format!("{{asq}}.result.double.{}", id));
    }

    fn uuid_for_test() -> TaskId {
        Task::new("x", vec![]).unwrap().id
    }

    fn test_config() -> RedisConfig {
        RedisConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            namespace: format!("asq-test-{}", uuid_for_test()),
            promote_interval_ms: 100,
        }
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_redis_push_poll() {
        let config = test_config();
        let broker = RedisBroker::new(&config).unwrap();
        broker.ping().await.unwrap();
        let cancel = CancellationToken::new();
        let names = vec!["double".to_string()];

        let task = Task::new("double", vec![Value::from(21)]).unwrap();
        broker.push(&task).await.unwrap();

        let got = broker.poll(&cancel, Duration::from_secs(2), &names).await.unwrap();
        assert_eq!(got.unwrap().id, task.id);

        let empty = broker.poll(&cancel, Duration::from_millis(200), &names).await.unwrap();
        assert!(empty.is_none());
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_redis_delayed_promotion() {
        let config = test_config();
        let broker = RedisBroker::new(&config).unwrap();
        let cancel = CancellationToken::new();
        let names = vec!["later".to_string()];

        let eta = Utc::now() + chrono::Duration::milliseconds(300);
        let task = Task::builder("later").start_at(eta).build().unwrap();
        broker.push(&task).await.unwrap();

        let early = broker.poll(&cancel, Duration::from_millis(100), &names).await.unwrap();
        assert!(early.is_none());

        let got = broker.poll(&cancel, Duration::from_secs(3), &names).await.unwrap();
        assert_eq!(got.unwrap().id, task.id);
    }

    #[test]
    fn test_io_failure_maps_to_transport() {
        let conns = Connections::open("redis://127.0.0.1:6379").unwrap();
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        match conns.failed(redis::RedisError::from(err)) {
            Error::Transport(msg) => assert!(msg.contains("reset"), "{}", msg),
            other => panic!("Expected Transport, got {:?}", other),
        }
        assert!(conns.shared.lock().is_none());
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_redis_connections_reused() {
        let config = test_config();
        let broker = RedisBroker::new(&config).unwrap();
        let cancel = CancellationToken::new();
        let names = vec!["reuse".to_string()];

        for _ in 0..3 {
            broker.push(&Task::new("reuse", vec![]).unwrap()).await.unwrap();
            let got = broker.poll(&cancel, Duration::from_secs(1), &names).await.unwrap();
            assert!(got.is_some());
        }
        // One shared connection, and the single blocking connection went back idle each time
        assert!(broker.conns.shared.lock().is_some());
        assert_eq!(broker.conns.idle.lock().len(), 1);

        // A dropped connection is forgotten and reopened on next use
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        broker.conns.failed(redis::RedisError::from(reset));
        assert!(broker.conns.shared.lock().is_none());
        broker.ping().await.unwrap();
        assert!(broker.conns.shared.lock().is_some());
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_redis_backend() {
        let config = test_config();
        let backend = RedisBackend::new(&config).unwrap();
        let task = Task::new("double", vec![]).unwrap();

        assert!(backend.poll(task.id, "double").await.unwrap().is_none());
        backend
            .push(&TaskResult::success(&task, vec![Value::from(42)]))
            .await
            .unwrap();

        let outcome = backend.poll(task.id, "double").await.unwrap().unwrap();
        assert_eq!(outcome.values, vec![Value::from(42)]);
        assert!(outcome.error.is_none());
    }
}
