use crate::{Backend, Broker};
use asq_core::{Outcome, Result, Task, TaskId, TaskResult};
use asq_protocol::{JsonSerializer, Serializer};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Encoded tasks of all names, ready and delayed.
#[derive(Default)]
struct QueueState {
    ready: HashMap<String, VecDeque<String>>,
    /// Keyed by (start_at ms, insertion sequence) so equal start times stay FIFO
    delayed: HashMap<String, BTreeMap<(i64, u64), String>>,
    seq: u64,
}

impl QueueState {
    /// Move every due delayed entry of `names` to the tail of its ready queue.
    fn promote_due(&mut self, now_ms: i64, names: &[String]) -> usize {
        let mut moved = 0;
        for name in names {
            let Some(delayed) = self.delayed.get_mut(name) else {
                continue;
            };
            let later = delayed.split_off(&(now_ms.saturating_add(1), 0));
            let due = std::mem::replace(delayed, later);
            if due.is_empty() {
                continue;
            }
            moved += due.len();
            self.ready
                .entry(name.clone())
                .or_default()
                .extend(due.into_values());
        }
        moved
    }

    fn pop_ready(&mut self, names: &[String]) -> Option<String> {
        names
            .iter()
            .find_map(|name| self.ready.get_mut(name).and_then(VecDeque::pop_front))
    }

    fn next_due(&self, names: &[String]) -> Option<i64> {
        names
            .iter()
            .filter_map(|name| self.delayed.get(name))
            .filter_map(|delayed| delayed.keys().next().map(|(at, _)| *at))
            .min()
    }
}

/// In-process broker with the same storage layout as a remote one: per-name FIFO lists of
/// encoded tasks plus a per-name delayed set ordered by start time.
pub struct MemoryBroker {
    serializer: Arc<dyn Serializer>,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryBroker {
    pub fn new() -> Self {
        MemoryBroker::with_serializer(Arc::new(JsonSerializer::new()))
    }

    pub fn with_serializer(serializer: Arc<dyn Serializer>) -> Self {
        MemoryBroker {
            serializer,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Number of ready tasks for `name`
    pub fn ready_len(&self, name: &str) -> usize {
        self.state.lock().ready.get(name).map_or(0, VecDeque::len)
    }

    /// Number of delayed tasks for `name`
    pub fn delayed_len(&self, name: &str) -> usize {
        self.state.lock().delayed.get(name).map_or(0, BTreeMap::len)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn push(&self, task: &Task) -> Result<()> {
        let buf = self.serializer.encode_task(task)?;

        {
            let mut state = self.state.lock();
            match task.option.start_at {
                Some(start_at) => {
                    let seq = state.seq;
                    state.seq += 1;
                    state
                        .delayed
                        .entry(task.name.clone())
                        .or_default()
                        .insert((start_at, seq), buf);
                }
                None => {
                    state.ready.entry(task.name.clone()).or_default().push_back(buf);
                }
            }
        }

        debug!(task_id = %task.id, task = %task.name, delayed = task.is_delayed(), "Task pushed");
        self.notify.notify_waiters();
        Ok(())
    }

    async fn poll(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        names: &[String],
    ) -> Result<Option<Task>> {
        let deadline = Instant::now() + timeout;

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            // Registered before checking the queues so a push in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now_ms = Utc::now().timestamp_millis();
            let (buf, next_due) = {
                let mut state = self.state.lock();
                let moved = state.promote_due(now_ms, names);
                if moved > 0 {
                    debug!(moved, "Promoted delayed tasks");
                }
                (state.pop_ready(names), state.next_due(names))
            };

            if let Some(buf) = buf {
                return Ok(Some(self.serializer.decode_task(&buf)?));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let mut wait = deadline - now;
            if let Some(due) = next_due {
                let until_due = Duration::from_millis(due.saturating_sub(now_ms).max(0) as u64);
                wait = wait.min(until_due);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = &mut notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

struct StoredResult {
    buf: String,
    expires_at: Option<Instant>,
}

impl StoredResult {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process result store. A zero timeout keeps the result until the store is dropped.
pub struct MemoryBackend {
    serializer: Arc<dyn Serializer>,
    results: RwLock<HashMap<String, StoredResult>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::with_serializer(Arc::new(JsonSerializer::new()))
    }

    pub fn with_serializer(serializer: Arc<dyn Serializer>) -> Self {
        MemoryBackend {
            serializer,
            results: RwLock::new(HashMap::new()),
        }
    }

    fn key(id: TaskId, name: &str) -> String {
        format!("result.{}.{}", name, id)
    }

    /// Number of stored, unexpired results
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.results
            .read()
            .values()
            .filter(|r| !r.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn push(&self, result: &TaskResult) -> Result<()> {
        let buf = self
            .serializer
            .encode_result(&result.results, result.error.as_deref())?;

        let now = Instant::now();
        let expires_at = if result.timeout.is_zero() {
            None
        } else {
            Some(now + result.timeout)
        };

        let mut results = self.results.write();
        results.retain(|_, stored| !stored.is_expired(now));
        results.insert(
            Self::key(result.id, &result.name),
            StoredResult { buf, expires_at },
        );
        Ok(())
    }

    async fn poll(&self, id: TaskId, name: &str) -> Result<Option<Outcome>> {
        let buf = {
            let results = self.results.read();
            match results.get(&Self::key(id, name)) {
                Some(stored) if !stored.is_expired(Instant::now()) => stored.buf.clone(),
                _ => return Ok(None),
            }
        };
        Ok(Some(self.serializer.decode_result(&buf)?))
    }
}
