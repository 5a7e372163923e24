//! End-to-end runs of the engine on the in-memory broker and backend.

use asq_broker::{Backend, MemoryBackend, MemoryBroker};
use asq_client::{App, AsyncResult};
use asq_core::{Error, Outcome, Result, Task, TaskId, TaskResult, Value};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backend wrapper counting reads and writes.
#[derive(Default)]
struct CountingBackend {
    inner: MemoryBackend,
    pushes: AtomicUsize,
    polls: AtomicUsize,
}

#[async_trait]
impl Backend for CountingBackend {
    async fn push(&self, result: &TaskResult) -> Result<()> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        self.inner.push(result).await
    }

    async fn poll(&self, id: TaskId, name: &str) -> Result<Option<Outcome>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.inner.poll(id, name).await
    }
}

struct Harness {
    app: App,
    backend: Arc<CountingBackend>,
    cancel: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        let backend = Arc::new(CountingBackend::default());
        let app = App::new(Arc::new(MemoryBroker::new()), backend.clone());
        Harness {
            app,
            backend,
            cancel: CancellationToken::new(),
        }
    }

    fn start(&self, concurrency: usize) {
        self.app.start_worker(self.cancel.clone(), concurrency);
    }

    async fn wait(&self, result: &AsyncResult) -> Result<Option<Vec<Value>>> {
        tokio::time::timeout(Duration::from_secs(10), result.wait(&self.cancel))
            .await
            .expect("result did not arrive in time")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn task(name: &str) -> asq_core::TaskBuilder {
    Task::builder(name).poll_interval(Duration::from_millis(10))
}

fn double(x: i64) -> std::result::Result<i64, String> {
    Ok(x * 2)
}

fn inc(x: i64) -> std::result::Result<i64, String> {
    Ok(x + 1)
}

#[tokio::test]
async fn test_double() {
    let h = Harness::new();
    h.app.register("double", double).unwrap();
    h.start(2);

    let result = h.app.submit_task(task("double").arg(&21).build().unwrap()).await.unwrap();
    assert_eq!(h.wait(&result).await.unwrap(), Some(vec![Value::from(42)]));

    let (n,): (i64,) = result.get(&h.cancel).await.unwrap().unwrap();
    assert_eq!(n, 42);
}

#[tokio::test]
async fn test_chain_passes_values() {
    let h = Harness::new();
    h.app.register("inc", inc).unwrap();
    h.start(2);

    let result = h
        .app
        .submit(vec![
            task("inc").arg(&1).build().unwrap(),
            task("inc").build().unwrap(),
        ])
        .await
        .unwrap();

    assert_eq!(h.wait(&result).await.unwrap(), Some(vec![Value::from(3)]));
    assert_eq!(h.backend.pushes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_chain_runs_in_order() {
    let h = Harness::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["a", "b", "c"] {
        let order = order.clone();
        h.app
            .register(name, move || -> std::result::Result<(), String> {
                order.lock().push(name);
                Ok(())
            })
            .unwrap();
    }
    h.start(4);

    let result = h
        .app
        .submit(vec![
            task("a").build().unwrap(),
            task("b").build().unwrap(),
            task("c").build().unwrap(),
        ])
        .await
        .unwrap();

    assert_eq!(h.wait(&result).await.unwrap(), Some(vec![]));
    assert_eq!(*order.lock(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_spread_return() {
    let h = Harness::new();
    h.app
        .register("divmod", |a: i64, b: i64| -> std::result::Result<(i64, i64), String> {
            if b == 0 {
                return Err("division by zero".to_string());
            }
            Ok((a / b, a % b))
        })
        .unwrap();
    h.start(1);

    let result = h
        .app
        .submit_task(task("divmod").arg(&7).arg(&2).build().unwrap())
        .await
        .unwrap();
    let (q, r): (i64, i64) = result.get(&h.cancel).await.unwrap().unwrap();
    assert_eq!((q, r), (3, 1));
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Order {
    item: String,
    quantity: u32,
}

#[tokio::test]
async fn test_struct_argument() {
    let h = Harness::new();
    h.app
        .register("total", |order: Order, price: f64| -> std::result::Result<f64, String> {
            Ok(order.quantity as f64 * price)
        })
        .unwrap();
    h.start(1);

    let order = Order {
        item: "widget".to_string(),
        quantity: 3,
    };
    let result = h
        .app
        .submit_task(task("total").arg(&order).arg(&2.5).build().unwrap())
        .await
        .unwrap();
    let (total,): (f64,) = result.get(&h.cancel).await.unwrap().unwrap();
    assert_eq!(total, 7.5);
}

#[tokio::test]
async fn test_ignore_result() {
    let h = Harness::new();
    h.app.register("double", double).unwrap();

    let result = h
        .app
        .submit_task(task("double").arg(&1).ignore_result(true).build().unwrap())
        .await
        .unwrap();

    assert_eq!(h.wait(&result).await.unwrap(), Some(vec![]));
    assert_eq!(h.backend.polls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_arity_mismatch_fails() {
    let h = Harness::new();
    h.app
        .register("add", |a: i64, b: i64| -> std::result::Result<i64, String> { Ok(a + b) })
        .unwrap();
    h.start(1);

    let result = h
        .app
        .submit_task(task("add").arg(&1).retry_count(0).build().unwrap())
        .await
        .unwrap();

    match h.wait(&result).await {
        Err(Error::TaskFailed(msg)) => assert!(msg.contains("parameter count mismatch")),
        other => panic!("Expected TaskFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_retry_exhaustion() {
    let h = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    h.app
        .register("flaky", move || -> std::result::Result<(), String> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("always".to_string())
        })
        .unwrap();
    h.start(1);

    let result = h
        .app
        .submit_task(
            task("flaky")
                .retry_count(2)
                .retry_timeout(Duration::from_millis(100))
                .build()
                .unwrap(),
        )
        .await
        .unwrap();

    match h.wait(&result).await {
        Err(Error::TaskFailed(msg)) => assert_eq!(msg, "always"),
        other => panic!("Expected TaskFailed, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.backend.pushes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_then_succeed() {
    let h = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    h.app
        .register("eventually", move |x: i64| -> std::result::Result<i64, String> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("not yet".to_string())
            } else {
                Ok(x)
            }
        })
        .unwrap();
    h.start(1);

    let result = h
        .app
        .submit_task(
            task("eventually")
                .arg(&5)
                .retry_count(1)
                .retry_timeout(Duration::from_millis(100))
                .build()
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(h.wait(&result).await.unwrap(), Some(vec![Value::from(5)]));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancelled_wait_skips_backend() {
    let h = Harness::new();
    let result = h.app.submit_task(task("double").arg(&1).build().unwrap()).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(result.wait(&cancel).await.unwrap().is_none());
    assert_eq!(h.backend.polls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_not_registered_reports_failure() {
    let h = Harness::new();
    h.app.register("double", double).unwrap();

    // Serve a name nobody registered
    let worker = h.app.worker(asq_worker::WorkerConfig {
        concurrency: 1,
        queues: vec!["missing".to_string()],
        ..Default::default()
    });
    let cancel = h.cancel.clone();
    tokio::spawn(async move { worker.run(cancel).await });

    let result = h.app.submit_task(task("missing").build().unwrap()).await.unwrap();
    match h.wait(&result).await {
        Err(Error::TaskFailed(msg)) => assert!(msg.contains("not registered")),
        other => panic!("Expected TaskFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_panic_is_contained() {
    let h = Harness::new();
    h.app
        .register("explode", || -> std::result::Result<(), String> { panic!("kaboom") })
        .unwrap();
    h.app.register("double", double).unwrap();
    h.start(1);

    let exploded = h
        .app
        .submit_task(task("explode").retry_count(0).build().unwrap())
        .await
        .unwrap();
    match h.wait(&exploded).await {
        Err(Error::TaskFailed(msg)) => assert!(msg.contains("kaboom")),
        other => panic!("Expected TaskFailed, got {:?}", other),
    }

    // The same loop keeps serving
    let doubled = h.app.submit_task(task("double").arg(&4).build().unwrap()).await.unwrap();
    assert_eq!(h.wait(&doubled).await.unwrap(), Some(vec![Value::from(8)]));
}

#[tokio::test]
async fn test_then_callbacks() {
    let h = Harness::new();
    h.app.register("double", double).unwrap();
    h.app
        .register("fail", || -> std::result::Result<(), String> { Err("boom".to_string()) })
        .unwrap();
    h.start(2);

    let ok = h.app.submit_task(task("double").arg(&10).build().unwrap()).await.unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();
    ok.then(
        h.cancel.clone(),
        move |(n,): (i64,)| {
            let _ = tx.send(n);
        },
        |e| panic!("unexpected failure: {}", e),
    );
    assert_eq!(rx.await.unwrap(), 20);

    let failed = h
        .app
        .submit_task(task("fail").retry_count(0).build().unwrap())
        .await
        .unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();
    failed.then(
        h.cancel.clone(),
        |_: ()| panic!("unexpected success"),
        move |e| {
            let _ = tx.send(e.to_string());
        },
    );
    assert_eq!(rx.await.unwrap(), "task failed: boom");
}

#[tokio::test]
async fn test_duplicate_register() {
    let h = Harness::new();
    h.app.register("double", double).unwrap();
    assert!(matches!(
        h.app.register("double", double),
        Err(Error::AlreadyRegistered(_))
    ));
}

#[tokio::test]
async fn test_empty_chain_rejected() {
    let h = Harness::new();
    assert!(matches!(h.app.submit(vec![]).await, Err(Error::InvalidTask(_))));
}

#[tokio::test]
async fn test_concurrent_submissions() {
    let h = Harness::new();
    h.app.register("double", double).unwrap();
    h.start(4);

    let mut results = Vec::new();
    for i in 0..20i64 {
        let result = h.app.submit_task(task("double").arg(&i).build().unwrap()).await.unwrap();
        results.push((i, result));
    }

    let values = futures::future::join_all(results.iter().map(|(_, r)| h.wait(r))).await;
    for ((i, _), value) in results.iter().zip(values) {
        assert_eq!(value.unwrap(), Some(vec![Value::from(i * 2)]));
    }
}
