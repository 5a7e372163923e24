use asq_broker::{RedisBackend, RedisBroker, RedisConfig};
use asq_worker::{HandlerRegistry, Worker, WorkerConfig};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "asq-worker")]
#[command(about = "Distributed Task Queue Worker", long_about = None)]
struct Args {
    /// Redis URL
    #[arg(long)]
    redis_url: Option<String>,

    /// Key namespace shared with producers
    #[arg(short, long)]
    namespace: Option<String>,

    /// Worker ID (auto-generated if not provided)
    #[arg(long)]
    worker_id: Option<String>,

    /// Number of concurrent poll loops
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Task names to serve (defaults to every registered name)
    #[arg(short, long, value_delimiter = ',')]
    queues: Vec<String>,

    /// Path to worker configuration file
    #[arg(long)]
    config: Option<String>,

    /// Path to redis configuration file
    #[arg(long)]
    redis_config: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn double(x: i64) -> Result<i64, String> {
    Ok(x * 2)
}

fn inc(x: i64) -> Result<i64, String> {
    Ok(x + 1)
}

fn concat(a: String, b: String) -> Result<String, String> {
    Ok(a + &b)
}

fn fail() -> Result<(), String> {
    Err("always fails".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }

    // Load configuration
    let mut config = match &args.config {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };
    let mut redis_config = match &args.redis_config {
        Some(path) => RedisConfig::from_file(path)?,
        None => RedisConfig::default(),
    };

    // Override with CLI args
    if let Some(url) = args.redis_url {
        redis_config.url = url;
    }
    if let Some(namespace) = args.namespace {
        redis_config.namespace = namespace;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if !args.queues.is_empty() {
        config.queues = args.queues;
    }
    if let Some(worker_id) = args.worker_id {
        config.worker_id = Some(worker_id);
    }

    let registry = HandlerRegistry::new();
    registry.register("double", double)?;
    registry.register("inc", inc)?;
    registry.register("concat", concat)?;
    registry.register("fail", fail)?;

    let broker = RedisBroker::new(&redis_config)?;
    broker.ping().await?;
    let backend = RedisBackend::new(&redis_config)?;
    tracing::info!(
        url = %redis_config.url,
        namespace = %redis_config.namespace,
        "Connected to redis"
    );

    let worker = Worker::new(config, Arc::new(broker), Arc::new(backend), Arc::new(registry));

    // Handle shutdown signals
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal");
        token.cancel();
    });

    worker.run(cancel).await;

    Ok(())
}
