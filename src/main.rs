//! Readthrough smoke workload
//!
//! Runs a short write/read/bulk/delete workload and logs how long each
//! phase took. Uses the in-memory backend, or Redis when built with the
//! `redis` feature and `READTHROUGH_REDIS_URL` is set.

use std::time::{Duration, Instant};

use anyhow::Context as _;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use readthrough::backend::MemoryBackend;
use readthrough::lru::LruStore;
use readthrough::{Cache, Config, Options, Value};

const ITERATIONS: usize = 1_000;
const MULTI_KEYS: usize = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" for this crate, override with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "readthrough=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Configuration loaded: namespace={:?}, expires_in={:?}, compress={}, serializer={}, pool_size={}",
        config.namespace,
        config.expires_in,
        config.compress,
        config.serializer.name(),
        config.pool_size
    );

    let cache = build_cache(config)?;

    single_round_trips(&cache).await?;
    compressed_round_trips(&cache).await?;
    bulk_round_trips(&cache).await?;
    cleanup(&cache).await?;
    lru_round_trips();

    info!("Smoke workload complete");
    Ok(())
}

#[cfg(feature = "redis")]
fn build_cache(config: Config) -> anyhow::Result<Cache> {
    match std::env::var("READTHROUGH_REDIS_URL") {
        Ok(url) => {
            info!("Using Redis backend at {}", url);
            let connector = readthrough::backend::RedisConnector::new(&url)
                .with_context(|| format!("invalid Redis URL {}", url))?;
            Ok(Cache::new(connector, config)?)
        }
        Err(_) => memory_cache(config),
    }
}

#[cfg(not(feature = "redis"))]
fn build_cache(config: Config) -> anyhow::Result<Cache> {
    memory_cache(config)
}

fn memory_cache(config: Config) -> anyhow::Result<Cache> {
    info!("Using in-memory backend");
    Cache::new(MemoryBackend::new(), config).context("failed to build cache")
}

fn report(phase: &str, operations: usize, elapsed: Duration) {
    let per_op = elapsed.as_secs_f64() * 1_000_000.0 / operations.max(1) as f64;
    info!(
        "{}: {} ops in {:.2?} ({:.1}µs/op)",
        phase, operations, elapsed, per_op
    );
}

async fn single_round_trips(cache: &Cache) -> anyhow::Result<()> {
    let options = Options::new();
    let started = Instant::now();

    for i in 0..ITERATIONS {
        let key = format!("smoke:single:{}", i % 26);
        cache.write(&key, &Value::from(i as i64), &options).await?;
        cache.read(&key, &options).await?;
    }

    report("write/read", ITERATIONS * 2, started.elapsed());
    Ok(())
}

async fn compressed_round_trips(cache: &Cache) -> anyhow::Result<()> {
    let options = Options::new().compress(true).compression_threshold(128);
    let text = Value::from("An abstract cache store. ".repeat(64));
    let started = Instant::now();

    for _ in 0..ITERATIONS {
        cache.write("smoke:compressed", &text, &options).await?;
        cache.read("smoke:compressed", &options).await?;
    }

    report("compressed write/read", ITERATIONS * 2, started.elapsed());
    Ok(())
}

async fn bulk_round_trips(cache: &Cache) -> anyhow::Result<()> {
    let options = Options::new();
    let keys: Vec<String> = (0..MULTI_KEYS).map(|i| format!("smoke:multi:{}", i)).collect();

    cache
        .write_multi(
            keys.iter().map(|k| (k.clone(), Value::from(k.as_str()))),
            &options,
        )
        .await?;

    let started = Instant::now();
    for _ in 0..ITERATIONS / 10 {
        let found = cache.read_multi(&keys, &options).await?;
        anyhow::ensure!(found.len() == MULTI_KEYS, "read_multi lost keys");
    }
    report("read_multi", ITERATIONS / 10, started.elapsed());

    let started = Instant::now();
    let fetched = cache
        .fetch_multi(&["smoke:multi:0", "smoke:multi:missing"], &options, |key| async move {
            Value::from(key.to_uppercase())
        })
        .await?;
    report("fetch_multi", 1, started.elapsed());
    info!("fetch_multi returned {} values", fetched.len());

    Ok(())
}

async fn cleanup(cache: &Cache) -> anyhow::Result<()> {
    let started = Instant::now();
    let deleted = cache.delete_matched("smoke:*", &Options::new().count(100)).await?;
    report("delete_matched", 1, started.elapsed());
    info!("Deleted {} smoke keys", deleted);
    Ok(())
}

fn lru_round_trips() {
    let mut store = LruStore::new(256);
    let started = Instant::now();

    for i in 0..ITERATIONS * 10 {
        let key = format!("lru:{}", i % 512);
        if store.get(key.as_str()).is_none() {
            store.set(key, i, Some(Duration::from_secs(60)));
        }
    }

    report("lru get/set", ITERATIONS * 10, started.elapsed());
}
