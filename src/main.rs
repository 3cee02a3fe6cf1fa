//! stalecache demo
//!
//! Drives a [`Store`] against a simulated network to show single-flight
//! loading, stale policies and invalidation streams, then prints a JSON
//! statistics report.
//!
//! # Flow
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │   N callers  │───▶│    Store     │───▶│  Persister   │───▶│  Simulated   │
//! │  × M keys    │    │  (memory)    │    │  (in-memory) │    │   network    │
//! └──────────────┘    └──────────────┘    └──────────────┘    └──────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stalecache::cache::CacheConfig;
use stalecache::store::PersisterStats;
use stalecache::{CacheStats, InMemoryPersister, StalePolicy, Store, StoreBuilder, SystemClock};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Two-tier read-through cache demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Optional YAML config file; CLI flags take precedence
    #[arg(long, env = "STALECACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Stale policy (unspecified, network_before_stale, refresh_on_stale, cache_only)
    #[arg(long, env = "STALE_POLICY")]
    stale_policy: Option<String>,

    /// Number of distinct keys
    #[arg(long, env = "KEYS")]
    keys: Option<u32>,

    /// Concurrent callers per key
    #[arg(long, env = "CALLERS")]
    callers: Option<u32>,

    /// Memory TTL after write, in seconds
    #[arg(long, env = "TTL_SECONDS")]
    ttl_seconds: Option<u64>,

    /// Persisted record freshness window, in seconds
    #[arg(long, env = "FRESHNESS_SECONDS")]
    freshness_seconds: Option<u64>,

    /// Maximum resident memory entries
    #[arg(long, env = "MAX_SIZE")]
    max_size: Option<u64>,

    /// Simulated network latency in milliseconds
    #[arg(long, env = "FETCH_DELAY_MS")]
    fetch_delay_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

/// Settings read from the YAML config file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    stale_policy: Option<String>,
    keys: Option<u32>,
    callers: Option<u32>,
    ttl_seconds: Option<u64>,
    freshness_seconds: Option<u64>,
    max_size: Option<u64>,
    fetch_delay_ms: Option<u64>,
}

impl FileConfig {
    fn load(path: &Path) -> stalecache::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

/// Effective settings after merging CLI, file and defaults
#[derive(Debug)]
struct Settings {
    stale_policy: StalePolicy,
    keys: u32,
    callers: u32,
    ttl: Duration,
    freshness: Duration,
    max_size: Option<u64>,
    fetch_delay: Duration,
}

impl Settings {
    fn resolve(args: &Args, file: FileConfig) -> stalecache::Result<Self> {
        // Unknown policy names are fatal, never defaulted
        let stale_policy = match args.stale_policy.as_ref().or(file.stale_policy.as_ref()) {
            Some(name) => name.parse()?,
            None => StalePolicy::default(),
        };
        Ok(Self {
            stale_policy,
            keys: args.keys.or(file.keys).unwrap_or(8),
            callers: args.callers.or(file.callers).unwrap_or(4),
            ttl: Duration::from_secs(args.ttl_seconds.or(file.ttl_seconds).unwrap_or(30)),
            freshness: Duration::from_secs(
                args.freshness_seconds
                    .or(file.freshness_seconds)
                    .unwrap_or(60),
            ),
            max_size: args.max_size.or(file.max_size),
            fetch_delay: Duration::from_millis(
                args.fetch_delay_ms.or(file.fetch_delay_ms).unwrap_or(50),
            ),
        })
    }
}

#[derive(Debug, Serialize)]
struct Report {
    stale_policy: StalePolicy,
    keys: u32,
    callers: u32,
    network_fetches: u64,
    stream_emissions: usize,
    memory: CacheStats,
    persister: PersisterStats,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let file = match &args.config {
        Some(path) => FileConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(&args, file).context("invalid configuration")?;

    info!("Starting stalecache demo");
    info!("  Stale policy: {}", settings.stale_policy);
    info!("  Keys: {}, callers per key: {}", settings.keys, settings.callers);
    info!("  Memory TTL: {:?}", settings.ttl);

    let clock = SystemClock::shared();
    let persister = Arc::new(InMemoryPersister::<u32, String>::new(
        settings.freshness,
        clock.clone(),
    ));
    let fetches = Arc::new(AtomicU64::new(0));

    let mut cache_config = CacheConfig::new().with_expire_after_write(settings.ttl);
    if let Some(max_size) = settings.max_size {
        cache_config = cache_config.with_max_size(max_size);
    }

    let counter = fetches.clone();
    let delay = settings.fetch_delay;
    let store: Store<u32, String> = StoreBuilder::from_fn(move |key: u32| {
        let n = counter.fetch_add(1, Ordering::Relaxed);
        async move {
            tokio::time::sleep(delay).await;
            Ok::<_, stalecache::Error>(format!("value-{}-v{}", key, n))
        }
    })
    .persister(persister.clone())
    .stale_policy(settings.stale_policy)
    .cache_config(cache_config)
    .clock(clock)
    .build()
    .context("building store")?;

    // Every caller asks for every key at once; each key should hit the
    // network at most once.
    let mut tasks = Vec::new();
    for caller in 0..settings.callers {
        for key in 0..settings.keys {
            let store = store.clone();
            tasks.push(tokio::spawn(async move { (caller, key, store.get(key).await) }));
        }
    }
    for task in tasks {
        let (caller, key, result) = task.await?;
        match result {
            Ok(value) => tracing::debug!(caller, key, %value, "served"),
            Err(err) => tracing::warn!(caller, key, error = %err, "get failed"),
        }
    }
    info!(
        "Concurrent phase done: {} network fetches for {} keys",
        fetches.load(Ordering::Relaxed),
        settings.keys
    );

    // Clearing a key restarts its stream
    let mut stream_emissions = 0;
    if settings.keys > 0 {
        let mut stream = Box::pin(store.stream(0));
        if let Some(first) = stream.next().await {
            stream_emissions += 1;
            info!("Stream first emission: {:?}", first);
        }
        store.clear(&0).await?;
        if let Some(second) = stream.next().await {
            stream_emissions += 1;
            info!("Stream after clear: {:?}", second);
        }
    }

    let report = Report {
        stale_policy: settings.stale_policy,
        keys: settings.keys,
        callers: settings.callers,
        network_fetches: fetches.load(Ordering::Relaxed),
        stream_emissions,
        memory: store.stats(),
        persister: persister.stats(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    info!("Demo complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
