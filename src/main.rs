//! blobtier - operator CLI
//!
//! Drives a cache engine against a cache directory: fetch objects through
//! the cache, warm it, inspect it and run maintenance.
//!
//! ```text
//! blobtier --cache-dir /var/cache/images get https://cdn.example.com/a.jpg --out a.jpg
//! blobtier --config cache.yaml stats --format prometheus
//! blobtier trim
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context};
use blobtier::cache::encode_prometheus;
use blobtier::{CacheConfig, CacheEngine, FetchResult};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// =============================================================================
// CLI Arguments
// =============================================================================

/// blobtier - Two-tier binary object cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, short, env = "BLOBTIER_CONFIG")]
    config: Option<PathBuf>,

    /// Disk tier directory
    #[arg(long, env = "BLOBTIER_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Memory tier budget in bytes
    #[arg(long, env = "BLOBTIER_MEMORY_BUDGET_BYTES")]
    memory_budget_bytes: Option<u64>,

    /// Disk tier budget in bytes
    #[arg(long, env = "BLOBTIER_DISK_BUDGET_BYTES")]
    disk_budget_bytes: Option<u64>,

    /// Maximum disk entry age in seconds
    #[arg(long, env = "BLOBTIER_MAX_ENTRY_AGE_SECS")]
    max_entry_age_secs: Option<u64>,

    /// Origin connect timeout in milliseconds
    #[arg(long, env = "BLOBTIER_CONNECT_TIMEOUT_MS")]
    connect_timeout_ms: Option<u64>,

    /// Origin read timeout in milliseconds
    #[arg(long, env = "BLOBTIER_READ_TIMEOUT_MS")]
    read_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch an object through the cache
    Get {
        /// Source identifier (URL)
        identifier: String,

        /// Write the payload to this file
        #[arg(long, short)]
        out: Option<PathBuf>,
    },

    /// Warm the cache with several objects
    Preload {
        /// Source identifiers (URLs)
        #[arg(required = true)]
        identifiers: Vec<String>,
    },

    /// Remove an object from both tiers
    Evict {
        /// Source identifier (URL)
        identifier: String,
    },

    /// Report whether an object is cached
    Status {
        /// Source identifier (URL)
        identifier: String,
    },

    /// Print cache statistics
    Stats {
        #[arg(long, value_enum, default_value_t = StatsFormat::Text)]
        format: StatsFormat,
    },

    /// Trim the disk tier by age and size
    Trim,

    /// Delete every disk tier entry
    Clear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StatsFormat {
    Text,
    Json,
    Prometheus,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let config = load_config(&args)?;
    debug!("Using cache directory {}", config.cache_dir.display());

    let engine = CacheEngine::new(config).context("failed to start cache engine")?;

    match args.command {
        Command::Get { identifier, out } => get(&engine, &identifier, out).await?,
        Command::Preload { identifiers } => {
            let summary = engine.preload(&identifiers).await;
            println!(
                "requested={} fetched={} already_cached={} failed={}",
                summary.requested, summary.fetched, summary.already_cached, summary.failed
            );
            if summary.failed > 0 {
                bail!("{} of {} preloads failed", summary.failed, summary.requested);
            }
        }
        Command::Evict { identifier } => {
            let removed = engine.evict(&identifier).await;
            println!("{}", if removed { "evicted" } else { "not cached" });
        }
        Command::Status { identifier } => {
            let cached = engine.is_cached(&identifier).await;
            println!("{}", if cached { "cached" } else { "not cached" });
        }
        Command::Stats { format } => print_stats(&engine, format)?,
        Command::Trim => {
            let report = engine.trim_disk().await;
            println!(
                "removed={} freed_bytes={} remaining_bytes={}",
                report.removed, report.freed_bytes, report.remaining_bytes
            );
        }
        Command::Clear => {
            let removed = engine.clear_disk().await;
            println!("removed={}", removed);
        }
    }

    Ok(())
}

async fn get(
    engine: &CacheEngine,
    identifier: &str,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let (payload, source) = match engine.get(identifier).await {
        FetchResult::Success { payload, source } => (payload, source),
        FetchResult::Failure(e) => bail!("failed to fetch {}: {}", identifier, e),
    };

    info!("Served {} from {}", identifier, source);
    match out {
        Some(path) => {
            tokio::fs::write(&path, payload.data())
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("{} bytes from {} -> {}", payload.size_bytes(), source, path.display());
        }
        None => match payload.dimensions() {
            Some(dims) => println!("{} bytes ({}) from {}", payload.size_bytes(), dims, source),
            None => println!("{} bytes from {}", payload.size_bytes(), source),
        },
    }
    Ok(())
}

fn print_stats(engine: &CacheEngine, format: StatsFormat) -> anyhow::Result<()> {
    let stats = engine.stats();
    match format {
        StatsFormat::Text => {
            println!(
                "memory: {} entries, {} / {} bytes",
                stats.memory_entries, stats.memory_resident_bytes, stats.memory_capacity_bytes
            );
            println!(
                "disk:   {} / {} bytes",
                stats.disk_resident_bytes,
                engine.config().disk_budget_bytes
            );
            println!(
                "hits:   memory {:.1}%, disk {:.1}%",
                stats.memory_hit_rate() * 100.0,
                stats.disk_hit_rate() * 100.0
            );
        }
        StatsFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        StatsFormat::Prometheus => print!("{}", encode_prometheus(&stats)?),
    }
    Ok(())
}

// =============================================================================
// Configuration
// =============================================================================

fn load_config(args: &Args) -> anyhow::Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CacheConfig::default(),
    };

    if let Some(dir) = &args.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(bytes) = args.memory_budget_bytes {
        config.memory_budget_bytes = bytes;
    }
    if let Some(bytes) = args.disk_budget_bytes {
        config.disk_budget_bytes = bytes;
    }
    if let Some(secs) = args.max_entry_age_secs {
        config.max_entry_age_secs = secs;
    }
    if let Some(ms) = args.connect_timeout_ms {
        config.connect_timeout_ms = ms;
    }
    if let Some(ms) = args.read_timeout_ms {
        config.read_timeout_ms = ms;
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    // Logs go to stderr; stdout carries command output
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}
