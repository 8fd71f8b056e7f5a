use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tokenhive::config::TokenHiveConfig;
use tokenhive::ratelimit::{LocalBucket, RateLimiterBackend, TokenLimiter};
use tokenhive::store::{RedisStore, SharedStore};

#[derive(Parser, Debug)]
#[command(name = "tokenhive", version, about = "Distributed token bucket rate limiting")]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the store URL from the configuration
    #[arg(long, global = true)]
    redis_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fire concurrent admissions at one instant and report the outcome
    Burst {
        #[arg(long, default_value = "tokenhive-demo")]
        key: String,
        #[arg(long, default_value_t = 20)]
        requests: usize,
        #[arg(long, default_value_t = 1)]
        hits: u32,
        /// Use a process-local bucket instead of the shared store
        #[arg(long)]
        local_only: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Request one admission per interval until interrupted
    Watch {
        #[arg(long, default_value = "tokenhive-demo")]
        key: String,
        #[arg(long, default_value_t = 200)]
        interval_ms: u64,
    },
    /// Probe the shared store once
    Ping,
}

#[derive(Debug, Serialize)]
struct BurstReport {
    key: String,
    mode: &'static str,
    requests: usize,
    hits: u32,
    admitted: usize,
    rejected: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = TokenHiveConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.redis_url {
        config.store.url = url;
    }
    info!(
        store = %config.store.url,
        rate = config.limiter.rate,
        capacity = config.limiter.capacity,
        "Configuration loaded"
    );

    match cli.command {
        Command::Burst {
            key,
            requests,
            hits,
            local_only,
            json,
        } => {
            let backend: Arc<dyn RateLimiterBackend> = if local_only {
                Arc::new(LocalBucket::new(config.limiter.bucket_params()?))
            } else {
                let store = Arc::new(RedisStore::connect(&config.store).await?);
                Arc::new(TokenLimiter::from_config(key.clone(), &config.limiter, store)?)
            };
            let mode = if local_only { "local" } else { "distributed" };

            let now = Utc::now();
            let tasks = (0..requests).map(|_| {
                let backend = backend.clone();
                tokio::spawn(async move { backend.allow(now, hits).await })
            });
            let mut admitted = 0;
            for result in join_all(tasks).await {
                if result? {
                    admitted += 1;
                }
            }

            let report = BurstReport {
                key,
                mode,
                requests,
                hits,
                admitted,
                rejected: requests - admitted,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                info!(
                    key = %report.key,
                    mode = report.mode,
                    admitted = report.admitted,
                    rejected = report.rejected,
                    "Burst finished"
                );
            }
        }
        Command::Watch { key, interval_ms } => {
            let store = Arc::new(RedisStore::connect(&config.store).await?);
            let limiter = TokenLimiter::from_config(key, &config.limiter, store)?;
            watch(&limiter, Duration::from_millis(interval_ms.max(1))).await;
        }
        Command::Ping => {
            let store = RedisStore::connect(&config.store).await?;
            store.ping().await?;
            info!(store = %config.store.url, "Shared store is reachable");
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn watch<S: SharedStore + ?Sized + 'static>(limiter: &TokenLimiter<S>, interval: Duration) {
    info!(key = %limiter.key(), interval_ms = interval.as_millis() as u64, "Watching limiter");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(interval);
    let mut health = limiter.health();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let allowed = limiter.allow_now().await;
                let current = limiter.health();
                if current != health {
                    warn!(from = ?health, to = ?current, "Limiter health changed");
                    health = current;
                }
                info!(allowed, health = ?current, "Admission decision");
            }
        }
    }

    info!("Watch stopped");
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
