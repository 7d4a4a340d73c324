use std::time::Duration;

use log::{error, info, warn};
use rustls::crypto::{CryptoProvider, ring};
use tokio::time::sleep;

use tweet_multi_collector::config::{self, Config, TaskConfig};
use tweet_multi_collector::lookup::{LookupOptions, fetch_many};
use tweet_multi_collector::metrics::METRICS;
use tweet_multi_collector::streaming::{StatusWorker, StreamOptions, create_queue, stream_query};
use tweet_multi_collector::{
    AppPool, CollectError, Query, Shutdown, Status, fetch_tweets, logging,
};

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize cryptography backend (rustls)
// - Load configuration and app credentials
// - Wire Ctrl+C to the shutdown signal
// - Run the configured task (search, lookup or stream)
//
// Fetched statuses are written to stdout as JSON lines; logs go
// to stderr, so the output can be piped straight into a file.
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // rustls >= 0.23 requires an explicit CryptoProvider,
    // installed once, before any client is built.
    CryptoProvider::install_default(ring::default_provider())
        .map_err(|_| anyhow::anyhow!("failed to install rustls CryptoProvider"))?;

    let path = std::env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
    let config: Config = config::load_config(&path)?;
    logging::init(config.verbose());

    let keys = config::load_apps(&config.apps_file)?;
    let pool = AppPool::from_keys(&keys, &config.api)?;
    METRICS.apps_active.store(pool.len(), std::sync::atomic::Ordering::Relaxed);

    let (trigger, shutdown) = Shutdown::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            trigger.trigger();
        }
    });

    spawn_metrics_reporter(&config);

    let outcome = match &config.task {
        TaskConfig::Search(search) => {
            fetch_tweets(&pool, print_batch, search, shutdown)
                .await
                .map(|summary| {
                    info!(
                        "Done: {} tweets in {} fetches, cursor {:?}",
                        summary.tweets, summary.fetches, summary.cursor
                    );
                })
        }

        TaskConfig::Lookup(lookup) => {
            let ids = config::load_ids(&lookup.ids_file)?;
            fetch_many(
                &pool,
                ids,
                |_, status| print_status(&status),
                |id, e| warn!("{} failed: {}", id, e),
                &LookupOptions::from(lookup),
                &shutdown,
            )
            .await
            .map(|(ok, failed)| info!("Done: {} fetched, {} failed", ok, failed))
        }

        TaskConfig::Stream(stream) => {
            let (queue, workers) = create_queue(stream.workers, || PrintWorker);

            // One stream per query; the first app is enough.
            let app = pool.iter().next().cloned().ok_or(CollectError::NoAppLeft)?;
            let handle = stream_query(
                stream.query.clone(),
                app,
                queue,
                StreamOptions::from(stream),
                shutdown,
            );

            handle.join().await;
            workers.shutdown().await;
            Ok(())
        }
    };

    match outcome {
        Ok(()) | Err(CollectError::Cancelled) => Ok(()),
        Err(e) => {
            error!("{}", e);
            Err(e.into())
        }
    }
}

/// Writes a fetched batch to stdout.
fn print_batch(batch: &[Status], _query: &Query) {
    for status in batch {
        print_status(status);
    }
}

fn print_status(status: &Status) {
    match serde_json::to_string(status) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("could not serialize status {}: {}", status.id, e),
    }
}

/// Stream worker writing each status to stdout.
struct PrintWorker;

#[async_trait::async_trait]
impl StatusWorker for PrintWorker {
    async fn work(&mut self, status: Status, _query: &str) {
        print_status(&status);
    }
}

// ------------------------------------------------------------
// Metrics reporter (periodic, low-noise)
// ------------------------------------------------------------
fn spawn_metrics_reporter(config: &Config) {
    let every = config
        .debug
        .as_ref()
        .and_then(|d| d.metrics_secs)
        .unwrap_or(60);
    if every == 0 {
        return;
    }

    tokio::spawn(async move {
        loop {
            sleep(Duration::from_secs(every)).await;
            info!("[METRICS] {}", METRICS.summary());
        }
    });
}
