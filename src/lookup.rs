//! Parallel lookup of individual statuses by id.
//!
//! Ids are shuffled and dealt round-robin to the apps of the pool.
//! Each app gets one worker task that works through its share,
//! backing off on rate limits without handing the id to another app.
//! Results flow back over a channel and reach the caller's callbacks
//! as soon as they arrive.

use std::time::Duration;

use log::{error, info, warn};
use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::api::App;
use crate::config::LookupConfig;
use crate::error::{ApiError, CollectError, Result};
use crate::metrics::{METRICS, incr};
use crate::pool::AppPool;
use crate::schema::Status;
use crate::util::{Backoff, Shutdown, sleep_or_cancel};

type LookupResult = (u64, std::result::Result<Status, ApiError>);

#[derive(Debug, Clone)]
pub struct LookupOptions {
    /// First delay after a rate limit; doubles on each retry
    pub base_delay: Duration,

    /// Upper bound for a single delay, `None` for unbounded doubling
    pub max_delay: Option<Duration>,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            max_delay: Some(Duration::from_secs(15 * 60)),
        }
    }
}

impl From<&LookupConfig> for LookupOptions {
    fn from(cfg: &LookupConfig) -> Self {
        Self {
            base_delay: Duration::from_secs(cfg.base_delay_secs),
            max_delay: cfg.max_delay_secs.map(Duration::from_secs),
        }
    }
}

/// Deals `ids` round-robin over `n` workers.
fn deal(ids: Vec<u64>, n: usize) -> Vec<Vec<u64>> {
    let mut shares = vec![Vec::with_capacity(ids.len() / n + 1); n];
    for (i, id) in ids.into_iter().enumerate() {
        shares[i % n].push(id);
    }
    shares
}

/// Fetches every id once, in parallel across the pool.
///
/// - `on_success(id, status)` / `on_error(id, error)` are called exactly
///   once per input id, in completion order
/// - returns `(successes, errors)`, matching the callback counts
/// - rate limits are retried on the same app with doubling delays;
///   any other error is final for that id
///
/// Returns `Cancelled` if shutdown interrupts a backoff, and
/// `Incomplete` if a worker died with ids left in its share.
/// Callbacks already delivered stay delivered.
pub async fn fetch_many<S, E>(
    pool: &AppPool,
    ids: Vec<u64>,
    mut on_success: S,
    mut on_error: E,
    options: &LookupOptions,
    shutdown: &Shutdown,
) -> Result<(usize, usize)>
where
    S: FnMut(u64, Status),
    E: FnMut(u64, ApiError),
{
    let mut ids = ids;
    ids.shuffle(&mut rand::rng());
    let total = ids.len();

    info!("Looking up {} ids with {} apps", total, pool.len());

    let (tx, mut rx) = mpsc::unbounded_channel::<LookupResult>();
    let mut workers = JoinSet::new();

    for (app, share) in pool.iter().zip(deal(ids, pool.len())) {
        if share.is_empty() {
            continue;
        }

        let app = app.clone();
        let tx = tx.clone();
        let options = options.clone();
        let shutdown = shutdown.clone();

        workers.spawn(async move { lookup_worker(app, share, tx, options, shutdown).await });
    }

    // Workers hold the remaining senders; the loop ends when they are done.
    drop(tx);

    let (mut ok, mut failed) = (0usize, 0usize);
    while let Some((id, result)) = rx.recv().await {
        match result {
            Ok(status) => {
                ok += 1;
                on_success(id, status);
            }
            Err(e) => {
                failed += 1;
                on_error(id, e);
            }
        }
    }

    let mut cancelled = false;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(CollectError::Cancelled)) => cancelled = true,
            Ok(Err(e)) => error!("lookup worker failed: {}", e),
            Err(e) => error!("lookup worker crashed: {}", e),
        }
    }

    if cancelled {
        warn!("Lookup cancelled after {} of {} ids", ok + failed, total);
        return Err(CollectError::Cancelled);
    }

    let lost = total - (ok + failed);
    if lost > 0 {
        error!("{} of {} ids lost with their workers", lost, total);
        return Err(CollectError::Incomplete { lost, total });
    }

    info!("{} statuses fetched, {} errors", ok, failed);
    Ok((ok, failed))
}

/// Works through one app's share of ids.
async fn lookup_worker(
    app: App,
    ids: Vec<u64>,
    tx: mpsc::UnboundedSender<LookupResult>,
    options: LookupOptions,
    shutdown: Shutdown,
) -> Result<()> {
    for id in ids {
        let mut backoff = Backoff::new(options.base_delay, options.max_delay);

        let result = loop {
            match app.get_status(id).await {
                Err(e) if e.is_rate_limit() => {
                    let delay = backoff.next_delay();
                    warn!(
                        "{} rate limited on {}, retrying in {}s",
                        app.name(),
                        id,
                        delay.as_secs()
                    );
                    incr(&METRICS.rate_limits);
                    incr(&METRICS.backoffs);
                    sleep_or_cancel(delay, &shutdown).await?;
                }
                other => break other,
            }
        };

        match &result {
            Ok(_) => incr(&METRICS.lookups_ok),
            Err(_) => incr(&METRICS.lookups_failed),
        }

        if tx.send((id, result)).is_err() {
            // Receiver gone: nobody is listening anymore.
            break;
        }
    }

    Ok(())
}
