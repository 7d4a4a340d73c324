use log::{debug, info, warn};

use crate::config::SearchConfig;
use crate::error::{CollectError, Result};
use crate::metrics::{METRICS, incr};
use crate::pool::AppPool;
use crate::util::{Shutdown, sleep_or_cancel};

use super::{BatchProcessor, Collector, Fetch};

/// Totals reported when a run ends.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Passes over the whole pool
    pub rounds: usize,

    /// Successful searches
    pub fetches: usize,

    /// Statuses handed to the processor
    pub tweets: usize,

    /// Cursor when the run ended, for resuming later
    pub cursor: Option<u64>,
}

/// Builds a collector for `config.mode` and runs it over the pool.
pub async fn fetch_tweets<P: BatchProcessor>(
    pool: &AppPool,
    processor: P,
    config: &SearchConfig,
    shutdown: Shutdown,
) -> Result<RunSummary> {
    info!(
        "Search {:?} with params = {:?}",
        config.mode, config.params
    );
    let mut collector = Collector::new(processor, config, shutdown);
    run(pool, &mut collector).await
}

/// Drives `collector` across every app of the pool.
///
/// Each round:
/// - checks the app identity, skipping apps that fail the check
/// - fetches with the same app until it raises an error
///   (rate limited or otherwise), then moves to the next app
/// - sleeps for the collector interval if no app fetched anything
///
/// GUARANTEES:
/// - Never exits in `New` mode except on shutdown
/// - Returns `Ok` once a `Past` collector runs out of history
///
/// TODO:
/// - Skip apps that reported user-not-found / suspended in later rounds
///
pub async fn run<P: BatchProcessor>(
    pool: &AppPool,
    collector: &mut Collector<P>,
) -> Result<RunSummary> {
    info!("Starting to collect...");
    let shutdown = collector.shutdown().clone();
    let mut summary = RunSummary::default();

    loop {
        summary.rounds += 1;
        let mut one_worked = false;

        for app in pool.iter() {
            if shutdown.is_triggered() {
                return Err(CollectError::Cancelled);
            }

            let user = match app.me().await {
                Ok(user) => user,
                Err(e) => {
                    warn!("app {} - {}", app.name(), e);
                    incr(&METRICS.api_errors);
                    continue;
                }
            };
            info!("Trying app {}", user.screen_name);

            // Keep using this app until it gives up
            loop {
                match collector.fetch(app).await {
                    Ok(Fetch::Batch(batch)) => {
                        one_worked = true;
                        summary.fetches += 1;
                        summary.tweets += batch.len();
                        summary.cursor = collector.cursor();
                    }

                    Ok(Fetch::Exhausted) => {
                        info!(
                            "History exhausted after {} fetches ({} tweets)",
                            summary.fetches, summary.tweets
                        );
                        summary.cursor = collector.cursor();
                        return Ok(summary);
                    }

                    Err(CollectError::Cancelled) => return Err(CollectError::Cancelled),

                    Err(e) => {
                        if e.api_error().is_some_and(|a| a.is_rate_limit()) {
                            incr(&METRICS.rate_limits);
                        } else {
                            incr(&METRICS.api_errors);
                        }
                        warn!("app {} - {}", user.screen_name, e);
                        break;
                    }
                }
            }
        }

        if !one_worked {
            info!(
                "Sleeping for {} minutes",
                collector.interval().as_secs_f64() / 60.0
            );
            incr(&METRICS.idle_sleeps);
            sleep_or_cancel(collector.interval(), &shutdown).await?;
        } else {
            debug!("Trying again");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::error::ApiError;
    use crate::schema::{Query, Status};
    use crate::testing::{ScriptedApp, as_app};
    use std::sync::Arc;
    use std::time::Duration;

    fn pool_of(apps: &[Arc<ScriptedApp>]) -> AppPool {
        AppPool::new(apps.iter().map(as_app).collect()).unwrap()
    }

    fn past(max_id: Option<u64>) -> SearchConfig {
        let mut cfg = SearchConfig::new(Mode::Past, 1.0, Query::new());
        cfg.max_id = max_id;
        cfg
    }

    #[tokio::test(start_paused = true)]
    async fn drains_each_app_before_rotating() {
        let apps = vec![
            ScriptedApp::new("a").page(&[100, 99]).page(&[98]).shared(),
            ScriptedApp::new("b").page(&[97, 96]).search(Ok(vec![])).shared(),
        ];
        let pool = pool_of(&apps);

        let mut ids = Vec::new();
        let processor = |batch: &[Status], _: &Query| ids.extend(batch.iter().map(|s| s.id));

        let summary = fetch_tweets(&pool, processor, &past(None), Shutdown::never())
            .await
            .unwrap();

        assert_eq!(ids, vec![100, 99, 98, 97, 96]);
        assert_eq!(summary.fetches, 3);
        assert_eq!(summary.tweets, 5);
        assert_eq!(summary.rounds, 1);
        assert_eq!(summary.cursor, Some(95));

        // a: two pages, then rate limited; b: one page, then empty.
        assert_eq!(apps[0].search_count(), 3);
        assert_eq!(apps[1].search_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_identity_check_skips_the_app() {
        let apps = vec![
            ScriptedApp::new("a").me(Err(ApiError::UserSuspended)).shared(),
            ScriptedApp::new("b").page(&[10]).search(Ok(vec![])).shared(),
        ];
        let pool = pool_of(&apps);

        let summary = fetch_tweets(&pool, |_: &[Status], _: &Query| {}, &past(None), Shutdown::never())
            .await
            .unwrap();

        assert_eq!(apps[0].search_count(), 0);
        assert_eq!(summary.tweets, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_when_every_app_is_exhausted() {
        // Round 1: everyone rate limited. Round 2: data, then history ends.
        let apps = vec![
            ScriptedApp::new("a")
                .search(Err(ApiError::RateLimited))
                .page(&[50])
                .search(Ok(vec![]))
                .shared(),
            ScriptedApp::new("b").search(Err(ApiError::RateLimited)).shared(),
        ];
        let pool = pool_of(&apps);

        let start = tokio::time::Instant::now();
        let summary = fetch_tweets(&pool, |_: &[Status], _: &Query| {}, &past(None), Shutdown::never())
            .await
            .unwrap();

        assert_eq!(summary.rounds, 2);
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(*apps[1].me_calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_rotate_instead_of_aborting() {
        let apps = vec![
            ScriptedApp::new("a")
                .search(Err(ApiError::from_code(503, None, "over capacity")))
                .shared(),
            ScriptedApp::new("b").page(&[7]).search(Ok(vec![])).shared(),
        ];
        let pool = pool_of(&apps);

        let summary = fetch_tweets(&pool, |_: &[Status], _: &Query| {}, &past(None), Shutdown::never())
            .await
            .unwrap();

        assert_eq!(summary.tweets, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_new_mode() {
        let apps = vec![ScriptedApp::new("a").shared()];
        let pool = pool_of(&apps);
        let (trigger, shutdown) = Shutdown::new();

        let cfg = SearchConfig::new(Mode::New, 5.0, Query::new());
        let handle = tokio::spawn(async move {
            fetch_tweets(&pool, |_: &[Status], _: &Query| {}, &cfg, shutdown).await
        });

        // Let it go through a few idle rounds first.
        tokio::time::sleep(Duration::from_secs(20 * 60)).await;
        trigger.trigger();

        let res = handle.await.unwrap();
        assert!(matches!(res, Err(CollectError::Cancelled)));
        assert!(apps[0].search_count() >= 2);
    }
}
