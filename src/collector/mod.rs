/// Collector module
///
/// This module groups the search-side logic:
/// - `Collector`: one polling mode plus its cursor
/// - `runner`: the rotation loop driving a collector across apps
///
/// Two modes share the same query assembly:
/// - `New`: poll forward with `since_id`, sleep when nothing is new
/// - `Past`: paginate backward with `max_id`, stop when history runs out
///
/// The cursor only moves after a fetch that returned at least one
/// status. Empty pages and errors leave it untouched.
pub mod runner;

use std::time::Duration;

use log::{debug, info};

use crate::api::App;
use crate::config::{Mode, SearchConfig};
use crate::error::{CollectError, Result};
use crate::metrics::{METRICS, add, incr};
use crate::schema::{Query, Status, max_id, min_id};
use crate::util::{Shutdown, sleep_or_cancel};

/// Page size requested on every search.
pub const PAGE_SIZE: u64 = 1000;

const SINCE_ID: &str = "since_id";
const MAX_ID: &str = "max_id";

/// Receives every fetched batch together with the query that produced it.
///
/// Any `FnMut(&[Status], &Query) + Send` closure works.
#[async_trait::async_trait]
pub trait BatchProcessor: Send {
    async fn process(&mut self, batch: &[Status], query: &Query);
}

#[async_trait::async_trait]
impl<F> BatchProcessor for F
where
    F: FnMut(&[Status], &Query) + Send,
{
    async fn process(&mut self, batch: &[Status], query: &Query) {
        (self)(batch, query)
    }
}

/// Polling mode together with its cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Exclusive lower bound, grows after every non-empty page
    New { since_id: Option<u64> },

    /// Exclusive upper bound, shrinks after every non-empty page
    Past { max_id: Option<u64> },
}

/// Outcome of a single `Collector::fetch`.
#[derive(Debug)]
pub enum Fetch {
    /// One page, possibly empty in `New` mode
    Batch(Vec<Status>),

    /// `Past` mode reached the end of history
    Exhausted,
}

pub struct Collector<P> {
    processor: P,
    params: Query,
    interval: Duration,
    strategy: Strategy,
    finished: bool,
    shutdown: Shutdown,
}

impl<P: BatchProcessor> Collector<P> {
    /// Builds a collector from the search task configuration.
    ///
    /// The cursor key of the active mode found in `params` is used as
    /// seed when the explicit seed is missing; it never reaches the
    /// query as-is.
    pub fn new(processor: P, config: &SearchConfig, shutdown: Shutdown) -> Self {
        let mut params = config.params.clone();

        // Only the active mode's cursor key is taken out of `params`;
        // the other one is forwarded as a plain bound.
        let strategy = match config.mode {
            Mode::New => Strategy::New {
                since_id: seed(config.since_id.or(take_cursor(&mut params, SINCE_ID))),
            },
            Mode::Past => Strategy::Past {
                max_id: seed(config.max_id.or(take_cursor(&mut params, MAX_ID))),
            },
        };

        Self {
            processor,
            params,
            interval: config.interval(),
            strategy,
            finished: false,
            shutdown,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn cursor(&self) -> Option<u64> {
        match self.strategy {
            Strategy::New { since_id } => since_id,
            Strategy::Past { max_id } => max_id,
        }
    }

    /// True once `Past` mode has seen an empty page.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Base parameters plus the current cursor.
    pub fn build_query(&self) -> Query {
        let mut query = self.params.clone();
        query.insert("count".into(), PAGE_SIZE.into());
        query.insert("tweet_mode".into(), "extended".into());

        match self.strategy {
            Strategy::New { since_id: Some(id) } => {
                query.insert(SINCE_ID.into(), id.into());
            }
            Strategy::Past { max_id: Some(id) } => {
                query.insert(MAX_ID.into(), id.into());
            }
            _ => {}
        }

        query
    }

    /// Issues one search through `app` and hands the page to the processor.
    ///
    /// ERRORS:
    /// - API errors are returned as `CollectError::Api` (cursor untouched)
    /// - `Cancelled` if shutdown fires during the idle sleep
    pub async fn fetch(&mut self, app: &App) -> Result<Fetch> {
        if self.finished {
            return Ok(Fetch::Exhausted);
        }

        let query = self.build_query();
        debug!("Querying {:?}", query);

        incr(&METRICS.searches);
        let batch = app
            .search(&query)
            .await
            .map_err(|e| CollectError::api(app.name(), e))?;

        self.processor.process(&batch, &query).await;
        add(&METRICS.tweets_fetched, batch.len());

        match (&mut self.strategy, batch.is_empty()) {
            (Strategy::New { since_id }, false) => {
                info!("{} new tweets", batch.len());
                *since_id = max_id(&batch).map(|id| id.saturating_add(1));
            }

            (Strategy::New { .. }, true) => {
                // Nothing new yet; this is the normal steady state.
                info!(
                    "Search exhausted, sleeping for {} minutes",
                    self.interval.as_secs_f64() / 60.0
                );
                incr(&METRICS.idle_sleeps);
                sleep_or_cancel(self.interval, &self.shutdown).await?;
            }

            (Strategy::Past { max_id }, false) => {
                info!("{} past tweets", batch.len());
                match min_id(&batch).and_then(|id| id.checked_sub(1)) {
                    Some(next) if next > 0 => *max_id = Some(next),
                    // Reached id 1 or 0: nothing older can exist.
                    _ => self.finished = true,
                }
            }

            (Strategy::Past { .. }, true) => {
                info!("No more tweets left");
                self.finished = true;
                return Ok(Fetch::Exhausted);
            }
        }

        Ok(Fetch::Batch(batch))
    }
}

/// Zero means "no cursor".
fn seed(id: Option<u64>) -> Option<u64> {
    id.filter(|&id| id > 0)
}

fn take_cursor(params: &mut Query, key: &str) -> Option<u64> {
    let value = params.remove(key)?;
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::testing::{ScriptedApp, as_app};
    use serde_json::json;
    use std::sync::Arc;

    type Seen = Vec<(Vec<u64>, Query)>;

    fn discard() -> impl FnMut(&[Status], &Query) + Send {
        |_: &[Status], _: &Query| {}
    }

    fn config(mode: Mode) -> SearchConfig {
        let mut params = Query::new();
        params.insert("q".into(), json!("rust"));
        SearchConfig::new(mode, 1.0, params)
    }

    #[test]
    fn query_has_fixed_keys_and_no_cursor_initially() {
        let collector = Collector::new(discard(), &config(Mode::New), Shutdown::never());
        let query = collector.build_query();

        assert_eq!(query["count"], json!(1000));
        assert_eq!(query["tweet_mode"], json!("extended"));
        assert_eq!(query["q"], json!("rust"));
        assert!(!query.contains_key("since_id"));
        assert!(!query.contains_key("max_id"));
    }

    #[test]
    fn cursor_param_is_used_as_seed_not_forwarded() {
        let mut cfg = config(Mode::Past);
        cfg.params.insert("max_id".into(), json!("500"));

        let collector = Collector::new(discard(), &cfg, Shutdown::never());
        assert_eq!(collector.strategy(), Strategy::Past { max_id: Some(500) });

        let query = collector.build_query();
        assert_eq!(query["max_id"], json!(500));
    }

    #[test]
    fn other_mode_bound_is_forwarded() {
        let mut cfg = config(Mode::Past);
        cfg.params.insert("since_id".into(), json!(7));
        let collector = Collector::new(discard(), &cfg, Shutdown::never());
        assert_eq!(collector.cursor(), None);
        assert_eq!(collector.build_query()["since_id"], json!(7));

        let mut cfg = config(Mode::New);
        cfg.params.insert("max_id".into(), json!(900));
        let collector = Collector::new(discard(), &cfg, Shutdown::never());
        assert_eq!(collector.cursor(), None);
        assert_eq!(collector.build_query()["max_id"], json!(900));
    }

    #[tokio::test]
    async fn new_mode_cursor_saturates_at_max_id() {
        let scripted = ScriptedApp::new("a").page(&[u64::MAX, 5]).shared();
        let app = as_app(&scripted);

        let mut collector = Collector::new(discard(), &config(Mode::New), Shutdown::never());
        collector.fetch(&app).await.unwrap();
        assert_eq!(collector.cursor(), Some(u64::MAX));
    }

    #[test]
    fn zero_seed_means_no_cursor() {
        let mut cfg = config(Mode::New);
        cfg.since_id = Some(0);
        let collector = Collector::new(discard(), &cfg, Shutdown::never());
        assert_eq!(collector.cursor(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn new_mode_moves_past_newest() {
        let scripted = ScriptedApp::new("a")
            .page(&[10, 12, 11])
            .page(&[20, 15])
            .search(Ok(vec![]))
            .page(&[21])
            .shared();
        let app = as_app(&scripted);

        let mut seen: Seen = Vec::new();
        {
            let processor =
                |batch: &[Status], query: &Query| seen.push((batch.iter().map(|s| s.id).collect(), query.clone()));
            let mut collector = Collector::new(processor, &config(Mode::New), Shutdown::never());

            collector.fetch(&app).await.unwrap();
            assert_eq!(collector.cursor(), Some(13));

            collector.fetch(&app).await.unwrap();
            assert_eq!(collector.cursor(), Some(21));

            // Empty page: sleeps, keeps the cursor.
            let before = tokio::time::Instant::now();
            match collector.fetch(&app).await.unwrap() {
                Fetch::Batch(batch) => assert!(batch.is_empty()),
                Fetch::Exhausted => panic!("new mode never terminates"),
            }
            assert!(before.elapsed() >= Duration::from_secs(60));
            assert_eq!(collector.cursor(), Some(21));

            collector.fetch(&app).await.unwrap();
            assert_eq!(collector.cursor(), Some(22));
            assert!(!collector.is_finished());
        }

        let queries = scripted.queries.lock().unwrap();
        assert!(!queries[0].contains_key("since_id"));
        assert_eq!(queries[1]["since_id"], json!(13));
        assert_eq!(queries[2]["since_id"], json!(21));
        assert_eq!(queries[3]["since_id"], json!(21));

        // Each batch is handed over once, with the query that fetched it.
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[1].0, vec![20, 15]);
        assert_eq!(seen[1].1["since_id"], json!(13));
    }

    #[tokio::test]
    async fn past_mode_walks_backward_then_stops() {
        let scripted = ScriptedApp::new("a")
            .page(&[100, 90, 95])
            .page(&[80, 70])
            .search(Ok(vec![]))
            .page(&[1])
            .shared();
        let app = as_app(&scripted);

        let mut cfg = config(Mode::Past);
        cfg.max_id = Some(200);
        let mut collector = Collector::new(discard(), &cfg, Shutdown::never());

        collector.fetch(&app).await.unwrap();
        assert_eq!(collector.cursor(), Some(89));

        collector.fetch(&app).await.unwrap();
        assert_eq!(collector.cursor(), Some(69));

        assert!(matches!(collector.fetch(&app).await.unwrap(), Fetch::Exhausted));
        assert!(collector.is_finished());
        assert_eq!(collector.cursor(), Some(69));

        // Terminal: no further request goes out.
        assert!(matches!(collector.fetch(&app).await.unwrap(), Fetch::Exhausted));
        assert_eq!(scripted.search_count(), 3);

        let queries = scripted.queries.lock().unwrap();
        assert_eq!(queries[0]["max_id"], json!(200));
        assert_eq!(queries[1]["max_id"], json!(89));
        assert_eq!(queries[2]["max_id"], json!(69));
    }

    #[tokio::test]
    async fn errors_leave_cursor_untouched() {
        let scripted = ScriptedApp::new("a")
            .page(&[5])
            .search(Err(ApiError::RateLimited))
            .shared();
        let app: App = Arc::clone(&scripted) as App;

        let mut collector = Collector::new(discard(), &config(Mode::New), Shutdown::never());
        collector.fetch(&app).await.unwrap();

        let err = collector.fetch(&app).await.unwrap_err();
        assert!(err.api_error().is_some_and(ApiError::is_rate_limit));
        assert_eq!(collector.cursor(), Some(6));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sleep_honours_shutdown() {
        let scripted = ScriptedApp::new("a").search(Ok(vec![])).shared();
        let app = as_app(&scripted);
        let (trigger, shutdown) = Shutdown::new();
        trigger.trigger();

        let mut collector = Collector::new(discard(), &config(Mode::New), shutdown);
        assert!(matches!(
            collector.fetch(&app).await,
            Err(CollectError::Cancelled)
        ));
    }
}
