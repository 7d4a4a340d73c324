use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use log::{info, warn};
use tokio::task::JoinHandle;

use crate::api::App;
use crate::config::StreamConfig;
use crate::error::ApiError;
use crate::metrics::{METRICS, incr};
use crate::schema::{Query, Status};
use crate::util::{Backoff, Shutdown, sleep_or_cancel};

use super::queue::WorkQueue;

/// Progress is logged every this many statuses.
const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Log transport errors
    pub verbose: bool,

    /// First delay before reopening a dropped stream
    pub reconnect: Duration,

    /// Cap for the reconnect delay, which doubles while reconnects fail
    pub max_reconnect: Duration,

    /// Extra filter parameters
    pub params: Query,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            reconnect: Duration::from_secs(5),
            max_reconnect: Duration::from_secs(320),
            params: Query::new(),
        }
    }
}

impl From<&StreamConfig> for StreamOptions {
    fn from(cfg: &StreamConfig) -> Self {
        Self {
            verbose: cfg.verbose,
            reconnect: Duration::from_secs(cfg.reconnect_secs),
            max_reconnect: Duration::from_secs(cfg.max_reconnect_secs),
            params: cfg.params.clone(),
        }
    }
}

/// Receives pushed statuses and queues them for the workers.
///
/// Does no processing of its own, so a slow handler never
/// stalls the stream.
pub struct TweetListener {
    query: String,
    queue: WorkQueue,
    count: Arc<AtomicUsize>,
    verbose: bool,
}

impl TweetListener {
    pub fn new(query: impl Into<String>, queue: WorkQueue, verbose: bool) -> Self {
        Self {
            query: query.into(),
            queue,
            count: Arc::new(AtomicUsize::new(0)),
            verbose,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Statuses received so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn on_status(&mut self, status: Status) {
        self.queue.put((status, self.query.clone()));
        incr(&METRICS.stream_received);

        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % PROGRESS_EVERY == 0 {
            info!("{:.2}k tweets for {}", count as f64 / 1000.0, self.query);
        }
    }

    /// A message that could not be decoded. The session stays open.
    pub fn on_bad_message(&self, error: &serde_json::Error) {
        incr(&METRICS.stream_errors);
        warn!("Skipping undecodable message for {}: {}", self.query, error);
    }

    /// Returns whether the stream should be kept alive. Always `true`.
    pub fn on_error(&self, status_code: u16) -> bool {
        incr(&METRICS.stream_errors);
        if self.verbose {
            warn!(
                "Error {} for query {}, waiting before reconnecting",
                status_code, self.query
            );
        }
        true
    }
}

/// Handle of a running stream task.
pub struct StreamHandle {
    count: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Statuses received so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Waits for the stream task to finish (after shutdown).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("stream task ended abnormally: {}", e);
        }
    }
}

/// Streams `query` through `app`, pushing every status onto `queue`.
///
/// The stream is reopened after every transport error or close.
/// The delay starts at `options.reconnect` and doubles up to
/// `options.max_reconnect` while sessions keep failing; a session
/// that delivered statuses resets it. Undecodable messages are
/// skipped without dropping the session. It only stops on shutdown.
pub fn stream_query(
    query: impl Into<String>,
    app: App,
    queue: WorkQueue,
    options: StreamOptions,
    shutdown: Shutdown,
) -> StreamHandle {
    let listener = TweetListener::new(query, queue, options.verbose);
    let count = listener.count.clone();
    let task = tokio::spawn(run_stream_loop(app, listener, options, shutdown));

    StreamHandle { count, task }
}

async fn run_stream_loop(
    app: App,
    mut listener: TweetListener,
    options: StreamOptions,
    mut shutdown: Shutdown,
) {
    let track = vec![listener.query().to_string()];
    let mut backoff = Backoff::new(
        options.reconnect,
        Some(options.max_reconnect.max(options.reconnect)),
    );

    loop {
        if shutdown.is_triggered() {
            return;
        }

        match app.filter(&track, &options.params).await {
            Ok(mut stream) => {
                info!("Streaming '{}' with app {}", listener.query(), app.name());
                let received_before = listener.count();

                loop {
                    let next = tokio::select! {
                        item = stream.next() => item,
                        _ = shutdown.triggered() => return,
                    };

                    match next {
                        Some(Ok(status)) => listener.on_status(status),
                        Some(Err(ApiError::Decode(e))) => listener.on_bad_message(&e),
                        Some(Err(e)) => {
                            let code = e.status_code().unwrap_or(0);
                            if !listener.on_error(code) {
                                return;
                            }
                            break;
                        }
                        None => {
                            info!("Stream for '{}' closed", listener.query());
                            break;
                        }
                    }
                }

                if listener.count() > received_before {
                    backoff.reset();
                }
            }

            Err(e) => {
                let code = e.status_code().unwrap_or(0);
                if !listener.on_error(code) {
                    return;
                }
            }
        }

        if sleep_or_cancel(backoff.next_delay(), &shutdown).await.is_err() {
            return;
        }
    }
}
