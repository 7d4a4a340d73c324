// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// - api:        TwitterApi seam and the reqwest-backed app
// - config:     Configuration structs loaded from JSON
// - error:      ApiError / CollectError
// - schema:     Status / User records and the query map
// - pool:       App pool and the try-each-app primitive
// - collector:  Search strategies and the rotation loop
// - lookup:     Parallel fetch of statuses by id
// - streaming:  Stream listener, work queue and worker pool
// - metrics:    Global runtime counters
// - logging:    env_logger setup
// - util:       Shutdown signal, interruptible sleep, backoff
//
pub mod api;
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod lookup;
pub mod metrics;
pub mod pool;
pub mod schema;
pub mod streaming;
pub mod util;

#[cfg(test)]
mod testing;

pub use api::{App, StatusStream, TwitterApi};
pub use collector::runner::{RunSummary, fetch_tweets, run};
pub use collector::{BatchProcessor, Collector, Fetch, Strategy};
pub use error::{ApiError, CollectError, Result};
pub use lookup::{LookupOptions, fetch_many};
pub use pool::AppPool;
pub use schema::{Query, Status, User};
pub use util::{Shutdown, ShutdownTrigger};
