//! Streaming pipeline
//!
//! Two halves joined by an unbounded queue:
//! - `listener`: receives pushed statuses and only enqueues them
//! - `workers`: a fixed set of tasks draining the queue through a
//!   caller-supplied `StatusWorker`
//!
//! Typical wiring:
//!
//! ```ignore
//! let (queue, workers) = create_queue(4, || MyWorker::new());
//! let stream = stream_query("rust", app, queue, StreamOptions::default(), shutdown);
//! ```

pub mod listener;
pub mod queue;
pub mod workers;

pub use listener::{StreamHandle, StreamOptions, TweetListener, stream_query};
pub use queue::{WorkItem, WorkQueue, WorkReceiver};
pub use workers::{StatusWorker, WorkerPool, create_queue};
