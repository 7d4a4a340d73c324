use log::{debug, error};
use tokio::task::JoinSet;

use crate::metrics::{METRICS, incr};
use crate::schema::Status;

use super::queue::{WorkQueue, WorkReceiver, unbounded};

/// Handler invoked by a worker for every queued status.
///
/// One instance per worker, built by the factory passed to
/// `create_queue`, so implementations may keep private state
/// (a DB connection, a batch buffer, ...).
#[async_trait::async_trait]
pub trait StatusWorker: Send + 'static {
    async fn work(&mut self, status: Status, query: &str);
}

/// Set of worker tasks draining one queue.
pub struct WorkerPool {
    queue: WorkQueue,
    workers: JoinSet<()>,
}

/// Starts `num_workers` workers and returns the queue they drain.
///
/// Workers loop until the queue is closed and empty; under normal
/// operation that never happens.
pub fn create_queue<W, F>(num_workers: usize, factory: F) -> (WorkQueue, WorkerPool)
where
    W: StatusWorker,
    F: Fn() -> W,
{
    let (queue, receiver) = unbounded();
    let mut workers = JoinSet::new();

    for index in 0..num_workers.max(1) {
        let handler = factory();
        let receiver = receiver.clone();
        workers.spawn(worker_loop(index, handler, receiver));
    }

    (
        queue.clone(),
        WorkerPool { queue, workers },
    )
}

async fn worker_loop<W: StatusWorker>(index: usize, mut handler: W, receiver: WorkReceiver) {
    while let Some((status, query)) = receiver.get().await {
        handler.work(status, &query).await;
        receiver.task_done();
        incr(&METRICS.stream_processed);
    }
    debug!("worker {} stopped", index);
}

impl WorkerPool {
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Closes the queue, lets the workers drain what is left,
    /// and waits for all of them to exit.
    pub async fn shutdown(mut self) {
        self.queue.close();
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                error!("stream worker crashed: {}", e);
            }
        }
    }
}
