use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, Notify, mpsc};

use crate::metrics::METRICS;
use crate::schema::Status;

/// A status together with the query that matched it.
pub type WorkItem = (Status, String);

struct Shared {
    /// `None` once the queue is closed
    tx: StdMutex<Option<mpsc::UnboundedSender<WorkItem>>>,

    /// Items put but not yet marked done
    pending: AtomicUsize,

    /// Fired when `pending` drops to zero
    idle: Notify,
}

/// Producer handle of the work queue.
///
/// Unbounded: if workers fall behind a bursty stream, memory grows.
/// Nothing is ever dropped.
#[derive(Clone)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

/// Consumer handle, shared by every worker.
///
/// Items are handed out FIFO, each to exactly one worker.
#[derive(Clone)]
pub struct WorkReceiver {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
    shared: Arc<Shared>,
}

/// Creates an empty, open queue.
pub fn unbounded() -> (WorkQueue, WorkReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        tx: StdMutex::new(Some(tx)),
        pending: AtomicUsize::new(0),
        idle: Notify::new(),
    });

    (
        WorkQueue {
            shared: shared.clone(),
        },
        WorkReceiver {
            rx: Arc::new(Mutex::new(rx)),
            shared,
        },
    )
}

impl WorkQueue {
    /// Enqueues an item. Returns `false` if the queue is closed.
    pub fn put(&self, item: WorkItem) -> bool {
        let guard = self.shared.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return false;
        };

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        METRICS.queue_depth.fetch_add(1, Ordering::Relaxed);

        if tx.send(item).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            METRICS.queue_depth.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Items put but not yet marked done.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Stops accepting items. Items already queued are still handed out.
    pub fn close(&self) {
        self.shared
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.shared
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Waits until every item put so far has been marked done.
    pub async fn join(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl WorkReceiver {
    /// Waits for the next item. `None` once the queue is closed and drained.
    pub async fn get(&self) -> Option<WorkItem> {
        let item = self.rx.lock().await.recv().await;
        if item.is_some() {
            METRICS.queue_depth.fetch_sub(1, Ordering::Relaxed);
        }
        item
    }

    /// Marks one item obtained from `get` as processed.
    pub fn task_done(&self) {
        if self.shared.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.idle.notify_waiters();
        }
    }
}
