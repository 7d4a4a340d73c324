/// Shared runtime helpers.
///
/// This module contains:
/// - The shutdown signal threaded through every long-running loop
/// - Interruptible sleeps
/// - Exponential backoff used by lookup workers and stream reconnects
///
/// IMPORTANT:
/// - No API-specific logic should live here.
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

use crate::error::{CollectError, Result};

/// Receiving side of the shutdown signal.
///
/// Cheap to clone; every task gets its own copy.
#[derive(Clone, Debug)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sending side, held by whoever decides to stop (Ctrl+C in `main`).
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Shutdown { rx })
    }

    /// A signal that never fires.
    pub fn never() -> Shutdown {
        Self::new().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested.
    ///
    /// If the trigger is dropped without firing, this never resolves.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Sleeps for `duration` unless shutdown fires first.
pub async fn sleep_or_cancel(duration: Duration, shutdown: &Shutdown) -> Result<()> {
    let mut shutdown = shutdown.clone();
    if shutdown.is_triggered() {
        return Err(CollectError::Cancelled);
    }

    tokio::select! {
        _ = sleep(duration) => Ok(()),
        _ = shutdown.triggered() => Err(CollectError::Cancelled),
    }
}

/// Doubling backoff with an optional cap.
///
/// Retries are unlimited; only the delay is capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Option<Duration>,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Option<Duration>) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Returns the delay to wait now and doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let doubled = self.current.saturating_mul(2);
        self.current = match self.max {
            Some(max) => doubled.min(max),
            None => doubled,
        };
        match self.max {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        let mut b = Backoff::new(Duration::from_secs(1), Some(Duration::from_secs(5)));
        let delays: Vec<u64> = (0..5).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);

        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn backoff_uncapped() {
        let mut b = Backoff::new(Duration::from_secs(3), None);
        let delays: Vec<u64> = (0..4).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![3, 6, 12, 24]);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_shutdown() {
        let shutdown = Shutdown::never();
        assert!(sleep_or_cancel(Duration::from_secs(60), &shutdown).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_cut_short_by_shutdown() {
        let (trigger, shutdown) = Shutdown::new();

        let handle = tokio::spawn(async move {
            sleep_or_cancel(Duration::from_secs(3600), &shutdown).await
        });
        tokio::task::yield_now().await;
        trigger.trigger();

        let res = handle.await.unwrap();
        assert!(matches!(res, Err(CollectError::Cancelled)));
    }
}
