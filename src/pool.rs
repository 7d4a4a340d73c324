use std::future::Future;

use log::{error, info, warn};

use crate::api::{App, create_app};
use crate::config::{ApiEndpoints, AppKeys};
use crate::error::{ApiError, CollectError, Result};
use crate::metrics::{METRICS, incr};

/// ============================================================
/// AppPool
/// ============================================================
///
/// Ordered set of app handles shared by every task.
///
/// Walked in list order, one app after another, by both
/// `call_for_each_app` and the rotation loop. Id lookups deal
/// their work round-robin over `iter()`.
///
/// INVARIANT:
/// - never empty
#[derive(Clone)]
pub struct AppPool {
    apps: Vec<App>,
}

impl AppPool {
    pub fn new(apps: Vec<App>) -> Result<Self> {
        if apps.is_empty() {
            return Err(CollectError::config("app pool is empty"));
        }
        Ok(Self { apps })
    }

    /// Builds one REST app per credential record.
    ///
    /// A record without a bearer token fails the whole pool with
    /// `CollectError::Config`.
    pub fn from_keys(keys: &[AppKeys], endpoints: &ApiEndpoints) -> Result<Self> {
        let apps = keys
            .iter()
            .map(|k| create_app(k, endpoints))
            .collect::<Result<Vec<_>>>()?;

        info!("{} apps created", apps.len());
        Self::new(apps)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &App> {
        self.apps.iter()
    }

    /// Tries `op` on each app in order until one succeeds.
    ///
    /// Behavior:
    /// - rate limited: log and move on to the next app
    /// - user not found / suspended: re-raised, no further app is tried
    /// - any other API error: re-raised as well
    /// - all apps rate limited: `NoAppLeft`
    pub async fn call_for_each_app<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(App) -> Fut,
        Fut: Future<Output = std::result::Result<T, ApiError>>,
    {
        for app in &self.apps {
            match op(app.clone()).await {
                Ok(value) => return Ok(value),

                Err(e) if e.is_rate_limit() => {
                    warn!("{} app exhausted", app.name());
                    incr(&METRICS.rate_limits);
                }

                Err(e) => {
                    incr(&METRICS.api_errors);
                    if e.is_account_fatal() {
                        error!("{} app is unusable ({}), reraising", app.name(), e);
                    } else {
                        warn!("{} app raised another error: {}", app.name(), e);
                    }
                    return Err(CollectError::api(app.name(), e));
                }
            }
        }

        Err(CollectError::NoAppLeft)
    }
}
