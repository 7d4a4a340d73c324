//! API seam and app factory
//!
//! This module provides:
//! - The `TwitterApi` trait every app handle implements
//! - A factory that turns credential records into app handles
//!
//! The collector never talks HTTP directly. Rotation, lookups
//! and streaming only see `App` handles.

pub mod rest;

use std::sync::Arc;

use futures_util::stream::BoxStream;

use crate::config::{ApiEndpoints, AppKeys};
use crate::error::{ApiError, Result as CollectResult};
use crate::schema::{Query, Status, User};

/// Push-based status stream opened by `TwitterApi::filter`.
///
/// Items are yielded until the transport closes. A transport
/// failure is yielded as an `Err` and usually ends the stream.
pub type StatusStream = BoxStream<'static, Result<Status, ApiError>>;

/// A shared, authenticated app handle.
pub type App = Arc<dyn TwitterApi>;

/// One authenticated identity able to call the API.
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - The same handle is shared across lookup workers
///
/// CONTRACT:
/// - Rate limiting must be reported as `ApiError::RateLimited`
/// - Codes 50 / 63 must be reported as `UserNotFound` / `UserSuspended`
///   (`ApiError::from_code` does the mapping)
#[async_trait::async_trait]
pub trait TwitterApi: Send + Sync {
    /// Human-readable app name, used in logs only.
    fn name(&self) -> &str;

    /// Resolves the authenticated identity (credential check).
    async fn me(&self) -> Result<User, ApiError>;

    /// Runs one page of the search endpoint.
    async fn search(&self, query: &Query) -> Result<Vec<Status>, ApiError>;

    /// Fetches a single status by id, with full text.
    async fn get_status(&self, id: u64) -> Result<Status, ApiError>;

    /// Opens the filtered stream for the given terms.
    ///
    /// `params` are forwarded verbatim (e.g. `language`).
    async fn filter(&self, track: &[String], params: &Query) -> Result<StatusStream, ApiError>;
}

/// Builds the REST app for one credential record.
pub fn create_app(keys: &AppKeys, endpoints: &ApiEndpoints) -> CollectResult<App> {
    let app = rest::RestApp::new(keys, endpoints)?;
    Ok(Arc::new(app))
}
