//! Scripted in-memory app used by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::Map;

use crate::api::{App, StatusStream, TwitterApi};
use crate::error::ApiError;
use crate::schema::{Query, Status, User};

type Script<T> = Mutex<VecDeque<Result<T, ApiError>>>;

/// Replays queued answers, then falls back to a default:
/// - `me`: succeeds
/// - `search`: rate limited
/// - `get_status`: succeeds with a bare status
/// - `filter`: a stream that never yields
pub struct ScriptedApp {
    name: String,
    me: Script<User>,
    searches: Script<Vec<Status>>,
    lookups: Mutex<HashMap<u64, VecDeque<Result<Status, ApiError>>>>,
    streams: Script<Vec<Result<Status, ApiError>>>,

    pub queries: Mutex<Vec<Query>>,
    pub looked_up: Mutex<Vec<u64>>,
    pub me_calls: Mutex<usize>,
    pub filter_calls: Mutex<usize>,
}

impl ScriptedApp {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            me: Mutex::new(VecDeque::new()),
            searches: Mutex::new(VecDeque::new()),
            lookups: Mutex::new(HashMap::new()),
            streams: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
            looked_up: Mutex::new(Vec::new()),
            me_calls: Mutex::new(0),
            filter_calls: Mutex::new(0),
        }
    }

    pub fn me(self, answer: Result<User, ApiError>) -> Self {
        self.me.lock().unwrap().push_back(answer);
        self
    }

    pub fn search(self, answer: Result<Vec<Status>, ApiError>) -> Self {
        self.searches.lock().unwrap().push_back(answer);
        self
    }

    /// Queues a page made of the given ids.
    pub fn page(self, ids: &[u64]) -> Self {
        self.search(Ok(ids.iter().copied().map(Status::with_id).collect()))
    }

    pub fn lookup(self, id: u64, answer: Result<Status, ApiError>) -> Self {
        self.lookups
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .push_back(answer);
        self
    }

    pub fn stream(self, session: Result<Vec<Result<Status, ApiError>>, ApiError>) -> Self {
        self.streams.lock().unwrap().push_back(session);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn search_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

pub fn user(name: &str) -> User {
    User {
        id: 1,
        screen_name: name.to_string(),
        extra: Map::new(),
    }
}

pub fn as_app(app: &Arc<ScriptedApp>) -> App {
    app.clone()
}

#[async_trait::async_trait]
impl TwitterApi for ScriptedApp {
    fn name(&self) -> &str {
        &self.name
    }

    async fn me(&self) -> Result<User, ApiError> {
        *self.me_calls.lock().unwrap() += 1;
        let next = self.me.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(user(&self.name)))
    }

    async fn search(&self, query: &Query) -> Result<Vec<Status>, ApiError> {
        self.queries.lock().unwrap().push(query.clone());
        let next = self.searches.lock().unwrap().pop_front();
        next.unwrap_or(Err(ApiError::RateLimited))
    }

    async fn get_status(&self, id: u64) -> Result<Status, ApiError> {
        self.looked_up.lock().unwrap().push(id);
        let next = self
            .lookups
            .lock()
            .unwrap()
            .get_mut(&id)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Ok(Status::with_id(id)))
    }

    async fn filter(&self, _track: &[String], _params: &Query) -> Result<StatusStream, ApiError> {
        *self.filter_calls.lock().unwrap() += 1;
        let next = self.streams.lock().unwrap().pop_front();
        match next {
            Some(Ok(items)) => Ok(Box::pin(futures_util::stream::iter(items))),
            Some(Err(e)) => Err(e),
            None => Ok(Box::pin(futures_util::stream::pending())),
        }
    }
}
