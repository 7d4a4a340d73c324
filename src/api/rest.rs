use std::time::Duration;

use futures_util::StreamExt;
use log::debug;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{ApiEndpoints, AppKeys};
use crate::error::{ApiError, CollectError};
use crate::schema::{Query, Status, User};

use super::{StatusStream, TwitterApi};

/// REST app backed by `reqwest`.
///
/// Authentication is a pre-issued bearer token. Obtaining
/// or refreshing tokens happens outside this crate.
pub struct RestApp {
    name: String,
    token: String,
    client: Client,
    endpoints: ApiEndpoints,
}

/// `search/tweets` response envelope
#[derive(Deserialize)]
struct SearchResponse {
    statuses: Vec<Status>,
}

/// `{"errors": [{"code": 88, "message": "..."}]}`
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Deserialize)]
struct ErrorItem {
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

impl RestApp {
    /// Fails with `CollectError::Config` when the record has no bearer token.
    pub fn new(keys: &AppKeys, endpoints: &ApiEndpoints) -> crate::error::Result<Self> {
        let token = keys.token()?.to_string();

        // No overall timeout here: it would cut the long-lived stream.
        // REST calls set their own per-request timeout.
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CollectError::api(&keys.username, ApiError::Http(e)))?;

        Ok(Self {
            name: keys.username.clone(),
            token,
            client,
            endpoints: endpoints.clone(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &Query) -> Result<T, ApiError> {
        let url = format!("{}/{}", self.endpoints.rest_url, path);
        debug!("[{}] GET {} {:?}", self.name, url, query);

        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .timeout(Duration::from_secs(self.endpoints.timeout_secs))
            .query(&to_params(query))
            .send()
            .await?;

        let resp = check_response(resp).await?;
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait::async_trait]
impl TwitterApi for RestApp {
    fn name(&self) -> &str {
        &self.name
    }

    async fn me(&self) -> Result<User, ApiError> {
        self.get("account/verify_credentials.json", &Query::new()).await
    }

    async fn search(&self, query: &Query) -> Result<Vec<Status>, ApiError> {
        let resp: SearchResponse = self.get("search/tweets.json", query).await?;
        Ok(resp.statuses)
    }

    async fn get_status(&self, id: u64) -> Result<Status, ApiError> {
        let mut query = Query::new();
        query.insert("id".into(), id.into());
        query.insert("tweet_mode".into(), "extended".into());
        self.get("statuses/show.json", &query).await
    }

    async fn filter(&self, track: &[String], params: &Query) -> Result<StatusStream, ApiError> {
        let url = format!("{}/statuses/filter.json", self.endpoints.stream_url);

        let mut query = params.clone();
        query.insert("track".into(), track.join(",").into());

        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(&to_params(&query))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ApiError::Stream {
                status: resp.status().as_u16(),
            });
        }

        // The stream is newline-delimited JSON with blank keep-alive lines.
        let bytes = Box::pin(resp.bytes_stream());
        let stream = futures_util::stream::unfold(
            (bytes, Vec::<u8>::new()),
            |(mut bytes, mut buf)| async move {
                loop {
                    if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buf.drain(..=pos).collect();
                        match parse_stream_line(&line) {
                            Some(item) => return Some((item, (bytes, buf))),
                            None => continue,
                        }
                    }

                    match bytes.next().await {
                        Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                        Some(Err(e)) => return Some((Err(ApiError::Http(e)), (bytes, buf))),
                        None => return None,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}

/// Maps a non-2xx response to a classified `ApiError`.
async fn check_response(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let (code, message) = parse_error_body(&body);
    Err(ApiError::from_code(status.as_u16(), code, message))
}

fn parse_error_body(body: &str) -> (Option<i64>, String) {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => match parsed.errors.into_iter().next() {
            Some(first) => (first.code, first.message),
            None => (None, body.to_string()),
        },
        Err(_) => (None, body.to_string()),
    }
}

/// Query values are sent as plain strings.
fn to_params(query: &Query) -> Vec<(String, String)> {
    query
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

/// Parses one stream line.
///
/// Returns `None` for keep-alives and control messages
/// (`delete`, `limit`, `warning`, ...), which carry no status.
fn parse_stream_line(line: &[u8]) -> Option<Result<Status, ApiError>> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_slice(trimmed) {
        Ok(v) => v,
        Err(e) => return Some(Err(ApiError::Decode(e))),
    };

    if value.get("id").is_none() {
        debug!("stream control message: {}", value);
        return None;
    }

    Some(serde_json::from_value(value).map_err(ApiError::Decode))
}
