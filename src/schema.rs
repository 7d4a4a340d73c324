use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Search parameters sent with every request.
///
/// Kept as a plain JSON map so caller-supplied keys
/// (`q`, `lang`, `geocode`, ...) are forwarded verbatim.
pub type Query = Map<String, Value>;

// ------------------------------------------------------------
// Status
// ------------------------------------------------------------
//
// One post as returned by search, lookup or the stream.
//
// Only the fields the collector needs are typed. Every other
// field is retained in `extra` and serialized back unchanged,
// so downstream processors see the full record.
//
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Status {
    /// Post id (monotonic over time)
    pub id: u64,

    /// Full text, present when `tweet_mode=extended`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,

    /// Truncated text (compat mode and stream payloads)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,

    /// Present only on retweets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retweeted_status: Option<Box<Status>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Status {
    /// Minimal status with just an id.
    pub fn with_id(id: u64) -> Self {
        Self {
            id,
            full_text: None,
            text: None,
            user: None,
            retweeted_status: None,
            extra: Map::new(),
        }
    }

    pub fn is_retweet(&self) -> bool {
        self.retweeted_status.is_some()
    }

    /// Best available text: full text first, then the truncated one.
    pub fn content(&self) -> Option<&str> {
        self.full_text.as_deref().or(self.text.as_deref())
    }
}

// ------------------------------------------------------------
// User
// ------------------------------------------------------------
//
// Author of a status, or the identity behind an app
// (answer of the credential check).
//
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub id: u64,

    pub screen_name: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Highest id of a batch, `None` when empty.
pub fn max_id(batch: &[Status]) -> Option<u64> {
    batch.iter().map(|s| s.id).max()
}

/// Lowest id of a batch, `None` when empty.
pub fn min_id(batch: &[Status]) -> Option<u64> {
    batch.iter().map(|s| s.id).min()
}
