use thiserror::Error;

/// Result type alias for collector operations.
pub type Result<T> = std::result::Result<T, CollectError>;

// ------------------------------------------------------------
// API error codes
// ------------------------------------------------------------
//
// Only the codes the collector reacts to are named here.
// Everything else is carried verbatim in `ApiError::Api`.
//
pub const CODE_USER_NOT_FOUND: i64 = 50;
pub const CODE_USER_SUSPENDED: i64 = 63;
pub const CODE_RATE_LIMITED: i64 = 88;

/// Error raised by a single call against one app.
///
/// The variants mirror how the collector reacts:
/// - `RateLimited` is recoverable (rotate or back off)
/// - `UserNotFound` / `UserSuspended` are always fatal for the app
/// - everything else is fatal in rotation, per-id in lookups
#[derive(Error, Debug)]
pub enum ApiError {
    /// Quota exhausted for this app (HTTP 429 or code 88)
    #[error("rate limit exceeded")]
    RateLimited,

    /// Code 50
    #[error("user not found")]
    UserNotFound,

    /// Code 63
    #[error("user has been suspended")]
    UserSuspended,

    /// Any other error reported by the API
    #[error("API error (status {status}, code {code:?}): {message}")]
    Api {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    /// Streaming transport rejected or dropped the connection
    #[error("stream closed with status {status}")]
    Stream { status: u16 },

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not what we expected
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Classify an API error code into the matching variant.
    pub fn from_code(status: u16, code: Option<i64>, message: impl Into<String>) -> Self {
        match code {
            Some(CODE_RATE_LIMITED) => Self::RateLimited,
            Some(CODE_USER_NOT_FOUND) => Self::UserNotFound,
            Some(CODE_USER_SUSPENDED) => Self::UserSuspended,
            _ if status == 429 => Self::RateLimited,
            _ => Self::Api {
                status,
                code,
                message: message.into(),
            },
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    /// True for errors that mean the app itself is unusable.
    pub fn is_account_fatal(&self) -> bool {
        matches!(self, Self::UserNotFound | Self::UserSuspended)
    }

    /// Transport status code, if the error carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RateLimited => Some(429),
            Self::Api { status, .. } | Self::Stream { status } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Orchestration-level error.
#[derive(Error, Debug)]
pub enum CollectError {
    /// Every app in the pool was rate limited in one pass
    #[error("no app left")]
    NoAppLeft,

    /// A fatal error raised by one app
    #[error("app {app}: {source}")]
    Api {
        app: String,
        #[source]
        source: ApiError,
    },

    /// Shutdown was requested while waiting
    #[error("cancelled")]
    Cancelled,

    /// A lookup worker died before finishing its share of ids
    #[error("{lost} of {total} ids were never looked up")]
    Incomplete { lost: usize, total: usize },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CollectError {
    /// Attach the app name to an API error.
    pub fn api(app: impl Into<String>, source: ApiError) -> Self {
        Self::Api {
            app: app.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// The underlying API error, if any.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api { source, .. } => Some(source),
            _ => None,
        }
    }
}
