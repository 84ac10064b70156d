use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Page-fetch calls per second allowed by the log-query API outside its privileged region.
pub const DEFAULT_RATE_LIMIT_PER_SEC: u32 = 10;
/// Default digest compression; higher keeps more centroids.
pub const DEFAULT_COMPRESSION: f64 = 10_000.0;
/// Smallest compression a digest accepts.
pub const MIN_COMPRESSION: f64 = 10.0;
/// Largest number of events a single page may carry.
pub const MAX_PAGE_LIMIT: usize = 10_000;
pub const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// A queryable log stream and the lower bound of its time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSource {
    pub name: String,
    /// Unix epoch milliseconds; events older than this are not retrieved.
    pub start_time_ms: i64,
}

/// One latency observation attributed to a test run.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub test_run_id: String,
    pub latency_millis: f64,
}

/// A single log event as stored and served by the log-query service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Unix epoch milliseconds at which the event was ingested.
    pub timestamp: i64,
    pub message: String,
}

/// One page of a filtered event query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPage {
    pub events: Vec<LogEvent>,
    /// Present while more events remain; absent on the last page.
    #[serde(default)]
    pub next_token: Option<String>,
}

/// Body of `POST /sources/:name/events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub accepted: usize,
}

/// JSON error envelope returned by the log service for all error responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Why a single page fetch failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {0}: {1}")]
    Http(u16, String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Log source not found: {0}")]
    SourceNotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl FetchError {
    /// Whether the transport may retry the request that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) => true,
            FetchError::Http(status, _) => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether the failure invalidates the whole run rather than one source.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::Unauthorized(_))
    }
}

/// A page fetch for `source` failed after the transport gave up.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to retrieve page from log source {source_name}: {cause}")]
pub struct RetrievalError {
    pub source_name: String,
    #[source]
    pub cause: FetchError,
}

/// A log line that carries no usable latency sample.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeFailure {
    #[error("blank line")]
    Blank,

    #[error("line matches no known format")]
    Unrecognized,

    #[error("missing test run id")]
    MissingTestRunId,

    #[error("unparsable latency {0:?}")]
    InvalidLatency(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DigestError {
    #[error("quantile requested on an empty digest")]
    Empty,

    #[error("quantile {0} is outside [0, 1]")]
    InvalidQuantile(f64),
}

/// Problems detected before any retrieval begins.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("no log sources configured")]
    NoSources,

    #[error("log source name must not be empty")]
    EmptySourceName,

    #[error("invalid lookback {value:?} for source {source_name}: {reason}")]
    InvalidLookback {
        source_name: String,
        value: String,
        reason: String,
    },

    #[error("lookback for source {0} must be greater than zero")]
    ZeroLookback(String),

    #[error("rate limit must be at least 1 request per second")]
    InvalidRateLimit,

    #[error("compression must be finite and at least {}, got {0}", MIN_COMPRESSION)]
    InvalidCompression(f64),

    #[error("page limit must be between 1 and {}, got {0}", MAX_PAGE_LIMIT)]
    InvalidPageLimit(usize),

    #[error("invalid deadline {0:?}")]
    InvalidDeadline(String),

    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("invalid config file: {0}")]
    InvalidFile(String),
}

/// Failures that abort the whole run.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RunError {
    #[error("run aborted: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("run exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

/// Result type for log retrieval operations
pub type Result<T> = std::result::Result<T, FetchError>;
