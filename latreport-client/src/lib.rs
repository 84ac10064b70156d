use async_trait::async_trait;
use latreport_common::{ConfigError, ErrorResponse, FetchError, LogPage, Result, MAX_PAGE_LIMIT};
use reqwest::Url;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

pub mod paginator;
pub mod rate_limiter;
pub mod retry;

pub use paginator::LogPaginator;
pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;

/// Anything that can serve one page of a filtered event query.
#[async_trait]
pub trait LogFetcher: Send + Sync {
    /// Fetch the page after `cursor` (or the first page when `None`) of events
    /// in `source_name` no older than `start_time_ms`.
    async fn fetch_page(&self, source_name: &str, start_time_ms: i64, cursor: Option<&str>) -> Result<LogPage>;
}

/// Log-query client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the log-query service, e.g. `http://127.0.0.1:4000`.
    pub endpoint: String,
    /// Sent as a bearer token when present.
    pub api_token: Option<String>,
    /// Maximum events requested per page.
    pub page_limit: usize,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_token: None,
            page_limit: MAX_PAGE_LIMIT,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Serialize)]
struct FilterQuery<'a> {
    start_time: i64,
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

/// `LogFetcher` backed by the HTTP log-query API.
pub struct HttpLogFetcher {
    pub config: ClientConfig,
    base_url: Url,
    http_client: reqwest::Client,
}

impl HttpLogFetcher {
    /// Create a fetcher; fails if the endpoint is not an absolute http(s) URL.
    pub fn new(config: ClientConfig) -> std::result::Result<Self, ConfigError> {
        let base_url = Url::parse(&config.endpoint)
            .map_err(|_| ConfigError::InvalidEndpoint(config.endpoint.clone()))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidEndpoint(config.endpoint.clone()));
        }
        if config.page_limit == 0 || config.page_limit > MAX_PAGE_LIMIT {
            return Err(ConfigError::InvalidPageLimit(config.page_limit));
        }

        Ok(Self {
            config,
            base_url,
            http_client: reqwest::Client::new(),
        })
    }

    /// Build the events URL for `source_name`; the name is percent-encoded as one path segment.
    pub fn build_events_url(&self, source_name: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["sources", source_name, "events"]);
        }
        url
    }

    async fn fetch_once(&self, source_name: &str, start_time_ms: i64, cursor: Option<&str>) -> Result<LogPage> {
        let request_id = Uuid::new_v4().to_string();
        let query = FilterQuery {
            start_time: start_time_ms,
            limit: self.config.page_limit,
            next_token: cursor,
        };

        let mut request = self
            .http_client
            .get(self.build_events_url(source_name))
            .query(&query)
            .header("X-Request-Id", &request_id);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        debug!(source = source_name, request_id = %request_id, cursor = ?cursor, "Requesting log page");

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(parse_error_response(status, source_name, response).await);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        serde_json::from_slice::<LogPage>(&body).map_err(|e| FetchError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl LogFetcher for HttpLogFetcher {
    async fn fetch_page(&self, source_name: &str, start_time_ms: i64, cursor: Option<&str>) -> Result<LogPage> {
        retry::run_with_retry("fetch_page", &self.config.retry, || {
            self.fetch_once(source_name, start_time_ms, cursor)
        })
        .await
    }
}

async fn parse_error_response(
    status: reqwest::StatusCode,
    source_name: &str,
    response: reqwest::Response,
) -> FetchError {
    if status == reqwest::StatusCode::NOT_FOUND {
        return FetchError::SourceNotFound(source_name.to_string());
    }

    let error_msg = response
        .json::<ErrorResponse>()
        .await
        .map(|r| r.error)
        .unwrap_or_else(|_| format!("Server returned status: {}", status));

    match status {
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => FetchError::Unauthorized(error_msg),
        _ => FetchError::Http(status.as_u16(), error_msg),
    }
}
