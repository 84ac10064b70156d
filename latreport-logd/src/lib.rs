use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use latreport_common::{ErrorResponse, IngestRequest, IngestResponse, LogEvent, LogPage, MAX_PAGE_LIMIT};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info};

pub mod config;
use config::{LOCK_TIMEOUT, MAX_INGEST_BYTES};

/// Abstraction over current time for testability.
pub trait Clock: Send + Sync {
    fn unix_now_millis(&self) -> i64;
}

/// Production clock backed by `SystemTime`.
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or_default()
    }
}

/// Events per source, in ingestion order.
#[derive(Debug, Default)]
pub struct LogStore {
    pub sources: HashMap<String, Vec<LogEvent>>,
}

impl LogStore {
    /// Append `messages` to `source`, creating it if needed. Returns how many were stored.
    pub fn append(&mut self, source: &str, timestamp: i64, messages: Vec<String>) -> usize {
        let events = self.sources.entry(source.to_string()).or_default();
        let accepted = messages.len();
        events.extend(messages.into_iter().map(|message| LogEvent { timestamp, message }));
        accepted
    }

    /// One page of `source` events no older than `start_time`, starting at stored position `offset`.
    ///
    /// Returns `None` for an unknown source. The next token is the stored
    /// position of the first matching event not included in this page.
    pub fn page(&self, source: &str, start_time: i64, offset: usize, limit: usize) -> Option<LogPage> {
        let events = self.sources.get(source)?;
        let mut matching = events
            .iter()
            .enumerate()
            .skip(offset)
            .filter(|(_, event)| event.timestamp >= start_time);

        let page: Vec<LogEvent> = matching.by_ref().take(limit).map(|(_, event)| event.clone()).collect();
        let next_token = matching.next().map(|(position, _)| position.to_string());
        Some(LogPage { events: page, next_token })
    }
}

pub type Store = Arc<RwLock<LogStore>>;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub clock: Arc<dyn Clock>,
    /// When set, every request must carry `Authorization: Bearer <token>`.
    pub api_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(clock: Arc<dyn Clock>, api_token: Option<String>) -> Self {
        Self {
            store: Arc::new(RwLock::new(LogStore::default())),
            clock,
            api_token: api_token.map(Arc::from),
        }
    }

    /// Store `messages` in `source` stamped with the current time.
    pub async fn ingest(&self, source: &str, messages: Vec<String>) -> usize {
        let now = self.clock.unix_now_millis();
        self.store.write().await.append(source, now, messages)
    }
}

/// Query string of `GET /sources/:name/events`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsQuery {
    pub start_time: Option<i64>,
    pub limit: Option<usize>,
    pub next_token: Option<String>,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: SocketAddr,
    pub api_token: Option<String>,
    /// Sources loaded before the server starts accepting requests.
    pub preload: Vec<(String, Vec<String>)>,
}

impl ServerConfig {
    pub fn new(address: SocketAddr) -> Self {
        Self { address, api_token: None, preload: Vec::new() }
    }
}

/// Local log-query service
pub struct Server {
    config: ServerConfig,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Get the server's configured address
    pub fn address(&self) -> SocketAddr {
        self.config.address
    }

    /// Create the application router with the given state
    pub fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/sources/:name/events", get(handle_get_events).post(handle_ingest))
            .layer(DefaultBodyLimit::max(MAX_INGEST_BYTES))
            .with_state(state)
    }

    /// Run the server, signalling `ready_tx` with the bound address once accepting connections
    pub async fn run(self, ready_tx: tokio::sync::oneshot::Sender<SocketAddr>) -> Result<(), Box<dyn std::error::Error>> {
        let state = AppState::new(Arc::new(SystemClock), self.config.api_token);
        for (source, messages) in self.config.preload {
            let accepted = state.ingest(&source, messages).await;
            info!(source = %source, events = accepted, "Preloaded log source");
        }

        let app = Self::create_router(state);
        let listener = tokio::net::TcpListener::bind(self.config.address).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Log service listening");
        ready_tx.send(local_addr).ok();
        axum::serve(listener, app).await?;
        Ok(())
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: message.into() })).into_response()
}

fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(error_response(StatusCode::UNAUTHORIZED, "Invalid bearer token")),
        None => Err(error_response(StatusCode::UNAUTHORIZED, "Bearer token is required")),
    }
}

/// Handler for GET /sources/:name/events: one page of events no older than `start_time`.
pub async fn handle_get_events(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> Response {
    if let Err(response) = check_auth(&state, &headers) {
        return response;
    }

    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let limit = query.limit.unwrap_or(MAX_PAGE_LIMIT);
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("limit must be between 1 and {}", MAX_PAGE_LIMIT),
        );
    }
    let offset = match query.next_token.as_deref().map(str::parse::<usize>) {
        None => 0,
        Some(Ok(offset)) => offset,
        Some(Err(_)) => return error_response(StatusCode::BAD_REQUEST, "Invalid next_token"),
    };
    let start_time = query.start_time.unwrap_or(0);

    let store = match timeout(LOCK_TIMEOUT, state.store.read()).await {
        Ok(guard) => guard,
        Err(_) => return error_response(StatusCode::SERVICE_UNAVAILABLE, "Server error: Lock acquisition timed out"),
    };

    match store.page(&name, start_time, offset, limit) {
        None => error_response(StatusCode::NOT_FOUND, format!("Log source not found: {}", name)),
        Some(page) => {
            debug!(
                source = %name,
                offset,
                events = page.events.len(),
                more = page.next_token.is_some(),
                "Served log page"
            );
            (StatusCode::OK, Json(page)).into_response()
        }
    }
}

/// Handler for POST /sources/:name/events: appends the messages as events stamped with the current time.
pub async fn handle_ingest(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Response {
    if let Err(response) = check_auth(&state, &headers) {
        return response;
    }

    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let now = state.clock.unix_now_millis();
    let mut store = match timeout(LOCK_TIMEOUT, state.store.write()).await {
        Ok(guard) => guard,
        Err(_) => return error_response(StatusCode::SERVICE_UNAVAILABLE, "Server error: Lock acquisition timed out"),
    };
    let accepted = store.append(&name, now, request.messages);
    info!(source = %name, accepted, "Ingested log events");

    (StatusCode::OK, Json(IngestResponse { accepted })).into_response()
}
