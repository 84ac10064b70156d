use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use latreport_common::{ErrorResponse, IngestRequest, IngestResponse, LogPage, MAX_PAGE_LIMIT};
use latreport_logd::config::{messages_from_text, parse_load_arg};
use latreport_logd::{handle_get_events, handle_ingest, AppState, Clock, EventsQuery, LogStore, Server, ServerConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

// --- Test helpers ---

const NOW: i64 = 1_700_000_000_000;

struct MockClock(AtomicI64);

impl MockClock {
    fn new(now: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(now)))
    }

    fn advance(&self, millis: i64) {
        self.0.fetch_add(millis, Ordering::Relaxed);
    }
}

impl Clock for MockClock {
    fn unix_now_millis(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

fn empty_state() -> AppState {
    AppState::new(MockClock::new(NOW) as Arc<dyn Clock>, None)
}

fn secured_state(token: &str) -> AppState {
    AppState::new(MockClock::new(NOW) as Arc<dyn Clock>, Some(token.to_string()))
}

fn lines(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix} {i}")).collect()
}

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
    headers
}

fn query(start_time: Option<i64>, limit: Option<usize>, next_token: Option<&str>) -> EventsQuery {
    EventsQuery { start_time, limit, next_token: next_token.map(str::to_string) }
}

/// Consume a response body into bytes.
async fn response_body(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

async fn get_events(state: &AppState, source: &str, headers: HeaderMap, q: EventsQuery) -> Response {
    handle_get_events(State(state.clone()), Path(source.to_string()), headers, Ok(Query(q))).await
}

/// Issue a GET and decode the page, asserting 200.
async fn get_page(state: &AppState, source: &str, q: EventsQuery) -> LogPage {
    let response = get_events(state, source, HeaderMap::new(), q).await;
    assert_eq!(response.status(), StatusCode::OK);
    serde_json::from_slice(&response_body(response).await).unwrap()
}

async fn error_message(response: Response) -> String {
    serde_json::from_slice::<ErrorResponse>(&response_body(response).await).unwrap().error
}

async fn ingest(state: &AppState, source: &str, headers: HeaderMap, messages: Vec<String>) -> Response {
    handle_ingest(State(state.clone()), Path(source.to_string()), headers, Ok(Json(IngestRequest { messages }))).await
}

// --- Server struct ---

#[test]
fn test_server_config_defaults() {
    let config = ServerConfig::new("127.0.0.1:9000".parse().unwrap());
    assert_eq!(config.api_token, None);
    assert!(config.preload.is_empty());
    assert_eq!(Server::new(config).address().to_string(), "127.0.0.1:9000");
}

#[test]
fn test_router_creation() {
    let _router = Server::create_router(empty_state());
}

#[tokio::test]
async fn test_server_run_reports_bound_address() {
    let mut config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
    config.preload.push(("queue".to_string(), lines("line", 3)));
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = Server::new(config).run(ready_tx).await;
    });

    let addr = ready_rx.await.unwrap();
    assert_ne!(addr.port(), 0);
}

// --- LogStore ---

#[test]
fn test_store_paginates_by_position() {
    let mut store = LogStore::default();
    store.append("queue", 10, lines("a", 5));

    let first = store.page("queue", 0, 0, 2).unwrap();
    assert_eq!(first.events.len(), 2);
    assert_eq!(first.next_token.as_deref(), Some("2"));

    let last = store.page("queue", 0, 4, 2).unwrap();
    assert_eq!(last.events.len(), 1);
    assert_eq!(last.next_token, None);

    assert!(store.page("missing", 0, 0, 2).is_none());
}

#[test]
fn test_store_skips_events_before_start_time() {
    let mut store = LogStore::default();
    store.append("queue", 100, lines("old", 3));
    store.append("queue", 200, lines("new", 3));

    let page = store.page("queue", 150, 0, 2).unwrap();
    assert_eq!(page.events.iter().map(|e| e.message.as_str()).collect::<Vec<_>>(), vec!["new 0", "new 1"]);
    // The token points at the stored position of the next matching event.
    assert_eq!(page.next_token.as_deref(), Some("5"));

    let exact = store.page("queue", 150, 0, 3).unwrap();
    assert_eq!(exact.events.len(), 3);
    assert_eq!(exact.next_token, None);
}

#[test]
fn test_store_offset_past_end_is_empty() {
    let mut store = LogStore::default();
    store.append("queue", 1, lines("a", 2));
    assert_eq!(store.page("queue", 0, 10, 5).unwrap(), LogPage::default());
}

// --- GET /sources/:name/events ---

#[tokio::test]
async fn test_get_unknown_source_returns_404() {
    let response = get_events(&empty_state(), "missing", HeaderMap::new(), EventsQuery::default()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_message(response).await, "Log source not found: missing");
}

#[tokio::test]
async fn test_get_walks_every_page() {
    let state = empty_state();
    state.ingest("queue", lines("line", 25)).await;

    let mut token: Option<String> = None;
    let mut seen = Vec::new();
    loop {
        let page = get_page(&state, "queue", query(Some(NOW), Some(10), token.as_deref())).await;
        seen.extend(page.events.into_iter().map(|e| e.message));
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    assert_eq!(seen, lines("line", 25));
}

#[tokio::test]
async fn test_get_filters_by_start_time() {
    let clock = MockClock::new(NOW);
    let state = AppState::new(clock.clone() as Arc<dyn Clock>, None);
    state.ingest("queue", lines("old", 2)).await;
    clock.advance(60_000);
    state.ingest("queue", lines("new", 2)).await;

    let page = get_page(&state, "queue", query(Some(NOW + 1), None, None)).await;
    assert_eq!(page.events.len(), 2);
    assert!(page.events.iter().all(|e| e.timestamp == NOW + 60_000));
    assert_eq!(page.next_token, None);

    let everything = get_page(&state, "queue", EventsQuery::default()).await;
    assert_eq!(everything.events.len(), 4);
}

#[tokio::test]
async fn test_get_rejects_bad_limit_and_token() {
    let state = empty_state();
    state.ingest("queue", lines("line", 1)).await;

    for q in [
        query(None, Some(0), None),
        query(None, Some(MAX_PAGE_LIMIT + 1), None),
        query(None, None, Some("not-a-token")),
    ] {
        let response = get_events(&state, "queue", HeaderMap::new(), q).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_get_accepts_limit_at_maximum() {
    let state = empty_state();
    state.ingest("queue", lines("line", 3)).await;
    let page = get_page(&state, "queue", query(None, Some(MAX_PAGE_LIMIT), None)).await;
    assert_eq!(page.events.len(), 3);
}

#[tokio::test]
async fn test_get_returns_503_when_store_is_locked() {
    let state = empty_state();
    state.ingest("queue", lines("line", 1)).await;
    let _guard = state.store.write().await;

    let response = get_events(&state, "queue", HeaderMap::new(), EventsQuery::default()).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// --- POST /sources/:name/events ---

#[tokio::test]
async fn test_ingest_creates_source_and_stamps_events() {
    let state = empty_state();

    let response = ingest(&state, "queue", HeaderMap::new(), lines("line", 3)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: IngestResponse = serde_json::from_slice(&response_body(response).await).unwrap();
    assert_eq!(body.accepted, 3);

    let store = state.store.read().await;
    let events = store.sources.get("queue").unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.timestamp == NOW));
}

#[tokio::test]
async fn test_ingest_appends_to_existing_source() {
    let state = empty_state();
    ingest(&state, "queue", HeaderMap::new(), lines("a", 2)).await;
    ingest(&state, "queue", HeaderMap::new(), lines("b", 2)).await;
    ingest(&state, "other", HeaderMap::new(), lines("c", 1)).await;

    let page = get_page(&state, "queue", EventsQuery::default()).await;
    let messages: Vec<String> = page.events.into_iter().map(|e| e.message).collect();
    assert_eq!(messages, vec!["a 0", "a 1", "b 0", "b 1"]);
}

// --- Bearer token ---

#[tokio::test]
async fn test_secured_state_requires_token() {
    let state = secured_state("s3cret");
    state.ingest("queue", lines("line", 1)).await;

    let missing = get_events(&state, "queue", HeaderMap::new(), EventsQuery::default()).await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_message(missing).await, "Bearer token is required");

    let wrong = get_events(&state, "queue", bearer("guess"), EventsQuery::default()).await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let ok = get_events(&state, "queue", bearer("s3cret"), EventsQuery::default()).await;
    assert_eq!(ok.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_secured_ingest_requires_token() {
    let state = secured_state("s3cret");
    assert_eq!(ingest(&state, "queue", HeaderMap::new(), lines("x", 1)).await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(ingest(&state, "queue", bearer("s3cret"), lines("x", 1)).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_auth_checked_before_source_lookup() {
    let response = get_events(&secured_state("s3cret"), "missing", HeaderMap::new(), EventsQuery::default()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// --- Config helpers ---

#[test]
fn test_parse_load_arg() {
    assert_eq!(parse_load_arg("queue=/tmp/q.log"), Ok(("queue".to_string(), PathBuf::from("/tmp/q.log"))));
    assert!(parse_load_arg("queue").is_err());
    assert!(parse_load_arg("=/tmp/q.log").is_err());
    assert!(parse_load_arg("queue=").is_err());
}

#[test]
fn test_messages_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, b"first line\n\n  \nsecond line\r\n").unwrap();
    let text = std::fs::read_to_string(file.path()).unwrap();
    assert_eq!(messages_from_text(&text), vec!["first line", "second line"]);
}
