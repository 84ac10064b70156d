use latreport_common::{LogEvent, LogSource, RetrievalError};
use std::sync::Arc;
use tracing::debug;

use crate::rate_limiter::RateLimiter;
use crate::LogFetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Traversal {
    NotStarted,
    InProgress,
    Finished,
}

/// One forward-only traversal of a log source from its window start to now.
///
/// Every fetch first takes a grant from the limiter. The cursor never leaves
/// the paginator; a new traversal needs a new paginator.
pub struct LogPaginator<'a, F: LogFetcher + ?Sized> {
    fetcher: &'a F,
    limiter: Arc<RateLimiter>,
    source: LogSource,
    cursor: Option<String>,
    state: Traversal,
    pages_fetched: u64,
}

impl<'a, F: LogFetcher + ?Sized> LogPaginator<'a, F> {
    pub fn new(fetcher: &'a F, limiter: Arc<RateLimiter>, source: LogSource) -> Self {
        Self {
            fetcher,
            limiter,
            source,
            cursor: None,
            state: Traversal::NotStarted,
            pages_fetched: 0,
        }
    }

    pub fn source(&self) -> &LogSource {
        &self.source
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    /// `true` once the source reported its last page or a fetch failed.
    pub fn is_finished(&self) -> bool {
        self.state == Traversal::Finished
    }

    /// Fetch the next page.
    ///
    /// Returns `Ok(None)` once the traversal is over. A failed fetch ends the
    /// traversal too: the error is returned once and later calls yield `None`.
    pub async fn next_page(&mut self) -> Result<Option<Vec<LogEvent>>, RetrievalError> {
        if self.state == Traversal::Finished {
            return Ok(None);
        }

        self.limiter.acquire().await;

        let requested = self.cursor.take();
        let page = match self
            .fetcher
            .fetch_page(&self.source.name, self.source.start_time_ms, requested.as_deref())
            .await
        {
            Ok(page) => page,
            Err(cause) => {
                self.state = Traversal::Finished;
                return Err(RetrievalError { source_name: self.source.name.clone(), cause });
            }
        };
        self.pages_fetched += 1;

        debug!(
            source = %self.source.name,
            page = self.pages_fetched,
            events = page.events.len(),
            more = page.next_token.is_some(),
            "Fetched log page"
        );

        // A service echoing the token it was given would otherwise loop forever.
        match page.next_token {
            Some(token) if requested.as_deref() != Some(token.as_str()) => {
                self.cursor = Some(token);
                self.state = Traversal::InProgress;
            }
            _ => self.state = Traversal::Finished,
        }

        Ok(Some(page.events))
    }
}
