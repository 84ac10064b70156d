use futures::future::try_join_all;
use latreport_client::{LogFetcher, LogPaginator, RateLimiter};
use latreport_common::{LogSource, RetrievalError, RunError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::aggregation::Aggregation;
use crate::decoder::{LineFormat, SampleDecoder};
use crate::digest::QuantileDigest;
use crate::report::Report;

/// Where an invocation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    /// Index of the source being scanned; in concurrent mode, the first source of the batch.
    ScanningSource(usize),
    Aggregating,
}

/// How multiple sources are traversed. Either way they share one rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    #[default]
    Sequential,
    /// Each source runs as its own pipeline into a private aggregation; the
    /// partial aggregations are merged once every pipeline has finished.
    Concurrent,
}

/// Diagnostics for one source traversal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceStats {
    pub source: String,
    pub pages: u64,
    pub events: u64,
    pub decoded: u64,
    pub rejected: u64,
    /// Samples that only decoded through the legacy delimited format.
    pub legacy_format: u64,
    /// Set when the traversal stopped early because a page fetch failed.
    pub abandoned: Option<RetrievalError>,
}

impl SourceStats {
    fn new(source: &str) -> Self {
        Self { source: source.to_string(), ..Self::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub sources: Vec<SourceStats>,
    pub elapsed: Duration,
}

impl RunStats {
    pub fn decoded(&self) -> u64 {
        self.sources.iter().map(|s| s.decoded).sum()
    }

    pub fn rejected(&self) -> u64 {
        self.sources.iter().map(|s| s.rejected).sum()
    }

    pub fn abandoned_sources(&self) -> impl Iterator<Item = &SourceStats> {
        self.sources.iter().filter(|s| s.abandoned.is_some())
    }
}

/// Result of a completed invocation.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: Report,
    pub stats: RunStats,
}

/// Drives retrieval, decoding and aggregation over a list of log sources.
pub struct ReportOrchestrator<F: LogFetcher> {
    fetcher: F,
    limiter: Arc<RateLimiter>,
    decoder: SampleDecoder,
    template: QuantileDigest,
    scan_mode: ScanMode,
    deadline: Option<Duration>,
    phase: RunPhase,
}

impl<F: LogFetcher> ReportOrchestrator<F> {
    /// `limiter` is shared by every source of every run driven by this orchestrator.
    pub fn new(fetcher: F, limiter: Arc<RateLimiter>, decoder: SampleDecoder, template: QuantileDigest) -> Self {
        Self {
            fetcher,
            limiter,
            decoder,
            template,
            scan_mode: ScanMode::Sequential,
            deadline: None,
            phase: RunPhase::Idle,
        }
    }

    pub fn with_scan_mode(mut self, scan_mode: ScanMode) -> Self {
        self.scan_mode = scan_mode;
        self
    }

    /// Abort a run that takes longer than `deadline`.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Scan every source and summarize latency per test run.
    ///
    /// A source whose page fetch fails is abandoned and the run goes on with
    /// the rest; only an authentication failure or the deadline aborts the run.
    pub async fn run(&mut self, sources: &[LogSource]) -> Result<RunOutcome, RunError> {
        let started = Instant::now();
        let result = match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, self.scan_all(sources)).await {
                Ok(result) => result,
                Err(_) => Err(RunError::DeadlineExceeded(deadline)),
            },
            None => self.scan_all(sources).await,
        };

        let outcome = result.map(|(aggregation, sources)| {
            self.transition(RunPhase::Aggregating);
            let report = aggregation.into_report();
            let stats = RunStats { sources, elapsed: started.elapsed() };
            info!(
                test_runs = report.len(),
                decoded = stats.decoded(),
                rejected = stats.rejected(),
                elapsed = ?stats.elapsed,
                "Latency report ready"
            );
            RunOutcome { report, stats }
        });
        self.transition(RunPhase::Idle);
        outcome
    }

    async fn scan_all(&mut self, sources: &[LogSource]) -> Result<(Aggregation, Vec<SourceStats>), RunError> {
        let mut aggregation = Aggregation::new(self.template.clone());
        let mut all_stats = Vec::with_capacity(sources.len());

        match self.scan_mode {
            ScanMode::Sequential => {
                for (index, source) in sources.iter().enumerate() {
                    self.transition(RunPhase::ScanningSource(index));
                    let stats = scan_source(&self.fetcher, &self.limiter, self.decoder, source, &mut aggregation).await;
                    escalate_if_fatal(&stats)?;
                    all_stats.push(stats);
                }
            }
            ScanMode::Concurrent => {
                self.transition(RunPhase::ScanningSource(0));
                let (fetcher, limiter, decoder, template) = (&self.fetcher, &self.limiter, self.decoder, &self.template);
                let pipelines = sources.iter().map(|source| async move {
                    let mut partial = Aggregation::new(template.clone());
                    let stats = scan_source(fetcher, limiter, decoder, source, &mut partial).await;
                    escalate_if_fatal(&stats)?;
                    Ok::<_, RunError>((partial, stats))
                });
                for (partial, stats) in try_join_all(pipelines).await? {
                    aggregation.merge(partial);
                    all_stats.push(stats);
                }
            }
        }

        Ok((aggregation, all_stats))
    }

    fn transition(&mut self, next: RunPhase) {
        debug!(from = ?self.phase, to = ?next, "Run phase");
        self.phase = next;
    }
}

fn escalate_if_fatal(stats: &SourceStats) -> Result<(), RunError> {
    match &stats.abandoned {
        Some(err) if err.cause.is_fatal() => Err(RunError::Retrieval(err.clone())),
        _ => Ok(()),
    }
}

/// Traverse one source to exhaustion (or first failure), feeding every decodable line into `aggregation`.
pub async fn scan_source<F: LogFetcher + ?Sized>(
    fetcher: &F,
    limiter: &Arc<RateLimiter>,
    decoder: SampleDecoder,
    source: &LogSource,
    aggregation: &mut Aggregation,
) -> SourceStats {
    let mut stats = SourceStats::new(&source.name);
    let mut paginator = LogPaginator::new(fetcher, Arc::clone(limiter), source.clone());
    info!(source = %source.name, start_time_ms = source.start_time_ms, "Scanning log source");

    loop {
        match paginator.next_page().await {
            Ok(Some(events)) => {
                stats.pages += 1;
                for event in events {
                    stats.events += 1;
                    match decoder.decode_with_format(&event.message) {
                        Ok((sample, format)) => {
                            stats.decoded += 1;
                            if format == LineFormat::Delimited {
                                stats.legacy_format += 1;
                            }
                            aggregation.record(sample);
                        }
                        Err(failure) => {
                            stats.rejected += 1;
                            trace!(source = %source.name, %failure, "Skipping log line");
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(source = %source.name, error = %err, pages = stats.pages, "Abandoning log source");
                stats.abandoned = Some(err);
                break;
            }
        }
    }

    if stats.legacy_format > 0 {
        warn!(
            source = %source.name,
            samples = stats.legacy_format,
            "Samples decoded from the legacy delimited format; its token positions are not a stable contract"
        );
    }
    info!(
        source = %source.name,
        pages = stats.pages,
        events = stats.events,
        decoded = stats.decoded,
        rejected = stats.rejected,
        "Finished log source"
    );
    stats
}
