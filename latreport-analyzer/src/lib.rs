//! Latency report pipeline: pulls time-windowed log events from one or more
//! sources under a shared rate limit, decodes latency samples and summarizes
//! them per test run with a mergeable quantile digest.

pub mod aggregation;
pub mod config;
pub mod decoder;
pub mod digest;
pub mod orchestrator;
pub mod report;

pub use aggregation::Aggregation;
pub use config::{Cli, ReportConfig, SourceSpec};
pub use decoder::{LineFormat, SampleDecoder};
pub use digest::{Centroid, QuantileDigest};
pub use orchestrator::{ReportOrchestrator, RunOutcome, RunPhase, RunStats, ScanMode, SourceStats};
pub use report::{OutputFormat, Report, RunSummary};
