use clap::Parser;
use latreport_common::{
    ConfigError, LogSource, DEFAULT_COMPRESSION, DEFAULT_RATE_LIMIT_PER_SEC, MAX_PAGE_LIMIT, MIN_COMPRESSION,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestrator::ScanMode;
use crate::report::OutputFormat;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:4000";
pub const DEFAULT_LOOKBACK: &str = "6h";

#[derive(Parser, Debug)]
#[command(name = "latreport", about = "Summarize end-to-end delivery latency per test run from log sources")]
pub struct Cli {
    /// Path to a JSON file with the endpoint and log sources to scan
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log source to scan, as NAME or NAME=LOOKBACK (repeatable; overrides a file source of the same name)
    #[arg(long = "source", value_name = "NAME[=LOOKBACK]")]
    pub sources: Vec<String>,

    /// Lookback window for sources that do not set their own, e.g. 6h or 24h
    #[arg(long, default_value = DEFAULT_LOOKBACK)]
    pub lookback: String,

    /// Base URL of the log-query service
    #[arg(long, env = "LATREPORT_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Bearer token for the log-query service
    #[arg(long, env = "LATREPORT_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Page fetches per second, shared by all sources [default: 10]
    #[arg(long)]
    pub rate_limit: Option<u32>,

    /// Digest compression; higher is more accurate and uses more memory [default: 10000]
    #[arg(long)]
    pub compression: Option<f64>,

    /// Maximum events per page [default: 10000]
    #[arg(long)]
    pub page_limit: Option<usize>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Only accept structured latency records; ignore the legacy delimited text format
    #[arg(long)]
    pub strict_format: bool,

    /// Scan all sources at once (they still share one rate limit)
    #[arg(long)]
    pub concurrent_sources: bool,

    /// Abort the whole run after this long, e.g. 10m
    #[arg(long)]
    pub deadline: Option<String>,
}

/// A source as configured: a name and how far back to look.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub name: String,
    pub lookback: Duration,
}

impl SourceSpec {
    /// Pin the window to `now_ms` (Unix epoch milliseconds).
    pub fn resolve(&self, now_ms: i64) -> LogSource {
        let lookback_ms = i64::try_from(self.lookback.as_millis()).unwrap_or(i64::MAX);
        LogSource {
            name: self.name.clone(),
            start_time_ms: now_ms.saturating_sub(lookback_ms).max(0),
        }
    }
}

/// On-disk configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub endpoint: Option<String>,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
    pub rate_limit_per_sec: Option<u32>,
    pub compression: Option<f64>,
    pub page_limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceEntry {
    pub name: String,
    /// Humantime duration such as `6h`; falls back to the CLI lookback.
    pub lookback: Option<String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::InvalidFile(format!("{}: {e}", path.display())))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::InvalidFile(e.to_string()))
    }
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportConfig {
    pub endpoint: String,
    pub api_token: Option<String>,
    pub sources: Vec<SourceSpec>,
    pub rate_limit_per_sec: u32,
    pub compression: f64,
    pub page_limit: usize,
    pub accept_delimited: bool,
    pub scan_mode: ScanMode,
    pub deadline: Option<Duration>,
    pub format: OutputFormat,
}

impl ReportConfig {
    /// Settings for `sources` with every other option at its default.
    pub fn new(endpoint: impl Into<String>, sources: Vec<SourceSpec>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_token: None,
            sources,
            rate_limit_per_sec: DEFAULT_RATE_LIMIT_PER_SEC,
            compression: DEFAULT_COMPRESSION,
            page_limit: MAX_PAGE_LIMIT,
            accept_delimited: true,
            scan_mode: ScanMode::Sequential,
            deadline: None,
            format: OutputFormat::Text,
        }
    }

    /// Check every setting; run before any retrieval starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(ConfigError::EmptySourceName);
            }
            if source.lookback.is_zero() {
                return Err(ConfigError::ZeroLookback(source.name.clone()));
            }
        }
        if self.rate_limit_per_sec == 0 {
            return Err(ConfigError::InvalidRateLimit);
        }
        if !self.compression.is_finite() || self.compression < MIN_COMPRESSION {
            return Err(ConfigError::InvalidCompression(self.compression));
        }
        if self.page_limit == 0 || self.page_limit > MAX_PAGE_LIMIT {
            return Err(ConfigError::InvalidPageLimit(self.page_limit));
        }
        Ok(())
    }

    /// Resolve every source window against the same instant.
    pub fn resolve_sources(&self, now_ms: i64) -> Vec<LogSource> {
        self.sources.iter().map(|s| s.resolve(now_ms)).collect()
    }
}

impl Cli {
    /// Merge the config file (if any) with command-line flags and validate the result.
    /// Flags win over the file; `--source` entries replace file sources of the same name.
    pub fn into_config(self) -> Result<ReportConfig, ConfigError> {
        let file = match &self.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };

        let default_lookback = parse_lookback("<default>", &self.lookback)?;

        let mut sources = Vec::with_capacity(file.sources.len() + self.sources.len());
        for entry in &file.sources {
            let lookback = match &entry.lookback {
                Some(value) => parse_lookback(&entry.name, value)?,
                None => default_lookback,
            };
            upsert_source(&mut sources, SourceSpec { name: entry.name.clone(), lookback });
        }
        for arg in &self.sources {
            upsert_source(&mut sources, parse_source_arg(arg, default_lookback)?);
        }

        let deadline = self
            .deadline
            .as_deref()
            .map(|value| {
                humantime::parse_duration(value)
                    .ok()
                    .filter(|d| !d.is_zero())
                    .ok_or_else(|| ConfigError::InvalidDeadline(value.to_string()))
            })
            .transpose()?;

        let config = ReportConfig {
            endpoint: self
                .endpoint
                .or(file.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            api_token: self.api_token,
            sources,
            rate_limit_per_sec: self
                .rate_limit
                .or(file.rate_limit_per_sec)
                .unwrap_or(DEFAULT_RATE_LIMIT_PER_SEC),
            compression: self.compression.or(file.compression).unwrap_or(DEFAULT_COMPRESSION),
            page_limit: self.page_limit.or(file.page_limit).unwrap_or(MAX_PAGE_LIMIT),
            accept_delimited: !self.strict_format,
            scan_mode: if self.concurrent_sources { ScanMode::Concurrent } else { ScanMode::Sequential },
            deadline,
            format: self.format,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Parse a humantime lookback such as `6h` or `24h`; zero is rejected.
pub fn parse_lookback(source_name: &str, value: &str) -> Result<Duration, ConfigError> {
    let lookback = humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidLookback {
        source_name: source_name.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if lookback.is_zero() {
        return Err(ConfigError::ZeroLookback(source_name.to_string()));
    }
    Ok(lookback)
}

/// Parse `NAME` or `NAME=LOOKBACK`. The split is on the last `=` so names may contain one.
pub fn parse_source_arg(arg: &str, default_lookback: Duration) -> Result<SourceSpec, ConfigError> {
    let (name, lookback) = match arg.rsplit_once('=') {
        Some((name, value)) => (name, parse_lookback(name, value)?),
        None => (arg, default_lookback),
    };
    if name.trim().is_empty() {
        return Err(ConfigError::EmptySourceName);
    }
    Ok(SourceSpec { name: name.to_string(), lookback })
}

fn upsert_source(sources: &mut Vec<SourceSpec>, spec: SourceSpec) {
    match sources.iter_mut().find(|s| s.name == spec.name) {
        Some(existing) => *existing = spec,
        None => sources.push(spec),
    }
}
