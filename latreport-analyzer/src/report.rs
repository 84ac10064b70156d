use clap::ValueEnum;
use latreport_common::DigestError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::digest::QuantileDigest;

/// Quantiles reported for every test run, in output order.
pub const REPORTED_QUANTILES: [(&str, f64); 5] = [("p0", 0.0), ("p50", 0.5), ("p90", 0.9), ("p99", 0.99), ("p100", 1.0)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per statistic
    Text,
    /// The report as a JSON object keyed by test run id
    Json,
}

/// Latency distribution of one test run, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunSummary {
    pub count: u64,
    pub p0: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    pub p100: f64,
}

impl RunSummary {
    /// Evaluate every entry of [`REPORTED_QUANTILES`] against `digest`.
    pub fn from_digest(digest: &QuantileDigest) -> Result<Self, DigestError> {
        let mut values = [0.0; REPORTED_QUANTILES.len()];
        for (value, (_, q)) in values.iter_mut().zip(REPORTED_QUANTILES) {
            *value = digest.quantile(q)?;
        }
        let [p0, p50, p90, p99, p100] = values;
        Ok(Self { count: digest.count(), p0, p50, p90, p99, p100 })
    }

    /// Quantile values in [`REPORTED_QUANTILES`] order.
    pub fn values(&self) -> [f64; REPORTED_QUANTILES.len()] {
        [self.p0, self.p50, self.p90, self.p99, self.p100]
    }

    /// Value of a reported quantile by its label (`p0`, `p50`, ...).
    pub fn get(&self, label: &str) -> Option<f64> {
        let index = REPORTED_QUANTILES.iter().position(|(l, _)| *l == label)?;
        Some(self.values()[index])
    }
}

/// Point-in-time summary of every test run, ordered by test run id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Report {
    runs: BTreeMap<String, RunSummary>,
}

impl Report {
    pub(crate) fn insert(&mut self, test_run_id: String, summary: RunSummary) {
        self.runs.insert(test_run_id, summary);
    }

    pub fn get(&self, test_run_id: &str) -> Option<&RunSummary> {
        self.runs.get(test_run_id)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RunSummary)> {
        self.runs.iter().map(|(id, summary)| (id.as_str(), summary))
    }

    /// Human-readable form: one line per statistic per test run.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for (id, summary) in self.iter() {
            let _ = writeln!(out, "testRunId {id}, count = {}", summary.count);
            for ((label, _), value) in REPORTED_QUANTILES.iter().zip(summary.values()) {
                let _ = writeln!(out, "testRunId {id}, {label} = {value:.3}");
            }
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render(&self, format: OutputFormat) -> serde_json::Result<String> {
        match format {
            OutputFormat::Text => Ok(self.render_text()),
            OutputFormat::Json => self.to_json(),
        }
    }
}
