use latreport_common::Sample;
use std::collections::HashMap;
use tracing::warn;

use crate::digest::QuantileDigest;
use crate::report::{Report, RunSummary};

/// Per-test-run digests for one invocation.
///
/// Digests are created on the first sample for a test run and never shared
/// between runs. Partial aggregations from separate scans are combined with
/// [`Aggregation::merge`].
#[derive(Debug, Clone)]
pub struct Aggregation {
    template: QuantileDigest,
    digests: HashMap<String, QuantileDigest>,
}

impl Aggregation {
    /// `template` is the empty digest cloned for every new test run.
    pub fn new(template: QuantileDigest) -> Self {
        Self { template, digests: HashMap::new() }
    }

    pub fn record(&mut self, sample: Sample) {
        self.digests
            .entry(sample.test_run_id)
            .or_insert_with(|| self.template.clone())
            .insert(sample.latency_millis);
    }

    /// Fold a partial aggregation in, merging digests of the same test run.
    pub fn merge(&mut self, other: Aggregation) {
        for (test_run_id, digest) in other.digests {
            match self.digests.get_mut(&test_run_id) {
                Some(existing) => existing.merge(&digest),
                None => {
                    self.digests.insert(test_run_id, digest);
                }
            }
        }
    }

    pub fn get(&self, test_run_id: &str) -> Option<&QuantileDigest> {
        self.digests.get(test_run_id)
    }

    /// Number of distinct test runs seen.
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Total samples across all test runs.
    pub fn sample_count(&self) -> u64 {
        self.digests.values().map(QuantileDigest::count).sum()
    }

    /// Summarize every test run. Runs whose digest cannot answer are left out.
    pub fn into_report(self) -> Report {
        let mut report = Report::default();
        for (test_run_id, mut digest) in self.digests {
            digest.flush();
            match RunSummary::from_digest(&digest) {
                Ok(summary) => report.insert(test_run_id, summary),
                Err(err) => warn!(test_run_id = %test_run_id, error = %err, "Omitting test run from report"),
            }
        }
        report
    }
}
