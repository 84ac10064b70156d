use latreport_common::{DecodeFailure, Sample, NANOS_PER_MILLI};
use serde::Deserialize;

/// Which wire shape a line was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineFormat {
    /// JSON record with a nanosecond `time_diff_ns`.
    Structured,
    /// Whitespace-separated text: run id at token 1, milliseconds as the last token.
    Delimited,
}

/// JSON record emitted by consumers that stamp each event with its delivery latency.
/// `event_id` and `body` ride along in the record but play no part in the report.
#[derive(Debug, Deserialize)]
struct LatencyRecord {
    test_run_id: String,
    time_diff_ns: i64,
}

/// Turns raw log lines into latency samples.
///
/// The delimited text form is a legacy, positional format with no schema; it
/// can be disabled so that only structured records count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleDecoder {
    accept_delimited: bool,
}

impl Default for SampleDecoder {
    fn default() -> Self {
        Self { accept_delimited: true }
    }
}

impl SampleDecoder {
    /// A decoder that only accepts structured records.
    pub fn strict() -> Self {
        Self { accept_delimited: false }
    }

    pub fn accepts_delimited(&self) -> bool {
        self.accept_delimited
    }

    pub fn decode(&self, line: &str) -> Result<Sample, DecodeFailure> {
        self.decode_with_format(line).map(|(sample, _)| sample)
    }

    /// Decode `line`, trying the structured form first and then the delimited one.
    pub fn decode_with_format(&self, line: &str) -> Result<(Sample, LineFormat), DecodeFailure> {
        let line = line.trim();
        if line.is_empty() {
            return Err(DecodeFailure::Blank);
        }

        let structured = decode_structured(line);
        if structured.is_ok() || !self.accept_delimited {
            return structured.map(|sample| (sample, LineFormat::Structured));
        }

        match decode_delimited(line) {
            Ok(sample) => Ok((sample, LineFormat::Delimited)),
            // A JSON-looking line that failed is better explained by the structured error.
            Err(DecodeFailure::Unrecognized) if line.starts_with('{') => structured.map(|s| (s, LineFormat::Structured)),
            Err(failure) => Err(failure),
        }
    }
}

/// Decode a JSON latency record; latency is converted from nanoseconds without truncation.
pub fn decode_structured(line: &str) -> Result<Sample, DecodeFailure> {
    if !line.starts_with('{') {
        return Err(DecodeFailure::Unrecognized);
    }
    let record: LatencyRecord = serde_json::from_str(line).map_err(|_| DecodeFailure::Unrecognized)?;
    if record.test_run_id.is_empty() {
        return Err(DecodeFailure::MissingTestRunId);
    }
    Ok(Sample {
        test_run_id: record.test_run_id,
        latency_millis: record.time_diff_ns as f64 / NANOS_PER_MILLI,
    })
}

/// Field labels of the delimited form. One of these in the id slot means the id was empty.
const DELIMITED_LABELS: [&str; 4] = ["testRunId", "eventId", "body", "timeDiff"];

/// Decode a whitespace-delimited line such as
/// `testRunId abc eventId e1 body {...} timeDiff ms 42`.
pub fn decode_delimited(line: &str) -> Result<Sample, DecodeFailure> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 3 {
        return Err(DecodeFailure::Unrecognized);
    }
    if DELIMITED_LABELS.contains(&tokens[1]) {
        return Err(DecodeFailure::MissingTestRunId);
    }

    let raw_latency = tokens[tokens.len() - 1];
    let latency_millis = raw_latency
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DecodeFailure::InvalidLatency(raw_latency.to_string()))?;

    Ok(Sample {
        test_run_id: tokens[1].to_string(),
        latency_millis,
    })
}
