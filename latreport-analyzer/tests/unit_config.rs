use clap::Parser;
use latreport_analyzer::config::{parse_lookback, parse_source_arg, ConfigFile, DEFAULT_ENDPOINT};
use latreport_analyzer::{Cli, OutputFormat, ReportConfig, ScanMode, SourceSpec};
use latreport_common::{ConfigError, LogSource, DEFAULT_COMPRESSION, DEFAULT_RATE_LIMIT_PER_SEC, MAX_PAGE_LIMIT};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const HOUR: Duration = Duration::from_secs(3600);

fn config_from(args: &[&str]) -> Result<ReportConfig, ConfigError> {
    let mut argv = vec!["latreport", "--endpoint", "http://logs.test:4000"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap().into_config()
}

fn spec(name: &str, lookback: Duration) -> SourceSpec {
    SourceSpec { name: name.to_string(), lookback }
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

// --- Lookback and source arguments ---

#[test]
fn test_parse_lookback() {
    assert_eq!(parse_lookback("queue", "6h"), Ok(6 * HOUR));
    assert_eq!(parse_lookback("queue", "24h"), Ok(24 * HOUR));
    assert_eq!(parse_lookback("queue", "90m"), Ok(Duration::from_secs(90 * 60)));
    assert_eq!(parse_lookback("queue", " 1h 30m "), Ok(Duration::from_secs(90 * 60)));
}

#[test]
fn test_parse_lookback_rejects_garbage_and_zero() {
    assert!(matches!(
        parse_lookback("queue", "six hours"),
        Err(ConfigError::InvalidLookback { source_name, value, .. }) if source_name == "queue" && value == "six hours"
    ));
    assert_eq!(parse_lookback("queue", "0s"), Err(ConfigError::ZeroLookback("queue".to_string())));
}

#[test]
fn test_parse_source_arg() {
    assert_eq!(parse_source_arg("queue=24h", HOUR), Ok(spec("queue", 24 * HOUR)));
    assert_eq!(parse_source_arg("stream", HOUR), Ok(spec("stream", HOUR)));
    assert_eq!(parse_source_arg("a=b=2h", HOUR), Ok(spec("a=b", 2 * HOUR)));
    assert_eq!(parse_source_arg("=6h", HOUR), Err(ConfigError::EmptySourceName));
    assert!(parse_source_arg("queue=soon", HOUR).is_err());
}

#[test]
fn test_source_window_resolution() {
    let now_ms = 1_700_000_000_000;
    assert_eq!(
        spec("queue", 6 * HOUR).resolve(now_ms),
        LogSource { name: "queue".to_string(), start_time_ms: now_ms - 6 * 3_600_000 }
    );
    // A window reaching before the epoch starts at the epoch.
    assert_eq!(spec("old", 24 * HOUR).resolve(1_000).start_time_ms, 0);
}

// --- Command line ---

#[test]
fn test_cli_defaults() {
    let config = config_from(&["--source", "queue", "--source", "stream=24h"]).unwrap();

    assert_eq!(config.endpoint, "http://logs.test:4000");
    assert_eq!(config.sources, vec![spec("queue", 6 * HOUR), spec("stream", 24 * HOUR)]);
    assert_eq!(config.rate_limit_per_sec, DEFAULT_RATE_LIMIT_PER_SEC);
    assert_eq!(config.compression, DEFAULT_COMPRESSION);
    assert_eq!(config.page_limit, MAX_PAGE_LIMIT);
    assert!(config.accept_delimited);
    assert_eq!(config.scan_mode, ScanMode::Sequential);
    assert_eq!(config.deadline, None);
    assert_eq!(config.format, OutputFormat::Text);
}

#[test]
fn test_cli_flags() {
    let config = config_from(&[
        "--source",
        "queue",
        "--lookback",
        "2h",
        "--rate-limit",
        "5",
        "--compression",
        "200",
        "--page-limit",
        "500",
        "--strict-format",
        "--concurrent-sources",
        "--deadline",
        "10m",
        "--format",
        "json",
        "--api-token",
        "secret",
    ])
    .unwrap();

    assert_eq!(config.sources, vec![spec("queue", 2 * HOUR)]);
    assert_eq!(config.rate_limit_per_sec, 5);
    assert_eq!(config.compression, 200.0);
    assert_eq!(config.page_limit, 500);
    assert!(!config.accept_delimited);
    assert_eq!(config.scan_mode, ScanMode::Concurrent);
    assert_eq!(config.deadline, Some(Duration::from_secs(600)));
    assert_eq!(config.format, OutputFormat::Json);
    assert_eq!(config.api_token.as_deref(), Some("secret"));
}

#[test]
fn test_cli_requires_a_source() {
    assert_eq!(config_from(&[]), Err(ConfigError::NoSources));
}

#[test]
fn test_cli_rejects_invalid_values() {
    assert_eq!(config_from(&["--source", "q", "--rate-limit", "0"]), Err(ConfigError::InvalidRateLimit));
    assert_eq!(config_from(&["--source", "q", "--compression", "5"]), Err(ConfigError::InvalidCompression(5.0)));
    assert_eq!(config_from(&["--source", "q", "--page-limit", "0"]), Err(ConfigError::InvalidPageLimit(0)));
    assert_eq!(
        config_from(&["--source", "q", "--page-limit", "10001"]),
        Err(ConfigError::InvalidPageLimit(10_001))
    );
    assert_eq!(
        config_from(&["--source", "q", "--deadline", "soon"]),
        Err(ConfigError::InvalidDeadline("soon".to_string()))
    );
    assert_eq!(
        config_from(&["--source", "q", "--deadline", "0s"]),
        Err(ConfigError::InvalidDeadline("0s".to_string()))
    );
    assert_eq!(config_from(&["--source", "q=0s"]), Err(ConfigError::ZeroLookback("q".to_string())));
}

#[test]
fn test_repeated_source_keeps_last_lookback() {
    let config = config_from(&["--source", "queue=1h", "--source", "queue=3h"]).unwrap();
    assert_eq!(config.sources, vec![spec("queue", 3 * HOUR)]);
}

// --- Config file ---

#[test]
fn test_config_file_parse() {
    let file = ConfigFile::parse(
        r#"{"endpoint": "http://logs:4000", "sources": [{"name": "queue", "lookback": "24h"}, {"name": "stream"}], "compression": 500}"#,
    )
    .unwrap();
    assert_eq!(file.endpoint.as_deref(), Some("http://logs:4000"));
    assert_eq!(file.sources.len(), 2);
    assert_eq!(file.sources[1].lookback, None);
    assert_eq!(file.compression, Some(500.0));
    assert_eq!(file.rate_limit_per_sec, None);
}

#[test]
fn test_config_file_rejects_unknown_fields() {
    assert!(matches!(ConfigFile::parse(r#"{"sorces": []}"#), Err(ConfigError::InvalidFile(_))));
    assert!(matches!(ConfigFile::parse("not json"), Err(ConfigError::InvalidFile(_))));
}

#[test]
fn test_config_file_merged_with_flags() {
    let file = config_file(
        r#"{
            "endpoint": "http://from-file:4000",
            "sources": [{"name": "queue", "lookback": "24h"}, {"name": "stream"}],
            "rate_limit_per_sec": 3,
            "page_limit": 100
        }"#,
    );
    let path = file.path().to_str().unwrap();

    let config = Cli::try_parse_from([
        "latreport",
        "--config",
        path,
        "--source",
        "stream=1h",
        "--source",
        "extra",
        "--page-limit",
        "50",
    ])
    .unwrap()
    .into_config()
    .unwrap();

    assert_eq!(
        config.sources,
        vec![spec("queue", 24 * HOUR), spec("stream", HOUR), spec("extra", 6 * HOUR)]
    );
    assert_eq!(config.rate_limit_per_sec, 3);
    assert_eq!(config.page_limit, 50);
}

#[test]
fn test_missing_config_file() {
    let result = Cli::try_parse_from(["latreport", "--config", "/nonexistent/latreport.json"])
        .unwrap()
        .into_config();
    assert!(matches!(result, Err(ConfigError::InvalidFile(_))));
}

#[test]
fn test_config_file_with_invalid_lookback() {
    let file = config_file(r#"{"sources": [{"name": "queue", "lookback": "forever"}]}"#);
    let result = Cli::try_parse_from(["latreport", "--config", file.path().to_str().unwrap()])
        .unwrap()
        .into_config();
    assert!(matches!(result, Err(ConfigError::InvalidLookback { source_name, .. }) if source_name == "queue"));
}

// --- ReportConfig ---

#[test]
fn test_report_config_new_and_validate() {
    let config = ReportConfig::new(DEFAULT_ENDPOINT, vec![spec("queue", HOUR)]);
    assert_eq!(config.validate(), Ok(()));

    let mut blank = config.clone();
    blank.sources = vec![spec("  ", HOUR)];
    assert_eq!(blank.validate(), Err(ConfigError::EmptySourceName));

    let mut zero = config.clone();
    zero.sources = vec![spec("queue", Duration::ZERO)];
    assert_eq!(zero.validate(), Err(ConfigError::ZeroLookback("queue".to_string())));

    let mut nan = config;
    nan.compression = f64::NAN;
    assert!(matches!(nan.validate(), Err(ConfigError::InvalidCompression(_))));
}

#[test]
fn test_resolve_sources_shares_one_instant() {
    let config = ReportConfig::new(DEFAULT_ENDPOINT, vec![spec("a", HOUR), spec("b", 2 * HOUR)]);
    let resolved = config.resolve_sources(10 * 3_600_000);
    assert_eq!(resolved[0].start_time_ms, 9 * 3_600_000);
    assert_eq!(resolved[1].start_time_ms, 8 * 3_600_000);
}
