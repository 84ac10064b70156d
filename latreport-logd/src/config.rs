use std::path::PathBuf;
use std::time::Duration;

/// Maximum time to wait when acquiring the store's read or write lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Largest ingest request body accepted.
pub const MAX_INGEST_BYTES: usize = 16 * 1024 * 1024;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:4000";

/// Parse a `--load NAME=PATH` argument.
pub fn parse_load_arg(arg: &str) -> Result<(String, PathBuf), String> {
    match arg.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok((name.to_string(), PathBuf::from(path))),
        _ => Err(format!("expected NAME=PATH, got {arg:?}")),
    }
}

/// Split a log file into event messages, one per non-blank line.
pub fn messages_from_text(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
