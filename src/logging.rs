//! JSON line-delimited operation logging.
//!
//! Each call appends one JSON object to the log file:
//! `{"operation": ..., "timestamp_ms": ..., "payload": ...}`.
//! The path is taken from `LUNA_LOG_PATH` (default `logs/luna.jsonl`);
//! `LUNA_LOG_PATH=off` disables logging entirely.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::json;

const LOG_PATH_ENV: &str = "LUNA_LOG_PATH";
const DEFAULT_LOG_PATH: &str = "logs/luna.jsonl";

static WRITE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn log_path() -> Option<PathBuf> {
    resolve_log_path(env::var(LOG_PATH_ENV).ok())
}

fn resolve_log_path(value: Option<String>) -> Option<PathBuf> {
    match value {
        Some(value) if value.eq_ignore_ascii_case("off") => None,
        Some(value) if !value.trim().is_empty() => Some(PathBuf::from(value)),
        _ => Some(PathBuf::from(DEFAULT_LOG_PATH)),
    }
}

/// Appends a record for `operation` with the serialized `payload`.
pub fn log_operation<T: Serialize>(operation: &str, payload: &T) -> io::Result<()> {
    match log_path() {
        Some(path) => append_record(&path, operation, payload),
        None => Ok(()),
    }
}

/// Appends one `{operation, timestamp_ms, payload}` line to `path`.
pub fn append_record<T: Serialize>(path: &Path, operation: &str, payload: &T) -> io::Result<()> {
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let record = json!({
        "operation": operation,
        "timestamp_ms": timestamp_ms,
        "payload": payload,
    });
    let mut line = serde_json::to_string(&record)?;
    line.push('\n');

    let _guard = WRITE_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}

/// Logs and reports failures on stderr without interrupting the caller.
pub(crate) fn record<T: Serialize>(operation: &str, payload: &T) {
    if let Err(err) = log_operation(operation, payload) {
        eprintln!("failed to log {operation}: {err}");
    }
}
