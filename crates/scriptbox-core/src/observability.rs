//! Observability: tracing init, audit log, security events.
//!
//! Uses config::ObservabilityConfig for SCRIPTBOX_QUIET, LOG_LEVEL, AUDIT_LOG, etc.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

static AUDIT_PATH: Mutex<Option<String>> = Mutex::new(None);
static SECURITY_EVENTS_PATH: Mutex<Option<String>> = Mutex::new(None);

/// Initialize tracing. Call at process startup.
/// When SCRIPTBOX_QUIET=1, only WARN and above are logged.
pub fn init_tracing() {
    let cfg = crate::config::ObservabilityConfig::from_env();
    let level: String = if cfg.quiet {
        "scriptbox=warn,scriptbox_sandbox=warn,scriptbox_core=warn".to_string()
    } else {
        cfg.log_level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    };
}

/// Override the audit log destination (takes precedence over SCRIPTBOX_AUDIT_LOG).
pub fn set_audit_log_path(path: Option<String>) {
    if let Ok(mut guard) = AUDIT_PATH.lock() {
        *guard = path;
    }
}

/// Override the security events destination (takes precedence over SCRIPTBOX_SECURITY_EVENTS_LOG).
pub fn set_security_events_path(path: Option<String>) {
    if let Ok(mut guard) = SECURITY_EVENTS_PATH.lock() {
        *guard = path;
    }
}

fn resolve_path(slot: &Mutex<Option<String>>, configured: Option<&String>) -> Option<String> {
    {
        let guard = slot.lock().ok()?;
        if let Some(ref p) = *guard {
            return Some(p.clone());
        }
    }
    let path = configured?.clone();
    if path.is_empty() {
        return None;
    }
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    {
        let mut guard = slot.lock().ok()?;
        *guard = Some(path.clone());
    }
    Some(path)
}

fn get_audit_path() -> Option<String> {
    let cfg = crate::config::ObservabilityConfig::from_env();
    resolve_path(&AUDIT_PATH, cfg.audit_log.as_ref())
}

fn get_security_events_path() -> Option<String> {
    let cfg = crate::config::ObservabilityConfig::from_env();
    resolve_path(&SECURITY_EVENTS_PATH, cfg.security_events_log.as_ref())
}

fn append_jsonl(path: &str, record: &serde_json::Value) {
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Audit: execution_started (after validation, right before the isolation strategy runs)
pub fn audit_execution_started(request_id: &str, strategy: &str, code_hash: &str, source_len: usize) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": now(),
            "event": "execution_started",
            "request_id": request_id,
            "strategy": strategy,
            "code_hash": code_hash,
            "source_len": source_len,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: execution_completed (every terminal outcome, including rejections)
pub fn audit_execution_completed(request_id: &str, outcome: &str, duration_ms: u64) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": now(),
            "event": "execution_completed",
            "request_id": request_id,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "success": outcome == "success",
        });
        append_jsonl(&path, &record);
    }
}

/// Security event: static validation rejected the candidate script
pub fn security_validation_rejected(request_id: &str, code_hash: &str, reason: &str) {
    tracing::warn!(
        request_id = %request_id,
        reason = %reason,
        "Security: script rejected by static validation"
    );
    if let Some(path) = get_security_events_path() {
        let record = json!({
            "ts": now(),
            "type": "validation_rejected",
            "category": "code_scan",
            "request_id": request_id,
            "details": {
                "code_hash": code_hash,
                "reason": reason
            }
        });
        append_jsonl(&path, &record);
    }
}

/// Security event: the input pre-filter rejected a user request
pub fn security_input_rejected(reason: &str, input_len: usize) {
    tracing::warn!(reason = %reason, input_len, "Security: user input rejected");
    if let Some(path) = get_security_events_path() {
        let record = json!({
            "ts": now(),
            "type": "input_rejected",
            "category": "input_filter",
            "details": {
                "reason": reason,
                "input_len": input_len
            }
        });
        append_jsonl(&path, &record);
    }
}

/// Security event: isolation strategy fallback (e.g. in-process slot busy, using a child process)
pub fn security_isolation_fallback(request_id: &str, from: &str, to: &str, reason: &str) {
    tracing::warn!(
        request_id = %request_id,
        from = %from,
        to = %to,
        reason = %reason,
        "Security: isolation strategy fallback"
    );
    if let Some(path) = get_security_events_path() {
        let record = json!({
            "ts": now(),
            "type": "isolation_fallback",
            "category": "runtime",
            "request_id": request_id,
            "details": { "from": from, "to": to, "reason": reason }
        });
        append_jsonl(&path, &record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_records_are_appended_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        set_audit_log_path(Some(path.to_string_lossy().to_string()));

        audit_execution_started("req-1", "in-process", "abc", 12);
        audit_execution_completed("req-1", "success", 3);
        set_audit_log_path(None);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "execution_started");
        assert_eq!(lines[0]["strategy"], "in-process");
        assert_eq!(lines[1]["event"], "execution_completed");
        assert_eq!(lines[1]["success"], true);
    }
}
