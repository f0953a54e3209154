use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Api,
    Worker,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Api => "api",
            ProcessKind::Worker => "worker",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub process: String,
    pub logs_dir: String,
    pub prefix: String,
    pub retention_days: u64,
    pub initialized_at: DateTime<Utc>,
}

/// One structured event on the tool-call / edit-engine path. Every field is
/// optional except the event name and component so call sites only fill what
/// they know.
#[derive(Debug, Clone, Serialize)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub tool_name: Option<&'a str>,
    pub call_id: Option<&'a str>,
    pub message_id: Option<&'a str>,
    pub document_id: Option<&'a str>,
    pub organization_id: Option<&'a str>,
    pub status: Option<&'a str>,
    pub error_code: Option<&'a str>,
    pub detail: Option<&'a str>,
}

/// Streamed document content may contain customer data; log shape, never
/// substance.
pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!(
        "[redacted len={} digest={}]",
        trimmed.len(),
        short_hash(trimmed)
    )
}

pub fn short_hash(input: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Emit one structured event. The process identity is carried by the
/// subscriber set up in `init_process_logging`, not repeated per call.
pub fn emit_event(level: Level, event: ObservabilityEvent<'_>) {
    match level {
        Level::ERROR => tracing::error!(
            target: "quarry.obs",
            component = event.component,
            event = event.event,
            tool_name = event.tool_name.unwrap_or(""),
            call_id = event.call_id.unwrap_or(""),
            message_id = event.message_id.unwrap_or(""),
            document_id = event.document_id.unwrap_or(""),
            organization_id = event.organization_id.unwrap_or(""),
            status = event.status.unwrap_or(""),
            error_code = event.error_code.unwrap_or(""),
            detail = event.detail.unwrap_or(""),
            "observability_event"
        ),
        Level::WARN => tracing::warn!(
            target: "quarry.obs",
            component = event.component,
            event = event.event,
            tool_name = event.tool_name.unwrap_or(""),
            call_id = event.call_id.unwrap_or(""),
            message_id = event.message_id.unwrap_or(""),
            document_id = event.document_id.unwrap_or(""),
            organization_id = event.organization_id.unwrap_or(""),
            status = event.status.unwrap_or(""),
            error_code = event.error_code.unwrap_or(""),
            detail = event.detail.unwrap_or(""),
            "observability_event"
        ),
        _ => tracing::info!(
            target: "quarry.obs",
            component = event.component,
            event = event.event,
            tool_name = event.tool_name.unwrap_or(""),
            call_id = event.call_id.unwrap_or(""),
            message_id = event.message_id.unwrap_or(""),
            document_id = event.document_id.unwrap_or(""),
            organization_id = event.organization_id.unwrap_or(""),
            status = event.status.unwrap_or(""),
            error_code = event.error_code.unwrap_or(""),
            detail = event.detail.unwrap_or(""),
            "observability_event"
        ),
    }
}

pub fn init_process_logging(
    process: ProcessKind,
    logs_dir: &Path,
    retention_days: u64,
) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    fs::create_dir_all(logs_dir)?;
    cleanup_old_jsonl(logs_dir, process.as_str(), retention_days)?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(format!("quarry.{}", process.as_str()))
        .filename_suffix("jsonl")
        .build(logs_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false);

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(true)
        .with_ansi(true);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    let info = LoggingInitInfo {
        process: process.as_str().to_string(),
        logs_dir: logs_dir.display().to_string(),
        prefix: format!("quarry.{}", process.as_str()),
        retention_days,
        initialized_at: Utc::now(),
    };

    Ok((guard, info))
}

fn cleanup_old_jsonl(logs_dir: &Path, process: &str, retention_days: u64) -> anyhow::Result<()> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
    let prefix = format!("quarry.{}.", process);

    for entry in fs::read_dir(logs_dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if !name.starts_with(&prefix) || !name.ends_with(".jsonl") {
            continue;
        }

        // expected: quarry.<proc>.YYYY-MM-DD.jsonl
        let date_part = name.trim_start_matches(&prefix).trim_end_matches(".jsonl");

        let Ok(date) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
            continue;
        };

        let Some(dt) = date.and_hms_opt(0, 0, 0) else {
            continue;
        };

        if DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc) < cutoff {
            let _ = fs::remove_file(path);
        }
    }

    Ok(())
}

pub fn canonical_logs_dir_from_root(root: &Path) -> PathBuf {
    root.join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct BufferWriter(Arc<Mutex<Vec<u8>>>);

    impl io::Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn emit_event_carries_domain_fields() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let writer = BufferWriter(Arc::clone(&buf));
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            emit_event(
                Level::INFO,
                ObservabilityEvent {
                    event: "tool_execute",
                    component: "tool_registry",
                    tool_name: Some("create_metrics"),
                    call_id: Some("call-1"),
                    message_id: Some("msg-1"),
                    document_id: None,
                    organization_id: Some("org-1"),
                    status: Some("completed"),
                    error_code: None,
                    detail: None,
                },
            );
        });

        let raw = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert!(raw.contains("tool_execute"));
        assert!(raw.contains("create_metrics"));
        assert!(raw.contains("org-1"));
    }

    #[test]
    fn redact_text_masks_content() {
        let raw = "select customer_email from customers";
        let redacted = redact_text(raw);
        assert!(redacted.contains("[redacted len="));
        assert!(!redacted.contains("customer_email"));
    }

    #[test]
    fn canonical_logs_dir_joins_logs_folder() {
        let root = PathBuf::from("/var/lib/quarry");
        let logs = canonical_logs_dir_from_root(&root);
        assert_eq!(logs, PathBuf::from("/var/lib/quarry").join("logs"));
    }

    #[test]
    fn cleanup_removes_only_expired_process_logs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let stale = tmp.path().join("quarry.api.2020-01-01.jsonl");
        let other = tmp.path().join("quarry.worker.2020-01-01.jsonl");
        let unrelated = tmp.path().join("notes.txt");
        fs::write(&stale, "{}").unwrap();
        fs::write(&other, "{}").unwrap();
        fs::write(&unrelated, "keep").unwrap();

        cleanup_old_jsonl(tmp.path(), "api", 30).unwrap();

        assert!(!stale.exists());
        assert!(other.exists());
        assert!(unrelated.exists());
    }
}
