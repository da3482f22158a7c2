use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cubbi_core::models::{OperationKind, PendingOperation, Record, RecordKind, SymptomType};
use cubbi_core::remote::{PostgrestGateway, RemoteDataGateway, UnreachableGateway};
use cubbi_core::sync::{DrainReport, HydrationReport, SyncStatus};
use cubbi_core::util::unix_millis_now;
use cubbi_core::{ConnectivityMonitor, RemoteConfig, SyncConfig, SyncService};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

const PREVIEW_CHARS: usize = 40;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub title: String,
    pub notes: Option<String>,
    pub temperature: Option<f64>,
    pub created_at: String,
    pub relative_time: String,
    pub pending: bool,
}

#[derive(Debug, Serialize)]
pub struct PendingListItem {
    pub seq: i64,
    pub kind: OperationKind,
    pub collection: String,
    pub target_id: String,
    pub enqueued_at: String,
    pub attempts: u32,
    pub rejected: bool,
    pub last_error: Option<String>,
}

/// Open the service over `db_path`.
///
/// The remote comes from `CUBBI_*` variables; without them, or with
/// `offline`, every mutation stays local and queued.
pub fn open_service(db_path: &Path, offline: bool) -> Result<SyncService, CliError> {
    let config = if offline {
        None
    } else {
        RemoteConfig::from_env()?
    };
    let online = config.is_some();
    let remote: Arc<dyn RemoteDataGateway> = match config {
        Some(config) => Arc::new(PostgrestGateway::new(&config)?),
        None => {
            tracing::debug!("No remote in use; changes stay local and queued");
            Arc::new(UnreachableGateway)
        }
    };

    Ok(SyncService::open_path(
        db_path,
        remote,
        ConnectivityMonitor::new(online),
        SyncConfig::default(),
    )?)
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("CUBBI_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cubbi")
        .join("cubbi.db")
}

/// Find a cached record by exact id, alias or unique id prefix
pub async fn resolve_record_id(service: &SyncService, id: &str) -> Result<String, CliError> {
    let id = normalize_record_identifier(id)?;
    let engine = service.engine();
    let resolved = engine
        .resolve_id(cubbi_core::Collection::Records, &id)
        .await?;
    let records = engine.store().get_all::<Record>(None).await?;
    if records.iter().any(|record| record.id == resolved) {
        return Ok(resolved);
    }

    let matches: Vec<&Record> = records
        .iter()
        .filter(|record| record.id.starts_with(&id))
        .collect();
    match matches.as_slice() {
        [] => Err(CliError::RecordNotFound(id)),
        [record] => Ok(record.id.clone()),
        many => Err(CliError::AmbiguousRecordId(format!(
            "Record id prefix '{id}' matches {} records; use a longer prefix",
            many.len()
        ))),
    }
}

pub fn normalize_record_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyRecordId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn resolve_title(parts: &[String]) -> Result<String, CliError> {
    normalize_text(&parts.join(" ")).ok_or(CliError::EmptyTitle)
}

pub fn normalize_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse a symptom sub-type using the backend's stored names
pub fn parse_symptom(raw: &str) -> Result<SymptomType, String> {
    let normalized = raw.trim().to_lowercase().replace('-', "_");
    serde_json::from_value(Value::String(normalized))
        .map_err(|_| format!("unknown symptom '{raw}' (try febre, tosse, vomito, outro)"))
}

pub fn format_record_lines(records: &[Record], pending_ids: &[String]) -> Vec<String> {
    let now_ms = unix_millis_now();
    records
        .iter()
        .map(|record| {
            let short_id: String = record.id.chars().take(13).collect();
            let preview = record_preview(record, PREVIEW_CHARS);
            let relative_time = format_relative_time(record.created_at.timestamp_millis(), now_ms);
            let marker = if pending_ids.contains(&record.id) { "*" } else { " " };
            format!("{marker}{short_id:<13}  {preview:<40}  {relative_time}")
        })
        .collect()
}

pub fn record_to_list_item(record: &Record, pending_ids: &[String]) -> RecordListItem {
    RecordListItem {
        id: record.id.clone(),
        kind: record.kind,
        title: record.title.clone(),
        notes: record.notes.clone(),
        temperature: record.temperature,
        created_at: record.created_at.to_rfc3339(),
        relative_time: format_relative_time(record.created_at.timestamp_millis(), unix_millis_now()),
        pending: pending_ids.contains(&record.id),
    }
}

pub fn record_preview(record: &Record, max_chars: usize) -> String {
    let mut text = record.title.replace('\n', " ");
    if let Some(temperature) = record.temperature {
        text = format!("{text} ({temperature:.1}°C)");
    }
    if text.chars().count() > max_chars {
        let truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{truncated}...")
    } else {
        text
    }
}

pub fn pending_to_list_item(entry: &PendingOperation) -> PendingListItem {
    PendingListItem {
        seq: entry.seq,
        kind: entry.kind,
        collection: entry.collection.to_string(),
        target_id: entry.target_id.clone(),
        enqueued_at: format_timestamp(entry.enqueued_at),
        attempts: entry.attempts,
        rejected: entry.rejected,
        last_error: entry.last_error.clone(),
    }
}

pub fn format_pending_lines(entries: &[PendingOperation]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let state = if entry.rejected { "rejected" } else { "queued" };
            let mut line = format!(
                "#{:<5} {:<6} {}/{}  {}  {state}",
                entry.seq,
                entry.kind,
                entry.collection,
                entry.target_id,
                format_timestamp(entry.enqueued_at)
            );
            if entry.attempts > 0 {
                line.push_str(&format!(" after {} attempt(s)", entry.attempts));
            }
            if let Some(error) = &entry.last_error {
                line.push_str(&format!(": {error}"));
            }
            line
        })
        .collect()
}

pub fn format_status_lines(status: &SyncStatus) -> Vec<String> {
    let connectivity = if status.is_online { "online" } else { "offline" };
    let mut lines = vec![
        format!("State:    {:?}", status.state).to_lowercase(),
        format!("Network:  {connectivity}"),
        format!("Pending:  {}", status.pending_count),
    ];
    if status.rejected_count > 0 {
        lines.push(format!(
            "Rejected: {} (see `cubbi pending`, then `cubbi retry` or `cubbi discard`)",
            status.rejected_count
        ));
    }
    lines
}

pub fn format_drain_report(report: &DrainReport) -> String {
    if report.skipped {
        return "Sync skipped: offline, signed out, or already running".to_string();
    }
    let mut line = format!(
        "Synced {} of {} change(s)",
        report.confirmed, report.attempted
    );
    if report.failed > 0 {
        line.push_str(&format!(", {} will retry", report.failed));
    }
    if report.rejected > 0 {
        line.push_str(&format!(", {} rejected", report.rejected));
    }
    if report.deferred > 0 {
        line.push_str(&format!(", {} waiting on earlier changes", report.deferred));
    }
    if report.interrupted {
        line.push_str(" (connection lost)");
    }
    line
}

pub fn format_hydration_report(report: &HydrationReport) -> String {
    let mut line = format!(
        "{}: {} stored, {} removed, {} kept for pending changes",
        report.collection, report.stored, report.removed, report.protected
    );
    if report.skipped > 0 {
        line.push_str(&format!(", {} unreadable", report.skipped));
    }
    if !report.complete {
        line.push_str(" (capped)");
    }
    line
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}
