use std::path::Path;

use crate::commands::common::{
    format_pending_lines, open_service, pending_to_list_item, PendingListItem,
};
use crate::error::CliError;

pub async fn run_pending(as_json: bool, db_path: &Path, offline: bool) -> Result<(), CliError> {
    let service = open_service(db_path, offline)?;
    let entries = service.pending_operations().await?;

    if as_json {
        let items = entries
            .iter()
            .map(pending_to_list_item)
            .collect::<Vec<PendingListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Nothing queued.");
        return Ok(());
    }
    for line in format_pending_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_retry(seq: i64, db_path: &Path, offline: bool) -> Result<(), CliError> {
    let service = open_service(db_path, offline)?;
    service.retry_rejected(seq).await?;
    println!("#{seq} will be replayed on the next sync");
    Ok(())
}

pub async fn run_discard(seq: i64, db_path: &Path, offline: bool) -> Result<(), CliError> {
    let service = open_service(db_path, offline)?;
    let entry = service.discard(seq).await?;
    println!(
        "Discarded #{seq} ({} on {}/{})",
        entry.kind, entry.collection, entry.target_id
    );
    Ok(())
}

pub async fn run_reset(db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path, true)?;
    let status = service.offline_sync_status().await?;
    service.sign_out().await?;
    if status.pending_count > 0 {
        println!(
            "Local cache cleared; {} unsynced change(s) were dropped",
            status.pending_count
        );
    } else {
        println!("Local cache cleared");
    }
    Ok(())
}
