use std::path::Path;

use crate::commands::common::{
    format_drain_report, format_hydration_report, format_status_lines, open_service,
};
use crate::error::CliError;

pub async fn run_sync(db_path: &Path, offline: bool) -> Result<(), CliError> {
    let service = open_service(db_path, offline)?;
    let report = service.sync_now().await?;
    println!("{}", format_drain_report(&report));

    let status = service.offline_sync_status().await?;
    if status.pending_count > 0 {
        println!("{} change(s) still queued", status.pending_count);
    }
    Ok(())
}

pub async fn run_status(as_json: bool, db_path: &Path, offline: bool) -> Result<(), CliError> {
    let service = open_service(db_path, offline)?;
    let status = service.offline_sync_status().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        for line in format_status_lines(&status) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_hydrate(child: Option<&str>, db_path: &Path, offline: bool) -> Result<(), CliError> {
    let service = open_service(db_path, offline)?;
    match child.map(str::trim) {
        Some(child) => {
            let scope = service.hydrate_child_scope(child).await?;
            println!("{}", format_hydration_report(&scope.records));
            println!("{}", format_hydration_report(&scope.incidents));
        }
        None => {
            let report = service.hydrate_children().await?;
            println!("{}", format_hydration_report(&report));
        }
    }
    Ok(())
}
