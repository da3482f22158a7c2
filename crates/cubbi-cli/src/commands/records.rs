use std::path::Path;

use cubbi_core::models::{NewRecord, Patch, Record, RecordKind, SymptomType};
use cubbi_core::{Collection, Confirmation, SyncService};

use crate::commands::common::{
    format_record_lines, normalize_text, open_service, record_to_list_item, resolve_record_id,
    resolve_title, RecordListItem,
};
use crate::error::CliError;

/// Arguments of `cubbi add`
pub struct AddRecord {
    pub kind: RecordKind,
    pub child: String,
    pub title: Vec<String>,
    pub details: Option<String>,
    pub notes: Option<String>,
    pub symptom: Option<SymptomType>,
    pub temperature: Option<f64>,
    pub every: Option<u32>,
}

impl AddRecord {
    pub fn into_draft(self) -> Result<NewRecord, CliError> {
        let mut draft = NewRecord::new(self.kind, resolve_title(&self.title)?);
        if let Some(details) = self.details.as_deref().and_then(normalize_text) {
            draft = draft.details(details);
        }
        if let Some(notes) = self.notes.as_deref().and_then(normalize_text) {
            draft = draft.notes(notes);
        }
        if let Some(symptom) = self.symptom {
            draft = draft.symptom(symptom);
        }
        if let Some(temperature) = self.temperature {
            draft = draft.temperature(temperature);
        }
        if let Some(hours) = self.every {
            draft = draft.reminder_every(hours);
        }
        Ok(draft)
    }
}

pub async fn run_add(args: AddRecord, db_path: &Path, offline: bool) -> Result<(), CliError> {
    let child = args.child.trim().to_string();
    let draft = args.into_draft()?;
    let service = open_service(db_path, offline)?;

    let outcome = service.records(child).create(draft).await?;
    println!(
        "{}  {}",
        outcome.identity.current(),
        describe_confirmation(&outcome.confirmation)
    );
    if outcome.value.as_ref().is_some_and(Record::is_fever) {
        println!("Fever recorded; keep monitoring the temperature.");
    }
    Ok(())
}

pub async fn run_list(
    child: &str,
    limit: usize,
    as_json: bool,
    db_path: &Path,
    offline: bool,
) -> Result<(), CliError> {
    let service = open_service(db_path, offline)?;
    let mut records = service.records(child.trim()).snapshot().await?.items;
    records.truncate(limit);
    let pending_ids = pending_record_ids(&service).await?;

    if as_json {
        let items = records
            .iter()
            .map(|record| record_to_list_item(record, &pending_ids))
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if records.is_empty() {
        println!("No records cached for {child}. Try `cubbi hydrate --child {child}`.");
    } else {
        for line in format_record_lines(&records, &pending_ids) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_edit(
    id: &str,
    title: Option<String>,
    details: Option<String>,
    notes: Option<String>,
    db_path: &Path,
    offline: bool,
) -> Result<(), CliError> {
    let mut patch = Patch::new();
    if let Some(title) = title {
        patch = patch.set("title", normalize_text(&title).ok_or(CliError::EmptyTitle)?);
    }
    if let Some(details) = details {
        patch = patch.set("details", details.trim());
    }
    if let Some(notes) = notes {
        patch = patch.set("notes", normalize_text(&notes));
    }
    if patch.is_empty() {
        return Err(CliError::NothingToEdit);
    }

    let service = open_service(db_path, offline)?;
    let id = resolve_record_id(&service, id).await?;
    let outcome = service.engine().update::<Record>(&id, patch).await?;
    println!(
        "{}  {}",
        outcome.identity.current(),
        describe_confirmation(&outcome.confirmation)
    );
    Ok(())
}

pub async fn run_delete(id: &str, db_path: &Path, offline: bool) -> Result<(), CliError> {
    let service = open_service(db_path, offline)?;
    let id = resolve_record_id(&service, id).await?;
    let outcome = service.engine().delete::<Record>(&id).await?;
    println!("{id}  {}", describe_confirmation(&outcome.confirmation));
    Ok(())
}

pub fn describe_confirmation(confirmation: &Confirmation) -> String {
    match confirmation {
        Confirmation::Confirmed => "synced".to_string(),
        Confirmation::Queued { seq } => format!("queued (#{seq})"),
        Confirmation::Rejected { seq, reason } => format!("rejected (#{seq}): {reason}"),
    }
}

async fn pending_record_ids(service: &SyncService) -> Result<Vec<String>, CliError> {
    Ok(service
        .pending_operations()
        .await?
        .into_iter()
        .filter(|entry| entry.collection == Collection::Records)
        .map(|entry| entry.target_id)
        .collect())
}
