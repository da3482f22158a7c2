use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use cubbi_core::models::{RecordKind, SymptomType};

use crate::commands::common::parse_symptom;

#[derive(Parser)]
#[command(name = "cubbi")]
#[command(about = "Log a child's symptoms and medications, online or offline")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Work against the local cache only; mutations are queued
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log a symptom or medication
    #[command(alias = "new")]
    Add {
        /// Record type
        #[arg(long = "type", value_enum, default_value_t = RecordType::Symptom)]
        kind: RecordType,
        /// Child the record belongs to
        #[arg(long)]
        child: String,
        /// Record title
        title: Vec<String>,
        #[arg(long)]
        details: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Symptom sub-type (febre, tosse, ...)
        #[arg(long, value_parser = parse_symptom)]
        symptom: Option<SymptomType>,
        /// Temperature in °C
        #[arg(long)]
        temperature: Option<f64>,
        /// Medication reminder interval in hours
        #[arg(long, value_name = "HOURS")]
        every: Option<u32>,
    },
    /// List a child's cached records
    List {
        #[arg(long)]
        child: String,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit a record
    Edit {
        /// Record ID or unique ID prefix
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        details: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Delete a record
    Delete {
        /// Record ID or unique ID prefix
        id: String,
    },
    /// Replay queued changes against the remote store
    Sync,
    /// Show connectivity and queue depth
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued changes
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Return a rejected change to the queue
    Retry {
        /// Queue sequence number
        seq: i64,
    },
    /// Drop a queued change for good
    Discard {
        /// Queue sequence number
        seq: i64,
    },
    /// Refresh the cache from the remote store
    Hydrate {
        /// Child whose records and incidents to refresh (children list when omitted)
        #[arg(long)]
        child: Option<String>,
    },
    /// Clear the local cache and queue
    Reset,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum RecordType {
    Symptom,
    Medication,
}

impl From<RecordType> for RecordKind {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::Symptom => Self::Symptom,
            RecordType::Medication => Self::Medication,
        }
    }
}
