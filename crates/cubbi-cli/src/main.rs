//! Cubbi CLI - log a child's symptoms and medications from the terminal
//!
//! Every command works against the local cache; changes made while the
//! backend is unreachable are queued and replayed by `cubbi sync`.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::filter::Directive;

use crate::cli::{Cli, Commands};
use crate::commands::common::resolve_db_path;
use crate::commands::queue::{run_discard, run_pending, run_reset, run_retry};
use crate::commands::records::{run_add, run_delete, run_edit, run_list, AddRecord};
use crate::commands::sync::{run_hydrate, run_status, run_sync};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "cubbi=info".parse::<Directive>() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let offline = cli.offline;

    match cli.command {
        Commands::Add {
            kind,
            child,
            title,
            details,
            notes,
            symptom,
            temperature,
            every,
        } => {
            let args = AddRecord {
                kind: kind.into(),
                child,
                title,
                details,
                notes,
                symptom,
                temperature,
                every,
            };
            run_add(args, &db_path, offline).await?;
        }
        Commands::List { child, limit, json } => {
            run_list(&child, limit, json, &db_path, offline).await?;
        }
        Commands::Edit {
            id,
            title,
            details,
            notes,
        } => run_edit(&id, title, details, notes, &db_path, offline).await?,
        Commands::Delete { id } => run_delete(&id, &db_path, offline).await?,
        Commands::Sync => run_sync(&db_path, offline).await?,
        Commands::Status { json } => run_status(json, &db_path, offline).await?,
        Commands::Pending { json } => run_pending(json, &db_path, offline).await?,
        Commands::Retry { seq } => run_retry(seq, &db_path, offline).await?,
        Commands::Discard { seq } => run_discard(seq, &db_path, offline).await?,
        Commands::Hydrate { child } => run_hydrate(child.as_deref(), &db_path, offline).await?,
        Commands::Reset => run_reset(&db_path).await?,
    }

    Ok(())
}
