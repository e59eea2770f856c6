//! Tally CLI - inspect and sync a device's stock records from the terminal

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::add::run_add;
use crate::commands::cleanup::run_cleanup;
use crate::commands::delete::run_delete;
use crate::commands::device::run_device;
use crate::commands::list::run_list;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::update::run_update;
use crate::commands::watch::run_watch;
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

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tally=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();
    let db_path = cli.db_path;

    match cli.command {
        Commands::Device => run_device(db_path).await?,
        Commands::List {
            collection,
            all,
            json,
        } => run_list(&collection, all, json, db_path).await?,
        Commands::Add {
            collection,
            fields,
            id,
        } => run_add(&collection, &fields, id, db_path).await?,
        Commands::Update {
            collection,
            id,
            fields,
        } => run_update(&collection, &id, &fields, db_path).await?,
        Commands::Delete { collection, id } => run_delete(&collection, &id, db_path).await?,
        Commands::Sync { collection, force } => {
            run_sync(collection.as_deref(), force, db_path).await?;
        }
        Commands::Cleanup { force } => run_cleanup(force, db_path).await?,
        Commands::Status { json } => run_status(json, db_path).await?,
        Commands::Watch => run_watch(db_path).await?,
    }

    Ok(())
}
