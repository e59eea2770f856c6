use std::path::PathBuf;

use tally_core::sync::{SyncMode, SyncOutcome};
use tally_core::util::now_ms;

use crate::commands::common::{all_collections, parse_collection, Context};
use crate::error::CliError;

pub async fn run_sync(
    collection: Option<&str>,
    force: bool,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let names = match collection {
        Some(raw) => vec![parse_collection(raw)?],
        None => all_collections(),
    };

    let ctx = Context::open(db_path).await?;
    let hub = ctx.hub(&names)?;
    hub.load_all().await;

    let outcomes = hub.sync_all(SyncMode::Loud, force).await?;
    for (name, outcome) in &outcomes {
        println!("{}", format_outcome(name.as_str(), outcome));
    }

    if let Some(report) = ctx.retention().maybe_run(now_ms()).await? {
        tracing::debug!(dropped = report.records_dropped, "Post-sync cleanup ran");
    }
    Ok(())
}

pub fn format_outcome(name: &str, outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Completed(report) => format!(
            "{name:<20}  sent {:<5} received {:<5} stored {}",
            report.sent, report.received, report.stored
        ),
        SyncOutcome::Skipped => format!("{name:<20}  skipped (already syncing)"),
        SyncOutcome::Failed(message) => format!("{name:<20}  failed: {message}"),
    }
}
