use std::path::PathBuf;

use tally_core::util::now_ms;

use crate::commands::common::Context;
use crate::error::CliError;

pub async fn run_cleanup(force: bool, db_path: Option<PathBuf>) -> Result<(), CliError> {
    let ctx = Context::open(db_path).await?;
    let policy = ctx.retention();

    let report = if force {
        Some(policy.run(now_ms()).await?)
    } else {
        policy.maybe_run(now_ms()).await?
    };

    match report {
        Some(report) => println!(
            "Scanned {} collections, dropped {} records, removed {} keys ({} failed)",
            report.keys_scanned, report.records_dropped, report.keys_removed, report.keys_failed
        ),
        None => println!("Cleanup already ran today; use --force to run again."),
    }
    Ok(())
}
