use std::path::PathBuf;

use crate::commands::common::{all_collections, Context};
use crate::error::CliError;

pub async fn run_watch(db_path: Option<PathBuf>) -> Result<(), CliError> {
    let ctx = Context::open(db_path).await?;
    let session = ctx.session()?;
    let hub = ctx.hub(&all_collections())?;
    hub.load_all().await;

    println!(
        "Syncing every {}s as {}. Press Ctrl-C to stop.",
        ctx.config.sync_interval.as_secs(),
        session.username
    );
    hub.start_session(session);
    tokio::signal::ctrl_c().await?;
    hub.end_session();
    println!("Stopped.");
    Ok(())
}
