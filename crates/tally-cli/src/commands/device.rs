use std::path::PathBuf;

use crate::commands::common::Context;
use crate::error::CliError;

pub async fn run_device(db_path: Option<PathBuf>) -> Result<(), CliError> {
    let ctx = Context::open(db_path).await?;
    println!("{}", ctx.identity.device_id().await?);
    Ok(())
}
