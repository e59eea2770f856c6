use std::path::PathBuf;

use crate::commands::common::{parse_collection, Context};
use crate::error::CliError;

pub async fn run_delete(
    collection: &str,
    id: &str,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let name = parse_collection(collection)?;
    let ctx = Context::open(db_path).await?;
    ctx.local(&name).await?.soft_delete(id).await?;

    println!("{id}");
    Ok(())
}
