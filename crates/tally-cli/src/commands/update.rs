use std::path::PathBuf;

use crate::commands::common::{parse_collection, parse_fields, Context};
use crate::error::CliError;

pub async fn run_update(
    collection: &str,
    id: &str,
    fields: &str,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let name = parse_collection(collection)?;
    let patch = parse_fields(fields)?;

    let ctx = Context::open(db_path).await?;
    let record = ctx
        .local(&name)
        .await?
        .update(id, |record| record.apply_patch(patch))
        .await?;

    println!("{}", record.id);
    Ok(())
}
