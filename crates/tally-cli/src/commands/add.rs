use std::path::PathBuf;

use tally_core::Record;

use crate::commands::common::{parse_collection, parse_fields, Context};
use crate::error::CliError;

pub async fn run_add(
    collection: &str,
    fields: &str,
    id: Option<String>,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let name = parse_collection(collection)?;
    let fields = parse_fields(fields)?;
    let record = match id {
        Some(id) => Record::with_id(id, fields),
        None => Record::new(fields),
    };

    let ctx = Context::open(db_path).await?;
    let record = ctx.local(&name).await?.add(record).await?;

    println!("{}", record.id);
    Ok(())
}
