use std::path::PathBuf;

use tally_core::models::storage_key;
use tally_core::store::load_collection;
use tally_core::Record;

use crate::commands::common::{
    format_record_lines, parse_collection, record_to_list_item, Context, RecordListItem,
};
use crate::error::CliError;

pub async fn run_list(
    collection: &str,
    include_deleted: bool,
    as_json: bool,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let name = parse_collection(collection)?;
    let ctx = Context::open(db_path).await?;

    let records = if include_deleted {
        load_collection::<Record, _>(ctx.store.as_ref(), &storage_key(&name))
            .await?
            .records
    } else {
        ctx.local(&name).await?.records().to_vec()
    };

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if records.is_empty() {
        println!("No records in {name}.");
    } else {
        for line in format_record_lines(&records) {
            println!("{line}");
        }
    }

    Ok(())
}
