//! Records command implementation.

use super::open_existing;
use std::path::Path;

/// Runs the records command.
pub fn run(
    path: &Path,
    collection: &str,
    include_deleted: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_existing(path)?;
    db.schema().collection(collection)?;

    let records: Vec<_> = db
        .records(collection)?
        .into_iter()
        .filter(|r| include_deleted || r.is_live())
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        _ => {
            println!("{} record(s) in {collection}", records.len());
            for record in &records {
                println!(
                    "  {} rev={} updated_at={}{}",
                    record.id,
                    record.revision,
                    record.updated_at,
                    if record.deleted { " (deleted)" } else { "" }
                );
                for (name, value) in &record.fields {
                    println!("    {name}: {value:?}");
                }
            }
        }
    }

    Ok(())
}
