//! Compact command implementation.

use super::open_existing;
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_existing(path)?;

    println!("Compacting journal at {}", path.display());
    let (before, after) = db.compact()?;

    println!("  Size before: {before} bytes");
    println!("  Size after:  {after} bytes");
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        before.saturating_sub(after),
        if before > 0 {
            (before.saturating_sub(after) as f64 / before as f64) * 100.0
        } else {
            0.0
        }
    );
    println!("✓ Compaction complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdant_core::{Config, Database, Fields};

    #[test]
    fn compaction_keeps_records_and_queue() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Database::open(dir.path(), Config::new()).unwrap();
            for i in 0..5 {
                db.write(|txn| {
                    txn.create_with_id(
                        "plants",
                        &format!("p{i}"),
                        Fields::from([("name".into(), "Fern".into())]),
                    )
                    .map(|_| ())
                })
                .unwrap();
            }
        }

        run(dir.path()).unwrap();

        let db = Database::open(dir.path(), Config::new()).unwrap();
        assert_eq!(db.records("plants").unwrap().len(), 5);
        assert_eq!(db.pending_count().unwrap(), 5);
    }
}
