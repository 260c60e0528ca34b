//! Pending command implementation.

use super::open_existing;
use serde::Serialize;
use std::path::Path;
use verdant_core::PendingChange;

/// One queued change, as printed.
#[derive(Debug, Serialize)]
pub struct PendingEntry {
    /// Queue position.
    pub local_sequence: u64,
    /// `create`, `update` or `delete`.
    pub operation: String,
    /// Collection of the record.
    pub collection: String,
    /// Id of the record.
    pub record_id: String,
    /// Revision the edit was made against.
    pub base_revision: u64,
    /// Names of the changed fields.
    pub fields: Vec<String>,
    /// Whether a push has already carried this entry.
    pub sent: bool,
}

/// Runs the pending command.
pub fn run(
    path: &Path,
    collection: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_existing(path)?;
    let sent_through = db.outbox()?.sent_through;
    let entries: Vec<PendingEntry> = db
        .drain_pending(collection)?
        .iter()
        .map(|change| entry(change, sent_through))
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => {
            if entries.is_empty() {
                println!("No pending changes");
            }
            for e in &entries {
                println!(
                    "#{:<6} {:<6} {}/{} base={} [{}]{}",
                    e.local_sequence,
                    e.operation,
                    e.collection,
                    e.record_id,
                    e.base_revision,
                    e.fields.join(", "),
                    if e.sent { " (sent)" } else { "" }
                );
            }
        }
    }

    Ok(())
}

fn entry(change: &PendingChange, sent_through: u64) -> PendingEntry {
    PendingEntry {
        local_sequence: change.local_sequence,
        operation: change.operation.to_string(),
        collection: change.collection.clone(),
        record_id: change.record_id.clone(),
        base_revision: change.base_revision,
        fields: change.changed_fields.keys().cloned().collect(),
        sent: change.local_sequence <= sent_through,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdant_core::{Database, Fields};

    #[test]
    fn marks_entries_already_pushed() {
        let db = Database::open_in_memory().unwrap();
        db.write(|txn| {
            txn.create_with_id("tasks", "t1", Fields::from([("title".into(), "Water".into())]))
                .map(|_| ())
        })
        .unwrap();
        db.mark_sent(1).unwrap();
        db.write(|txn| {
            txn.create_with_id("tasks", "t2", Fields::from([("title".into(), "Prune".into())]))
                .map(|_| ())
        })
        .unwrap();

        let sent_through = db.outbox().unwrap().sent_through;
        let entries: Vec<_> = db
            .drain_pending(None)
            .unwrap()
            .iter()
            .map(|c| entry(c, sent_through))
            .collect();

        assert_eq!(entries.len(), 2);
        assert!(entries[0].sent);
        assert!(!entries[1].sent);
        assert_eq!(entries[1].operation, "create");
        assert_eq!(entries[1].fields, vec!["title".to_string()]);
    }
}
