//! Inspect command implementation.

use super::open_existing;
use serde::Serialize;
use std::path::Path;
use verdant_core::Database;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Commits since the last compaction.
    pub commits: u64,
    /// Per-collection counts.
    pub collections: Vec<CollectionSummary>,
    /// Queued outbound changes.
    pub pending: usize,
    /// Last allocated local sequence.
    pub last_sequence: u64,
    /// Highest sequence handed to a push.
    pub sent_through: u64,
    /// Cursor of the last pulled change.
    pub last_pulled_cursor: Option<String>,
    /// When the last sync round completed, in milliseconds.
    pub last_sync_completed_at: Option<i64>,
}

/// Counts for one collection.
#[derive(Debug, Serialize)]
pub struct CollectionSummary {
    /// Collection name.
    pub name: String,
    /// Live records.
    pub live: usize,
    /// Tombstones.
    pub deleted: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_existing(path)?;
    let result = collect(path, &db)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }

    Ok(())
}

fn collect(path: &Path, db: &Database) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let stats = db.stats()?;
    let checkpoint = db.checkpoint()?;

    Ok(InspectResult {
        path: path.display().to_string(),
        journal_bytes: stats.journal_bytes,
        commits: stats.commits,
        collections: stats
            .collections
            .into_iter()
            .map(|(name, counts)| CollectionSummary {
                name,
                live: counts.live,
                deleted: counts.deleted,
            })
            .collect(),
        pending: stats.pending,
        last_sequence: stats.outbox.last_sequence,
        sent_through: stats.outbox.sent_through,
        last_pulled_cursor: checkpoint.last_pulled_cursor.map(|c| c.to_string()),
        last_sync_completed_at: checkpoint.last_sync_completed_at,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!();
    println!("Journal:");
    println!("  Size:    {} bytes", result.journal_bytes);
    println!("  Commits: {}", result.commits);
    println!();
    println!("Collections:");
    for collection in &result.collections {
        println!(
            "  {:<16} {} live, {} deleted",
            collection.name, collection.live, collection.deleted
        );
    }
    println!();
    println!("Outbound queue:");
    println!("  Pending:       {}", result.pending);
    println!("  Last sequence: {}", result.last_sequence);
    println!("  Sent through:  {}", result.sent_through);
    println!();
    println!("Sync checkpoint:");
    match &result.last_pulled_cursor {
        Some(cursor) => println!("  Cursor:         {cursor}"),
        None => println!("  Cursor:         (never pulled)"),
    }
    match result.last_sync_completed_at {
        Some(at) => println!("  Last completed: {at}"),
        None => println!("  Last completed: (never)"),
    }
}
