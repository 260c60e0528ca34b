//! Verify command implementation.

use std::path::Path;
use verdant_core::{verify_file, StoreDir, TailState};

/// Runs the verify command.
///
/// Reads the journal directly, so it works while another process holds the
/// store open and never truncates a damaged tail.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let journal = StoreDir::journal_path_in(path);
    if !journal.exists() {
        return Err(format!("Journal not found at {}", journal.display()).into());
    }

    println!("Verifying journal at {}...", journal.display());
    let report = verify_file(&journal)?;

    println!("  Snapshots:    {}", report.snapshots);
    println!("  Transactions: {}", report.transactions);
    println!("  Valid bytes:  {} of {}", report.valid_bytes, report.total_bytes);
    println!();

    match report.tail {
        TailState::Clean => {
            println!("✓ Journal verification passed");
            Ok(())
        }
        TailState::Torn { offset, bytes } => {
            println!("✗ Damaged tail at offset {offset} ({bytes} bytes)");
            println!("  The next open will discard the damaged bytes.");
            Err("Verification failed".into())
        }
    }
}
