//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod pending;
pub mod records;
pub mod verify;

use std::path::Path;
use verdant_core::{Config, Database};

/// Opens an existing store, failing if nothing is there.
pub(crate) fn open_existing(path: &Path) -> Result<Database, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No store found at {}", path.display()).into());
    }
    Ok(Database::open(path, Config::new().create_if_missing(false))?)
}
