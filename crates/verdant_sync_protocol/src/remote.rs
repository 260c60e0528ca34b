//! The backend's view of a record.

use serde::{Deserialize, Serialize};
use verdant_core::{Fields, Record, RecordKey};

/// A record as stored by the backend of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Collection of the record.
    pub collection: String,
    /// Record id.
    pub id: String,
    /// Backend revision, never `0`.
    pub revision: u64,
    /// Wall-clock time of the change that produced this revision.
    pub updated_at: i64,
    /// Device that produced this revision.
    pub origin: String,
    /// Tombstone flag.
    pub deleted: bool,
    /// Full field set.
    pub fields: Fields,
}

impl RemoteRecord {
    /// Returns the `(collection, id)` identity.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.collection.clone(), self.id.clone())
    }

    /// Converts into local record state.
    #[must_use]
    pub fn to_record(&self) -> Record {
        Record {
            collection: self.collection.clone(),
            id: self.id.clone(),
            revision: self.revision,
            updated_at: self.updated_at,
            deleted: self.deleted,
            fields: self.fields.clone(),
        }
    }
}
