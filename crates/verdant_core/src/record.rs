//! Stored records.

use crate::types::{FieldValue, Fields, RecordKey};
use serde::{Deserialize, Serialize};

/// A domain record as held by the local store.
///
/// Deletion never removes a record: it sets `deleted` and keeps the row as a
/// tombstone so the delete can be propagated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Collection the record belongs to.
    pub collection: String,
    /// Record id, unique within its collection.
    pub id: String,
    /// Last revision acknowledged by the backend, `0` if never acknowledged.
    pub revision: u64,
    /// Wall-clock time of the last change, in milliseconds.
    pub updated_at: i64,
    /// Tombstone flag.
    pub deleted: bool,
    /// Domain fields.
    pub fields: Fields,
}

impl Record {
    /// Creates a live, never-acknowledged record.
    pub fn new(
        collection: impl Into<String>,
        id: impl Into<String>,
        fields: Fields,
        updated_at: i64,
    ) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            revision: 0,
            updated_at,
            deleted: false,
            fields,
        }
    }

    /// Returns the `(collection, id)` identity.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.collection.clone(), self.id.clone())
    }

    /// Returns a field value, `None` if absent.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Returns true if the record is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_unacknowledged() {
        let mut fields = Fields::new();
        fields.insert("name".into(), "Fern".into());
        let record = Record::new("plants", "p-1", fields, 5);

        assert_eq!(record.revision, 0);
        assert!(record.is_live());
        assert_eq!(record.get("name"), Some(&FieldValue::from("Fern")));
        assert_eq!(record.key(), RecordKey::new("plants", "p-1"));
    }
}
