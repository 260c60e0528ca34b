//! Collection schemas, validated at the storage boundary.
//!
//! Records are loosely shaped field maps on the wire. Every local write is
//! checked against the registered [`CollectionSchema`] before it is staged,
//! so a malformed record never reaches the journal.

use crate::error::{CoreError, CoreResult};
use crate::types::{FieldKind, Fields};
use std::collections::BTreeMap;

/// Declaration of one field of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Expected value kind.
    pub kind: FieldKind,
    /// Whether the field must be present and non-null.
    pub required: bool,
}

impl FieldSpec {
    /// A required field.
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    /// An optional field.
    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// Declaration of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    /// Collection name.
    pub name: String,
    fields: BTreeMap<String, FieldSpec>,
}

impl CollectionSchema {
    /// Creates a collection with no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a field declaration.
    #[must_use]
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.insert(spec.name.clone(), spec);
        self
    }

    /// Returns the declaration of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// Iterates over field declarations in name order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.values()
    }

    /// Validates a full field set for a new record.
    pub fn validate_create(&self, fields: &Fields) -> CoreResult<()> {
        self.validate_values(fields)?;
        for spec in self.fields.values().filter(|s| s.required) {
            if !fields.contains_key(&spec.name) {
                return Err(CoreError::validation(
                    &self.name,
                    format!("missing required field `{}`", spec.name),
                ));
            }
        }
        Ok(())
    }

    /// Validates a partial field set for an update.
    pub fn validate_update(&self, changes: &Fields) -> CoreResult<()> {
        self.validate_values(changes)
    }

    fn validate_values(&self, fields: &Fields) -> CoreResult<()> {
        for (name, value) in fields {
            let Some(spec) = self.fields.get(name) else {
                return Err(CoreError::validation(
                    &self.name,
                    format!("unknown field `{name}`"),
                ));
            };
            match value.kind() {
                None if spec.required => {
                    return Err(CoreError::validation(
                        &self.name,
                        format!("required field `{name}` cannot be null"),
                    ));
                }
                Some(kind) if kind != spec.kind => {
                    return Err(CoreError::validation(
                        &self.name,
                        format!("field `{name}` expects {}, got {kind}", spec.kind),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Registry of collection schemas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    collections: BTreeMap<String, CollectionSchema>,
}

impl Schema {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a collection, replacing any previous declaration.
    #[must_use]
    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.collections.insert(collection.name.clone(), collection);
        self
    }

    /// Returns the schema for `name`.
    pub fn collection(&self, name: &str) -> CoreResult<&CollectionSchema> {
        self.collections
            .get(name)
            .ok_or_else(|| CoreError::validation(name, "unknown collection"))
    }

    /// Returns the registered collection names.
    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    /// The garden app's collections: plants, tasks, diary entries and posts.
    #[must_use]
    pub fn garden() -> Self {
        use FieldKind::{Bool, Integer, List, Text, Timestamp};

        Self::new()
            .with_collection(
                CollectionSchema::new("plants")
                    .field(FieldSpec::required("name", Text))
                    .field(FieldSpec::optional("species", Text))
                    .field(FieldSpec::optional("location", Text))
                    .field(FieldSpec::optional("watering_interval_days", Integer))
                    .field(FieldSpec::optional("last_watered_at", Timestamp))
                    .field(FieldSpec::optional("image_url", Text))
                    .field(FieldSpec::optional("notes", Text)),
            )
            .with_collection(
                CollectionSchema::new("tasks")
                    .field(FieldSpec::required("title", Text))
                    .field(FieldSpec::optional("plant_id", Text))
                    .field(FieldSpec::optional("due_at", Timestamp))
                    .field(FieldSpec::optional("done", Bool))
                    .field(FieldSpec::optional("repeat_days", Integer))
                    .field(FieldSpec::optional("notes", Text)),
            )
            .with_collection(
                CollectionSchema::new("diary_entries")
                    .field(FieldSpec::required("title", Text))
                    .field(FieldSpec::optional("plant_id", Text))
                    .field(FieldSpec::optional("body", Text))
                    .field(FieldSpec::optional("recorded_at", Timestamp))
                    .field(FieldSpec::optional("tags", List)),
            )
            .with_collection(
                CollectionSchema::new("posts")
                    .field(FieldSpec::required("author", Text))
                    .field(FieldSpec::required("body", Text))
                    .field(FieldSpec::optional("image_url", Text))
                    .field(FieldSpec::optional("likes", Integer))
                    .field(FieldSpec::optional("tags", List)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;

    fn fields(pairs: &[(&str, FieldValue)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn garden_has_four_collections() {
        let schema = Schema::garden();
        let names: Vec<_> = schema.collection_names().collect();
        assert_eq!(names, ["diary_entries", "plants", "posts", "tasks"]);
    }

    #[test]
    fn create_requires_required_fields() {
        let schema = Schema::garden();
        let plants = schema.collection("plants").unwrap();

        assert!(plants
            .validate_create(&fields(&[("name", "Fern".into())]))
            .is_ok());
        let err = plants
            .validate_create(&fields(&[("species", "Nephrolepis".into())]))
            .unwrap_err();
        assert!(err.to_string().contains("missing required field `name`"));
    }

    #[test]
    fn kind_mismatch_rejected() {
        let schema = Schema::garden();
        let tasks = schema.collection("tasks").unwrap();
        let err = tasks
            .validate_update(&fields(&[("done", "yes".into())]))
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn unknown_field_and_collection_rejected() {
        let schema = Schema::garden();
        assert!(schema.collection("weeds").is_err());
        let posts = schema.collection("posts").unwrap();
        assert!(posts
            .validate_update(&fields(&[("colour", "green".into())]))
            .is_err());
    }

    #[test]
    fn null_allowed_only_for_optional() {
        let schema = Schema::garden();
        let tasks = schema.collection("tasks").unwrap();
        assert!(tasks
            .validate_update(&fields(&[("due_at", FieldValue::Null)]))
            .is_ok());
        assert!(tasks
            .validate_update(&fields(&[("title", FieldValue::Null)]))
            .is_err());
    }
}
