//! Typed domain models over the garden collections.
//!
//! Records are stored as field maps; a [`Document`] maps one collection to a
//! Rust struct and back. Decoding goes through the same field kinds the
//! schema enforces, so a record that passed validation always decodes.

use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use crate::types::{FieldValue, Fields};

/// A typed view of one collection.
pub trait Document: Sized {
    /// Collection the type is stored in.
    const COLLECTION: &'static str;

    /// Encodes into record fields.
    fn to_fields(&self) -> Fields;

    /// Decodes from a stored record.
    fn from_record(record: &Record) -> CoreResult<Self>;
}

/// A decoded document together with its record metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<D> {
    /// Record id.
    pub id: String,
    /// Last acknowledged revision.
    pub revision: u64,
    /// Last change time, in milliseconds.
    pub updated_at: i64,
    /// The document.
    pub doc: D,
}

impl<D: Document> Stored<D> {
    /// Decodes a record.
    pub fn from_record(record: &Record) -> CoreResult<Self> {
        Ok(Self {
            id: record.id.clone(),
            revision: record.revision,
            updated_at: record.updated_at,
            doc: D::from_record(record)?,
        })
    }
}

struct Reader<'a> {
    record: &'a Record,
}

impl<'a> Reader<'a> {
    fn new<D: Document>(record: &'a Record) -> CoreResult<Self> {
        if record.collection != D::COLLECTION {
            return Err(CoreError::Decode {
                collection: record.collection.clone(),
                message: format!("expected a {} record", D::COLLECTION),
            });
        }
        Ok(Self { record })
    }

    fn fail(&self, name: &str, expected: &str) -> CoreError {
        CoreError::Decode {
            collection: self.record.collection.clone(),
            message: format!("field `{name}` is not {expected}"),
        }
    }

    fn value(&self, name: &str) -> Option<&'a FieldValue> {
        self.record.fields.get(name).filter(|v| !v.is_null())
    }

    fn text(&self, name: &str) -> CoreResult<String> {
        self.opt_text(name)?.ok_or_else(|| self.fail(name, "text"))
    }

    fn opt_text(&self, name: &str) -> CoreResult<Option<String>> {
        self.value(name)
            .map(|v| v.as_text().map(str::to_string).ok_or_else(|| self.fail(name, "text")))
            .transpose()
    }

    fn opt_integer(&self, name: &str) -> CoreResult<Option<i64>> {
        self.value(name)
            .map(|v| v.as_integer().ok_or_else(|| self.fail(name, "an integer")))
            .transpose()
    }

    fn opt_timestamp(&self, name: &str) -> CoreResult<Option<i64>> {
        self.value(name)
            .map(|v| v.as_timestamp().ok_or_else(|| self.fail(name, "a timestamp")))
            .transpose()
    }

    fn flag(&self, name: &str) -> CoreResult<bool> {
        self.value(name)
            .map(|v| v.as_bool().ok_or_else(|| self.fail(name, "a bool")))
            .transpose()
            .map(Option::unwrap_or_default)
    }

    fn tags(&self, name: &str) -> CoreResult<Vec<String>> {
        match self.value(name) {
            None => Ok(Vec::new()),
            Some(FieldValue::List(items)) => items
                .iter()
                .map(|i| i.as_text().map(str::to_string).ok_or_else(|| self.fail(name, "a text list")))
                .collect(),
            Some(_) => Err(self.fail(name, "a list")),
        }
    }
}

struct Writer(Fields);

impl Writer {
    fn new() -> Self {
        Self(Fields::new())
    }

    fn set(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    fn timestamp(self, name: &str, value: Option<i64>) -> Self {
        self.set(name, value.map_or(FieldValue::Null, FieldValue::Timestamp))
    }

    fn tags(self, name: &str, tags: &[String]) -> Self {
        let list = tags.iter().map(|t| FieldValue::Text(t.clone())).collect();
        self.set(name, FieldValue::List(list))
    }
}

/// A plant in the user's garden.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plant {
    /// Display name.
    pub name: String,
    /// Botanical species.
    pub species: Option<String>,
    /// Where it grows.
    pub location: Option<String>,
    /// Days between waterings.
    pub watering_interval_days: Option<i64>,
    /// Last watering time.
    pub last_watered_at: Option<i64>,
    /// Photo location.
    pub image_url: Option<String>,
    /// Free-form notes.
    pub notes: Option<String>,
}

impl Document for Plant {
    const COLLECTION: &'static str = "plants";

    fn to_fields(&self) -> Fields {
        Writer::new()
            .set("name", self.name.as_str())
            .set("species", self.species.clone())
            .set("location", self.location.clone())
            .set("watering_interval_days", self.watering_interval_days)
            .timestamp("last_watered_at", self.last_watered_at)
            .set("image_url", self.image_url.clone())
            .set("notes", self.notes.clone())
            .0
    }

    fn from_record(record: &Record) -> CoreResult<Self> {
        let r = Reader::new::<Self>(record)?;
        Ok(Self {
            name: r.text("name")?,
            species: r.opt_text("species")?,
            location: r.opt_text("location")?,
            watering_interval_days: r.opt_integer("watering_interval_days")?,
            last_watered_at: r.opt_timestamp("last_watered_at")?,
            image_url: r.opt_text("image_url")?,
            notes: r.opt_text("notes")?,
        })
    }
}

/// A care task, such as watering or repotting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Task {
    /// What to do.
    pub title: String,
    /// Plant the task is for.
    pub plant_id: Option<String>,
    /// When it is due.
    pub due_at: Option<i64>,
    /// Completion flag.
    pub done: bool,
    /// Repeat period in days.
    pub repeat_days: Option<i64>,
    /// Free-form notes.
    pub notes: Option<String>,
}

impl Document for Task {
    const COLLECTION: &'static str = "tasks";

    fn to_fields(&self) -> Fields {
        Writer::new()
            .set("title", self.title.as_str())
            .set("plant_id", self.plant_id.clone())
            .timestamp("due_at", self.due_at)
            .set("done", self.done)
            .set("repeat_days", self.repeat_days)
            .set("notes", self.notes.clone())
            .0
    }

    fn from_record(record: &Record) -> CoreResult<Self> {
        let r = Reader::new::<Self>(record)?;
        Ok(Self {
            title: r.text("title")?,
            plant_id: r.opt_text("plant_id")?,
            due_at: r.opt_timestamp("due_at")?,
            done: r.flag("done")?,
            repeat_days: r.opt_integer("repeat_days")?,
            notes: r.opt_text("notes")?,
        })
    }
}

/// A garden diary entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiaryEntry {
    /// Entry title.
    pub title: String,
    /// Plant the entry is about.
    pub plant_id: Option<String>,
    /// Entry text.
    pub body: Option<String>,
    /// When the observation was made.
    pub recorded_at: Option<i64>,
    /// Tags.
    pub tags: Vec<String>,
}

impl Document for DiaryEntry {
    const COLLECTION: &'static str = "diary_entries";

    fn to_fields(&self) -> Fields {
        Writer::new()
            .set("title", self.title.as_str())
            .set("plant_id", self.plant_id.clone())
            .set("body", self.body.clone())
            .timestamp("recorded_at", self.recorded_at)
            .tags("tags", &self.tags)
            .0
    }

    fn from_record(record: &Record) -> CoreResult<Self> {
        let r = Reader::new::<Self>(record)?;
        Ok(Self {
            title: r.text("title")?,
            plant_id: r.opt_text("plant_id")?,
            body: r.opt_text("body")?,
            recorded_at: r.opt_timestamp("recorded_at")?,
            tags: r.tags("tags")?,
        })
    }
}

/// A community post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Post {
    /// Author display name.
    pub author: String,
    /// Post text.
    pub body: String,
    /// Attached photo.
    pub image_url: Option<String>,
    /// Like counter.
    pub likes: i64,
    /// Tags.
    pub tags: Vec<String>,
}

impl Document for Post {
    const COLLECTION: &'static str = "posts";

    fn to_fields(&self) -> Fields {
        Writer::new()
            .set("author", self.author.as_str())
            .set("body", self.body.as_str())
            .set("image_url", self.image_url.clone())
            .set("likes", self.likes)
            .tags("tags", &self.tags)
            .0
    }

    fn from_record(record: &Record) -> CoreResult<Self> {
        let r = Reader::new::<Self>(record)?;
        Ok(Self {
            author: r.text("author")?,
            body: r.text("body")?,
            image_url: r.opt_text("image_url")?,
            likes: r.opt_integer("likes")?.unwrap_or(0),
            tags: r.tags("tags")?,
        })
    }
}
