//! Documents fed to the segment builders.
//!
//! A [`Document`] is one table row after extraction: a stable row key plus a
//! list of field/value pairs. The engine treats field contents as opaque; it
//! only needs the key (to check conservation across builds and merges) and an
//! honest estimate of how much memory the document pins while buffered.
//!
//! # Examples
//!
//! ```
//! use segforge::document::{Document, FieldValue};
//!
//! let doc = Document::builder(42)
//!     .add_text("title", "Rust Programming Guide")
//!     .add_integer("year", 2024)
//!     .build();
//!
//! assert_eq!(doc.key(), 42);
//! assert_eq!(doc.get("year"), Some(&FieldValue::Integer(2024)));
//! ```

use std::mem::size_of;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SegforgeError};

/// Row key identifying a document across segments.
pub type DocKey = u64;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Text value
    Text(String),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Boolean value
    Boolean(bool),
    /// Null value
    Null,
}

impl FieldValue {
    /// Convert to text if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Heap bytes owned by this value.
    fn heap_bytes(&self) -> usize {
        match self {
            FieldValue::Text(s) => s.capacity(),
            _ => 0,
        }
    }

    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => FieldValue::Text(s.clone()),
            // Nested structures are indexed as their JSON text.
            other => FieldValue::Text(other.to_string()),
        }
    }
}

/// One row to be indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    key: DocKey,
    fields: Vec<(String, FieldValue)>,
}

impl Document {
    /// Create an empty document for the given row key.
    pub fn new(key: DocKey) -> Self {
        Document {
            key,
            fields: Vec::new(),
        }
    }

    /// Start building a document.
    pub fn builder(key: DocKey) -> DocumentBuilder {
        DocumentBuilder {
            doc: Document::new(key),
        }
    }

    /// Build a document from a JSON object, taking the row key from `key_field`.
    ///
    /// The key field must hold a non-negative integer and is not stored as a
    /// regular field.
    pub fn from_json(value: &Value, key_field: &str) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| SegforgeError::other("Document must be a JSON object"))?;

        let key = object
            .get(key_field)
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                SegforgeError::other(format!(
                    "Document is missing non-negative integer key field '{key_field}'"
                ))
            })?;

        let mut doc = Document::new(key);
        for (name, field_value) in object {
            if name != key_field {
                doc.add_field(name.clone(), FieldValue::from_json(field_value));
            }
        }
        Ok(doc)
    }

    /// Row key of this document.
    pub fn key(&self) -> DocKey {
        self.key
    }

    /// Add a field.
    pub fn add_field<S: Into<String>>(&mut self, name: S, value: FieldValue) {
        self.fields.push((name.into(), value));
    }

    /// Get the first value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// All fields in insertion order.
    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Bytes this document retains while buffered in a segment builder.
    ///
    /// Counts the document struct itself (its slot in the buffer), the field
    /// vector's full capacity and every owned string, not just the text length.
    pub fn retained_bytes(&self) -> usize {
        size_of::<Document>() + self.heap_bytes()
    }

    /// Heap bytes owned by the document, excluding the struct itself.
    pub fn heap_bytes(&self) -> usize {
        let slots = self.fields.capacity() * size_of::<(String, FieldValue)>();
        let owned: usize = self
            .fields
            .iter()
            .map(|(name, value)| name.capacity() + value.heap_bytes())
            .sum();
        slots + owned
    }
}

/// Builder for [`Document`].
#[derive(Debug)]
pub struct DocumentBuilder {
    doc: Document,
}

impl DocumentBuilder {
    /// Add a text field.
    pub fn add_text<S: Into<String>, T: Into<String>>(mut self, name: S, value: T) -> Self {
        self.doc.add_field(name, FieldValue::Text(value.into()));
        self
    }

    /// Add an integer field.
    pub fn add_integer<S: Into<String>>(mut self, name: S, value: i64) -> Self {
        self.doc.add_field(name, FieldValue::Integer(value));
        self
    }

    /// Add a float field.
    pub fn add_float<S: Into<String>>(mut self, name: S, value: f64) -> Self {
        self.doc.add_field(name, FieldValue::Float(value));
        self
    }

    /// Add a boolean field.
    pub fn add_boolean<S: Into<String>>(mut self, name: S, value: bool) -> Self {
        self.doc.add_field(name, FieldValue::Boolean(value));
        self
    }

    /// Finish the document.
    pub fn build(self) -> Document {
        self.doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_builder() {
        let doc = Document::builder(7)
            .add_text("body", "hello world")
            .add_float("score", 0.5)
            .add_boolean("published", true)
            .build();

        assert_eq!(doc.key(), 7);
        assert_eq!(doc.len(), 3);
        assert_eq!(doc.get("body").and_then(FieldValue::as_text), Some("hello world"));
        assert!(doc.get("missing").is_none());
    }

    #[test]
    fn test_retained_bytes_counts_heap() {
        let small = Document::builder(1).add_text("body", "x").build();
        let large = Document::builder(1)
            .add_text("body", "x".repeat(10_000))
            .build();

        assert!(small.retained_bytes() > size_of::<Document>());
        assert!(large.retained_bytes() >= small.retained_bytes() + 9_999);
    }

    #[test]
    fn test_retained_bytes_counts_field_slots() {
        let mut doc = Document::new(1);
        let empty = doc.retained_bytes();
        doc.add_field("flag", FieldValue::Boolean(true));

        assert!(doc.retained_bytes() >= empty + size_of::<(String, FieldValue)>() + 4);
    }

    #[test]
    fn test_from_json() {
        let value = serde_json::json!({
            "id": 12,
            "title": "Parallel builds",
            "pages": 300,
            "rating": 4.5,
            "tags": ["a", "b"],
            "draft": null
        });

        let doc = Document::from_json(&value, "id").unwrap();
        assert_eq!(doc.key(), 12);
        assert!(doc.get("id").is_none());
        assert_eq!(doc.get("pages"), Some(&FieldValue::Integer(300)));
        assert_eq!(doc.get("rating"), Some(&FieldValue::Float(4.5)));
        assert_eq!(doc.get("draft"), Some(&FieldValue::Null));
        assert_eq!(
            doc.get("tags"),
            Some(&FieldValue::Text("[\"a\",\"b\"]".to_string()))
        );
    }

    #[test]
    fn test_from_json_requires_key() {
        let value = serde_json::json!({"title": "no key"});
        assert!(Document::from_json(&value, "id").is_err());

        let value = serde_json::json!({"id": -1});
        assert!(Document::from_json(&value, "id").is_err());

        let value = serde_json::json!(["not", "an", "object"]);
        assert!(Document::from_json(&value, "id").is_err());
    }
}
