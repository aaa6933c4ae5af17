//! Segments and the live segment set.
//!
//! A segment is an immutable, durably written batch of documents. Once its
//! file is closed it is never modified: it is either merged into a larger
//! segment or deleted. The [`SegmentCatalog`] owns the index's live
//! [`SegmentSet`] and publishes new versions of it atomically.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod catalog;
pub mod store;

pub use catalog::{SegmentCatalog, SegmentSet};
pub use store::SegmentStore;

/// File extension of segment files.
pub const SEGMENT_EXTENSION: &str = "seg";

/// Unique identifier of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(Uuid);

impl SegmentId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        SegmentId(Uuid::new_v4())
    }

    /// Parse an id from its string form.
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(SegmentId)
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Metadata of one immutable segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Unique identifier.
    pub id: SegmentId,

    /// Number of documents stored in the segment.
    pub doc_count: u64,

    /// Size of the segment file in bytes.
    pub size_bytes: u64,

    /// Creation sequence, monotonically increasing per index.
    pub sequence: u64,

    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
}

impl SegmentMeta {
    /// Name of the file holding this segment.
    pub fn file_name(&self) -> String {
        segment_file_name(&self.id)
    }
}

/// Name of the file holding the segment with the given id.
pub fn segment_file_name(id: &SegmentId) -> String {
    format!("{id}.{SEGMENT_EXTENSION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_id_round_trip() {
        let id = SegmentId::new();
        let text = id.to_string();

        assert_eq!(text.len(), 32);
        assert_eq!(SegmentId::parse(&text), Some(id));
        assert_ne!(SegmentId::new(), id);
    }

    #[test]
    fn test_file_name() {
        let meta = SegmentMeta {
            id: SegmentId::new(),
            doc_count: 10,
            size_bytes: 1024,
            sequence: 3,
            created_at: Utc::now(),
        };

        assert_eq!(meta.file_name(), format!("{}.seg", meta.id));
    }
}
