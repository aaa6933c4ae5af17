//! Merge policies.
//!
//! A policy only selects; it never touches storage. Selection is a pure
//! function of the live segment list and the target count, which keeps merge
//! decisions deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use crate::segment::{SegmentId, SegmentMeta};

/// Largest number of segments combined by a single merge.
pub const DEFAULT_MAX_MERGE_FACTOR: usize = 10;

/// A group of segments selected to be merged together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCandidate {
    /// Source segments, in selection order.
    pub segments: Vec<SegmentId>,

    /// Documents across all sources.
    pub doc_count: u64,

    /// Bytes across all sources.
    pub estimated_size: u64,
}

impl MergeCandidate {
    fn from_metas(metas: &[&Arc<SegmentMeta>]) -> Self {
        MergeCandidate {
            segments: metas.iter().map(|m| m.id).collect(),
            doc_count: metas.iter().map(|m| m.doc_count).sum(),
            estimated_size: metas.iter().map(|m| m.size_bytes).sum(),
        }
    }

    /// Number of source segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the candidate has no sources.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Trait for defining merge policies.
pub trait MergePolicy: Send + Sync + std::fmt::Debug {
    /// Select the next merge for `segments` given `target_segment_count`, or
    /// `None` if no merge is wanted.
    fn select_merge(
        &self,
        segments: &[Arc<SegmentMeta>],
        target_segment_count: usize,
    ) -> Option<MergeCandidate>;

    /// Get policy configuration as key-value pairs for debugging.
    fn get_config(&self) -> HashMap<String, String>;
}

/// Merges the smallest segments first.
///
/// Segments are ordered by document count, then byte size, then sequence, so
/// among equally small segments the oldest is merged first. A merge never
/// combines more segments than needed to reach the target, and never more than
/// `max_merge_factor` at once.
#[derive(Debug, Clone)]
pub struct SmallestFirstMergePolicy {
    /// Largest number of segments combined by one merge.
    pub max_merge_factor: usize,
}

impl Default for SmallestFirstMergePolicy {
    fn default() -> Self {
        SmallestFirstMergePolicy {
            max_merge_factor: DEFAULT_MAX_MERGE_FACTOR,
        }
    }
}

impl SmallestFirstMergePolicy {
    /// Create a policy merging at most `max_merge_factor` segments at once.
    pub fn new(max_merge_factor: usize) -> Self {
        SmallestFirstMergePolicy {
            max_merge_factor: max_merge_factor.max(2),
        }
    }
}

impl MergePolicy for SmallestFirstMergePolicy {
    fn select_merge(
        &self,
        segments: &[Arc<SegmentMeta>],
        target_segment_count: usize,
    ) -> Option<MergeCandidate> {
        let target = target_segment_count.max(1);
        if segments.len() <= target {
            return None;
        }

        // Merging k segments removes k - 1 of them.
        let excess = segments.len() - target;
        let width = (excess + 1).min(self.max_merge_factor).min(segments.len());
        if width < 2 {
            return None;
        }

        let mut ordered: Vec<&Arc<SegmentMeta>> = segments.iter().collect();
        ordered.sort_by_key(|m| (m.doc_count, m.size_bytes, m.sequence));

        Some(MergeCandidate::from_metas(&ordered[..width]))
    }

    fn get_config(&self) -> HashMap<String, String> {
        let mut config = HashMap::new();
        config.insert("policy_type".to_string(), "smallest_first".to_string());
        config.insert(
            "max_merge_factor".to_string(),
            self.max_merge_factor.to_string(),
        );
        config
    }
}

/// No-merge policy for testing or read-only scenarios.
#[derive(Debug, Clone, Default)]
pub struct NoMergePolicy;

impl MergePolicy for NoMergePolicy {
    fn select_merge(
        &self,
        _segments: &[Arc<SegmentMeta>],
        _target_segment_count: usize,
    ) -> Option<MergeCandidate> {
        None
    }

    fn get_config(&self) -> HashMap<String, String> {
        let mut config = HashMap::new();
        config.insert("policy_type".to_string(), "no_merge".to_string());
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn segment(doc_count: u64, size_bytes: u64, sequence: u64) -> Arc<SegmentMeta> {
        Arc::new(SegmentMeta {
            id: SegmentId::new(),
            doc_count,
            size_bytes,
            sequence,
            created_at: Utc::now(),
        })
    }

    #[test]
    fn test_no_merge_at_or_below_target() {
        let policy = SmallestFirstMergePolicy::default();
        let segments: Vec<_> = (0..4).map(|i| segment(10, 100, i)).collect();

        assert!(policy.select_merge(&segments, 4).is_none());
        assert!(policy.select_merge(&segments, 8).is_none());
        assert!(policy.select_merge(&[], 1).is_none());
    }

    #[test]
    fn test_selects_smallest_first() {
        let policy = SmallestFirstMergePolicy::default();
        let segments = vec![
            segment(500, 5_000, 1),
            segment(10, 100, 2),
            segment(300, 3_000, 3),
            segment(20, 200, 4),
        ];

        let candidate = policy.select_merge(&segments, 3).unwrap();
        assert_eq!(candidate.segments, vec![segments[1].id, segments[3].id]);
        assert_eq!(candidate.doc_count, 30);
        assert_eq!(candidate.estimated_size, 300);
    }

    #[test]
    fn test_ties_broken_by_age() {
        let policy = SmallestFirstMergePolicy::default();
        let segments = vec![
            segment(10, 100, 7),
            segment(10, 100, 3),
            segment(10, 100, 5),
        ];

        let candidate = policy.select_merge(&segments, 2).unwrap();
        assert_eq!(candidate.segments, vec![segments[1].id, segments[2].id]);
    }

    #[test]
    fn test_width_reaches_target_in_one_merge() {
        let policy = SmallestFirstMergePolicy::default();
        let segments: Vec<_> = (0..10).map(|i| segment(100, 1_000, i)).collect();

        let candidate = policy.select_merge(&segments, 4).unwrap();
        assert_eq!(candidate.len(), 7);
        assert_eq!(segments.len() - candidate.len() + 1, 4);
    }

    #[test]
    fn test_width_capped_by_merge_factor() {
        let policy = SmallestFirstMergePolicy::new(3);
        let segments: Vec<_> = (0..20).map(|i| segment(1, 10, i)).collect();

        let candidate = policy.select_merge(&segments, 1).unwrap();
        assert_eq!(candidate.len(), 3);
    }

    #[test]
    fn test_zero_target_treated_as_one() {
        let policy = SmallestFirstMergePolicy::default();
        let segments: Vec<_> = (0..3).map(|i| segment(1, 10, i)).collect();

        let candidate = policy.select_merge(&segments, 0).unwrap();
        assert_eq!(candidate.len(), 3);
    }

    #[test]
    fn test_no_merge_policy() {
        let segments: Vec<_> = (0..30).map(|i| segment(1, 10, i)).collect();
        assert!(NoMergePolicy.select_merge(&segments, 1).is_none());
        assert_eq!(
            NoMergePolicy.get_config().get("policy_type").map(String::as_str),
            Some("no_merge")
        );
    }
}
