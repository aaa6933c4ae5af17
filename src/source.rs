//! Positional access to the rows of a build job.
//!
//! Workers are handed contiguous position ranges rather than pre-split
//! vectors, so a source can stream its rows (a table scan, a generator)
//! without materializing the whole job in memory.

use std::ops::Range;

use crate::document::Document;

/// Rows addressable by position.
pub trait RowSource: Sync {
    /// Total number of rows.
    fn row_count(&self) -> usize;

    /// Rows in `range`, in order. `range` is always within `0..row_count()`.
    fn rows(&self, range: Range<usize>) -> Box<dyn Iterator<Item = Document> + Send + '_>;
}

impl RowSource for [Document] {
    fn row_count(&self) -> usize {
        self.len()
    }

    fn rows(&self, range: Range<usize>) -> Box<dyn Iterator<Item = Document> + Send + '_> {
        Box::new(self[range].iter().cloned())
    }
}

impl RowSource for Vec<Document> {
    fn row_count(&self) -> usize {
        self.len()
    }

    fn rows(&self, range: Range<usize>) -> Box<dyn Iterator<Item = Document> + Send + '_> {
        self.as_slice().rows(range)
    }
}

/// Rows produced on demand from their position.
pub struct FnRowSource<F> {
    count: usize,
    make_row: F,
}

impl<F> FnRowSource<F>
where
    F: Fn(usize) -> Document + Sync,
{
    /// `count` rows, row `i` being `make_row(i)`.
    pub fn new(count: usize, make_row: F) -> Self {
        FnRowSource { count, make_row }
    }
}

impl<F> RowSource for FnRowSource<F>
where
    F: Fn(usize) -> Document + Sync,
{
    fn row_count(&self) -> usize {
        self.count
    }

    fn rows(&self, range: Range<usize>) -> Box<dyn Iterator<Item = Document> + Send + '_> {
        Box::new(range.map(|i| (self.make_row)(i)))
    }
}

/// Split `0..len` into at most `parts` contiguous ranges whose sizes differ
/// by at most one. Empty ranges are omitted.
pub fn shard_ranges(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1).min(len);
    if parts == 0 {
        return Vec::new();
    }

    let base = len / parts;
    let extra = len % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;

    for i in 0..parts {
        let size = base + usize::from(i < extra);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_ranges_balanced() {
        let ranges = shard_ranges(10, 3);
        assert_eq!(ranges, vec![0..4, 4..7, 7..10]);

        let ranges = shard_ranges(8, 4);
        assert!(ranges.iter().all(|r| r.len() == 2));
    }

    #[test]
    fn test_shard_ranges_fewer_rows_than_parts() {
        assert_eq!(shard_ranges(2, 8), vec![0..1, 1..2]);
        assert!(shard_ranges(0, 4).is_empty());
    }

    #[test]
    fn test_shard_ranges_cover_everything_once() {
        for len in [1usize, 7, 100, 1001] {
            for parts in 1..9 {
                let ranges = shard_ranges(len, parts);
                let covered: Vec<usize> = ranges.into_iter().flatten().collect();
                assert_eq!(covered, (0..len).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn test_vec_and_fn_sources() {
        let docs: Vec<Document> = (0..5).map(Document::new).collect();
        let keys: Vec<u64> = docs.rows(1..4).map(|d| d.key()).collect();
        assert_eq!(keys, vec![1, 2, 3]);

        let generated = FnRowSource::new(100, |i| Document::new(i as u64 * 2));
        assert_eq!(generated.row_count(), 100);
        let keys: Vec<u64> = generated.rows(98..100).map(|d| d.key()).collect();
        assert_eq!(keys, vec![196, 198]);
    }
}
