//! Per-worker memory accounting.

/// Outcome of recording bytes against a budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    /// Usage is still below the budget.
    Continue,
    /// Usage met or exceeded the budget; the caller must flush before
    /// accepting more input.
    FlushRequired,
}

/// Tracks the bytes buffered by one worker's in-progress segment.
///
/// Owned by exactly one worker, so it is plain counters with no locking.
#[derive(Debug, Clone)]
pub struct MemoryBudgetTracker {
    budget_bytes: usize,
    used_bytes: usize,
    peak_bytes: usize,
}

impl MemoryBudgetTracker {
    /// Create a tracker for the given budget. A zero budget flushes after
    /// every record.
    pub fn new(budget_bytes: usize) -> Self {
        MemoryBudgetTracker {
            budget_bytes,
            used_bytes: 0,
            peak_bytes: 0,
        }
    }

    /// Add `bytes_added` to the running total.
    pub fn record(&mut self, bytes_added: usize) -> BudgetStatus {
        self.used_bytes = self.used_bytes.saturating_add(bytes_added);
        self.peak_bytes = self.peak_bytes.max(self.used_bytes);

        if self.used_bytes >= self.budget_bytes {
            BudgetStatus::FlushRequired
        } else {
            BudgetStatus::Continue
        }
    }

    /// Reset after a flush.
    pub fn reset(&mut self) {
        self.used_bytes = 0;
    }

    /// Bytes currently accounted.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// The configured budget.
    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    /// Highest usage seen since creation.
    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes
    }
}
