//! Worker pools, one per build job.
//!
//! Bulk builds, statements and maintenance passes never share threads: each
//! job instantiates its own pool sized from its own settings and drops it when
//! the job ends.

use rayon::{Scope, ThreadPool, ThreadPoolBuilder};

use crate::config::WriterResources;
use crate::error::{Result, SegforgeError};

/// A fixed-size pool of named worker threads owned by one job.
#[derive(Debug)]
pub struct WorkerPool {
    kind: WriterResources,
    size: usize,
    pool: ThreadPool,
}

impl WorkerPool {
    /// Create a pool of `size` threads named `<kind>-worker-<n>`.
    pub fn new(kind: WriterResources, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(SegforgeError::configuration(
                "worker pool size must be > 0",
            ));
        }

        let name = kind.name();
        let pool = ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(move |i| format!("{name}-worker-{i}"))
            .build()
            .map_err(|e| SegforgeError::internal(format!("Failed to create thread pool: {e}")))?;

        Ok(WorkerPool { kind, size, pool })
    }

    /// Job kind this pool serves.
    pub fn kind(&self) -> WriterResources {
        self.kind
    }

    /// Number of threads.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `op` inside the pool; returns once every task spawned in the scope
    /// has finished.
    pub fn scope<'scope, OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce(&Scope<'scope>) -> R + Send,
        R: Send,
    {
        self.pool.scope(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_pool_threads_are_named() {
        let pool = WorkerPool::new(WriterResources::Statement, 2).unwrap();
        let names = Mutex::new(Vec::new());

        pool.scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|_| {
                    let name = std::thread::current().name().map(str::to_string);
                    names.lock().unwrap().push(name);
                });
            }
        });

        let names = names.into_inner().unwrap();
        assert_eq!(names.len(), 4);
        assert!(
            names
                .iter()
                .all(|n| n.as_deref().is_some_and(|n| n.starts_with("statement-worker-")))
        );
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.kind(), WriterResources::Statement);
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(matches!(
            WorkerPool::new(WriterResources::CreateIndex, 0),
            Err(SegforgeError::Configuration(_))
        ));
    }

    #[test]
    fn test_pools_are_independent() {
        let build = WorkerPool::new(WriterResources::CreateIndex, 3).unwrap();
        let statement = WorkerPool::new(WriterResources::Statement, 1).unwrap();

        let observed = build.scope(|_| statement.scope(|_| std::thread::current().name().map(str::to_string)));
        assert_eq!(observed.as_deref(), Some("statement-worker-0"));
    }
}
