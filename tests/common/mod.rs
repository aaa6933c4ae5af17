//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use segforge::document::Document;
use segforge::error::{Result, SegforgeError};
use segforge::storage::{MemoryStorage, Storage, StorageInput, StorageOutput};

/// Memory storage that fails to create segment files once a quota is used up.
#[derive(Debug)]
pub struct FailingStorage {
    inner: MemoryStorage,
    segment_quota: AtomicUsize,
    failures: AtomicUsize,
}

impl FailingStorage {
    /// Allow `segment_quota` segment files, then fail every further one.
    pub fn new(inner: MemoryStorage, segment_quota: usize) -> Self {
        FailingStorage {
            inner,
            segment_quota: AtomicUsize::new(segment_quota),
            failures: AtomicUsize::new(0),
        }
    }

    /// Allow `count` more segment files.
    pub fn allow(&self, count: usize) {
        self.segment_quota.store(count, Ordering::SeqCst);
    }

    /// Segment file creations refused so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

impl Storage for FailingStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        self.inner.open_input(name)
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        if name.ends_with(".seg") {
            let granted = self
                .segment_quota
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if !granted {
                self.failures.fetch_add(1, Ordering::SeqCst);
                return Err(SegforgeError::storage(format!("injected failure creating {name}")));
            }
        }
        self.inner.create_output(name)
    }

    fn file_exists(&self, name: &str) -> bool {
        self.inner.file_exists(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.inner.delete_file(name)
    }

    fn list_files(&self) -> Result<Vec<String>> {
        self.inner.list_files()
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.inner.file_size(name)
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.inner.rename_file(old_name, new_name)
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}

/// Rows with a text and an integer field, keyed by `keys`.
pub fn rows(keys: std::ops::Range<u64>) -> Vec<Document> {
    keys.map(|key| {
        Document::builder(key)
            .add_text("body", format!("the quick brown fox {key}"))
            .add_integer("rank", key as i64)
            .build()
    })
    .collect()
}

/// Sorted keys of `documents`.
pub fn sorted_keys(documents: &[Document]) -> Vec<u64> {
    let mut keys: Vec<u64> = documents.iter().map(|d| d.key()).collect();
    keys.sort_unstable();
    keys
}

/// Segment files present in `storage`.
pub fn segment_files(storage: &dyn Storage) -> Vec<String> {
    storage
        .list_files()
        .unwrap_or_default()
        .into_iter()
        .filter(|name| name.ends_with(".seg"))
        .collect()
}

/// A fresh shared memory storage.
pub fn memory_storage() -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::new_default())
}
