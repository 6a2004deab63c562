//! Bounded, shareable history buffers.

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

/// Fixed-capacity ring buffer; the oldest entry is evicted on overflow.
///
/// Interior mutability lets one writer evict while readers take snapshots.
#[derive(Debug)]
pub struct BoundedHistory<T> {
    entries: RwLock<VecDeque<T>>,
    capacity: usize,
}

impl<T: Clone> BoundedHistory<T> {
    /// Create a history holding at most `capacity` entries
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, returning the evicted one if the buffer was full
    pub fn push(&self, entry: T) -> Option<T> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let evicted = if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        entries.push_back(entry);
        evicted
    }

    /// Copy of all entries, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.read(|e| e.iter().cloned().collect())
    }

    /// Copy of the newest `n` entries, oldest first
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<T> {
        self.read(|e| e.iter().skip(e.len().saturating_sub(n)).cloned().collect())
    }

    /// Newest entry
    #[must_use]
    pub fn last(&self) -> Option<T> {
        self.read(|e| e.back().cloned())
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.read(VecDeque::len)
    }

    /// Whether the buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn read<R>(&self, f: impl FnOnce(&VecDeque<T>) -> R) -> R {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        f(&entries)
    }
}
