use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use time::OffsetDateTime;

/// A file waiting to be backed up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingItem {
    /// Path relative to the source backend root.
    pub path: PathBuf,
    /// When the producer finished the file. Orders the batch and picks the
    /// day bucket.
    pub enqueued_at: OffsetDateTime,
}

impl PendingItem {
    pub fn new(path: impl Into<PathBuf>, enqueued_at: OffsetDateTime) -> Self {
        Self {
            path: path.into(),
            enqueued_at,
        }
    }
}

/// Producer side of the backup: an unordered list of pending items.
///
/// The lock is held only to push or to swap the list out, never across an
/// `.await`, so `add` never waits on backend I/O.
#[derive(Debug, Default)]
pub struct WorkQueue {
    items: Mutex<Vec<PendingItem>>,
}

impl WorkQueue {
    pub fn add(&self, item: PendingItem) {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).push(item);
    }

    /// Take every pending item, leaving the queue empty.
    pub fn drain(&self) -> Vec<PendingItem> {
        std::mem::take(&mut *self.items.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use time::macros::datetime;

    #[test]
    fn drain_empties_the_queue() {
        let queue = WorkQueue::default();
        queue.add(PendingItem::new("a.pb", datetime!(2024-01-01 10:00 UTC)));
        queue.add(PendingItem::new("b.pb", datetime!(2024-01-01 09:00 UTC)));
        assert_eq!(queue.len(), 2);
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn concurrent_adds_are_all_kept() {
        let queue = Arc::new(WorkQueue::default());
        let handles: Vec<_> = (0..8)
            .map(|thread| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for n in 0..250 {
                        queue.add(PendingItem::new(format!("{thread}/{n}.pb"), OffsetDateTime::now_utc()));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.drain().len(), 2000);
    }
}
