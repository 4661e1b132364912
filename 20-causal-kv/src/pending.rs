//! Holding area for replicated writes whose dependencies are not yet visible.

use crate::message::ReplicatedWrite;

/// Parked replicated writes in arrival order.
///
/// Nothing here expires. A write whose dependencies never arrive stays parked
/// unless a capacity is configured, in which case the oldest entry is evicted
/// to make room.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    writes: Vec<ReplicatedWrite>,
    capacity: Option<usize>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_limit(capacity: Option<usize>) -> Self {
        Self {
            writes: Vec::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Parks a write. Returns the evicted write when the buffer was full.
    /// A zero-capacity buffer stores nothing and hands the write straight back.
    pub fn park(&mut self, write: ReplicatedWrite) -> Option<ReplicatedWrite> {
        let evicted = match self.capacity {
            Some(0) => return Some(write),
            Some(limit) if self.writes.len() >= limit => Some(self.writes.remove(0)),
            _ => None,
        };
        self.writes.push(write);
        evicted
    }

    /// One pass over the buffer in arrival order. Every write for which
    /// `try_commit` returns true is removed. Writes committed early in the
    /// pass are visible to the check of later ones.
    ///
    /// Returns how many writes left the buffer.
    pub fn sweep(&mut self, mut try_commit: impl FnMut(&ReplicatedWrite) -> bool) -> usize {
        let before = self.writes.len();
        self.writes.retain(|write| !try_commit(write));
        before - self.writes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReplicatedWrite> {
        self.writes.iter()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}
