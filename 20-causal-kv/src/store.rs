//! In-memory key-value storage with a logical clock and commit history.
//!
//! The commit history is the source of truth for causal bookkeeping: it
//! answers both "has this exact write been applied here?" and "what is the
//! newest write of key K this datacenter has seen?".

use std::collections::{BTreeMap, HashSet};

use crate::message::ReplicatedWrite;
use crate::model::{CommitRecord, DatacenterId, Dependency, Version};

/// Key-value state owned by one datacenter.
///
/// Not synchronized: the node worker is the single owner, so every mutation
/// already happens on one task.
#[derive(Debug)]
pub struct LocalStore {
    id: DatacenterId,
    data: BTreeMap<String, String>,
    clock: u64,
    history: Vec<CommitRecord>,
    committed: HashSet<CommitRecord>,
}

impl LocalStore {
    pub fn new(id: DatacenterId) -> Self {
        Self {
            id,
            data: BTreeMap::new(),
            clock: 0,
            history: Vec::new(),
            committed: HashSet::new(),
        }
    }

    pub fn id(&self) -> DatacenterId {
        self.id
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Applies a client write and mints the version that identifies it.
    pub fn apply_local_write(&mut self, key: &str, value: &str) -> Version {
        self.tick();
        let version = Version::new(self.clock, self.id);
        self.data.insert(key.to_string(), value.to_string());
        self.record(Dependency::new(key, version));
        version
    }

    /// Applies a write that originated at another datacenter.
    ///
    /// The clock jumps to the sender's timestamp when that is more than one
    /// tick ahead and otherwise advances by exactly one, so it never moves
    /// backwards. The commit record keeps the origin's version.
    ///
    /// The clock saturates at `u64::MAX` instead of wrapping.
    pub fn apply_replicated_write(&mut self, write: &ReplicatedWrite) {
        self.data.insert(write.key.clone(), write.value.clone());
        if write.timestamp > self.clock.saturating_add(1) {
            self.clock = write.timestamp;
        } else {
            self.tick();
        }
        self.record(write.commit_record());
    }

    pub fn read(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Exact `(key, version)` match against the commit history.
    pub fn is_committed(&self, dependency: &Dependency) -> bool {
        self.committed.contains(dependency)
    }

    /// Newest commit record for `key`, scanning from the most recent end.
    pub fn latest(&self, key: &str) -> Option<&CommitRecord> {
        self.history.iter().rev().find(|record| record.key == key)
    }

    pub fn history(&self) -> &[CommitRecord] {
        &self.history
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.data.clone()
    }

    /// Drops superseded commit records, oldest first, until at most `limit`
    /// remain or nothing more can go. The newest record of every key is kept,
    /// so reads and [`LocalStore::latest`] are unaffected; a dependency on a
    /// dropped version can no longer be satisfied here.
    ///
    /// Returns the number of records removed.
    pub fn compact(&mut self, limit: usize) -> usize {
        let excess = self.history.len().saturating_sub(limit);
        if excess == 0 {
            return 0;
        }

        let superseded = {
            let mut newest_seen = HashSet::new();
            let mut superseded = vec![false; self.history.len()];
            for (index, record) in self.history.iter().enumerate().rev() {
                if !newest_seen.insert(record.key.as_str()) {
                    superseded[index] = true;
                }
            }
            superseded
        };

        let mut removed = 0;
        let mut retained = Vec::with_capacity(self.history.len());
        for (record, superseded) in self.history.drain(..).zip(superseded) {
            if superseded && removed < excess {
                removed += 1;
            } else {
                retained.push(record);
            }
        }
        self.committed = retained.iter().cloned().collect();
        self.history = retained;
        removed
    }

    fn tick(&mut self) {
        self.clock = self.clock.saturating_add(1);
    }

    fn record(&mut self, record: CommitRecord) {
        self.committed.insert(record.clone());
        self.history.push(record);
    }
}
