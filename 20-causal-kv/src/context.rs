//! Per-session causal context.
//!
//! A session accumulates one dependency per key it has touched, either by
//! writing it or by reading it. The exported set stamps the session's next
//! write so peers can hold that write back until everything it saw is visible.

use std::collections::HashMap;

use crate::model::{Dependency, Version};
use crate::store::LocalStore;

/// Identifier handed out when a connection is accepted.
pub type SessionId = u64;

#[derive(Debug, Default, Clone)]
pub struct CausalContext {
    entries: HashMap<String, Dependency>,
}

impl CausalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the session's own write.
    pub fn on_write(&mut self, key: &str, version: Version) {
        self.entries
            .insert(key.to_string(), Dependency::new(key, version));
    }

    /// Records the newest version of `key` the store has committed.
    ///
    /// Reading a key nobody has written adds no obligation, and leaves any
    /// existing entry alone.
    pub fn on_read(&mut self, key: &str, store: &LocalStore) {
        if let Some(latest) = store.latest(key) {
            self.entries.insert(key.to_string(), latest.clone());
        }
    }

    /// Snapshot of every dependency the session has observed, sorted by key.
    pub fn export(&self) -> Vec<Dependency> {
        let mut dependencies: Vec<Dependency> = self.entries.values().cloned().collect();
        dependencies.sort_by(|a, b| a.key.cmp(&b.key));
        dependencies
    }

    pub fn get(&self, key: &str) -> Option<&Dependency> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
