//! Causal replication engine for a single datacenter.
//!
//! [`CausalNode`] bundles the local store, the pending buffer and every open
//! session's causal context. It performs no I/O: client requests and
//! replicated writes go in, responses and outbound replicated writes come out.
//! The runtime wraps it in a single worker task, so nothing here needs locking.
//!
//! # Receive pipeline
//!
//! A replicated write is committed only once every dependency it carries is
//! in the commit history. Writes that arrive early are parked. Each commit is
//! followed by a drain of the pending buffer that repeats full passes until
//! one pass commits nothing, so buffer order never decides what becomes
//! visible.
//!
//! Satisfaction is an exact `(key, version)` match. A newer write of the same
//! key does not satisfy a dependency on an older one.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use crate::context::{CausalContext, SessionId};
use crate::message::ReplicatedWrite;
use crate::model::{CommitRecord, DatacenterId, Dependency, Version};
use crate::pending::PendingBuffer;
use crate::replication;
use crate::store::LocalStore;

/// Bounds on the commit history and pending buffer. `None` keeps everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Retention {
    pub history_limit: Option<usize>,
    pub pending_limit: Option<usize>,
}

impl Retention {
    pub fn unbounded() -> Self {
        Self::default()
    }
}

/// Result of a client write.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub version: Version,
    /// Message to fan out to the peers.
    pub replicated: ReplicatedWrite,
}

/// What happened to one incoming replicated write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// Writes made visible, in commit order. Empty when the write was parked.
    pub committed: Vec<CommitRecord>,
    pub parked: bool,
    /// Oldest parked write pushed out by a full buffer.
    pub evicted: Option<ReplicatedWrite>,
}

/// Point-in-time view of a node, for status output and tests.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub id: DatacenterId,
    pub clock: u64,
    pub store: BTreeMap<String, String>,
    pub history_len: usize,
    pub pending: Vec<Dependency>,
    pub sessions: usize,
}

#[derive(Debug)]
pub struct CausalNode {
    store: LocalStore,
    pending: PendingBuffer,
    sessions: HashMap<SessionId, CausalContext>,
    retention: Retention,
}

impl CausalNode {
    pub fn new(id: DatacenterId) -> Self {
        Self::with_retention(id, Retention::unbounded())
    }

    pub fn with_retention(id: DatacenterId, retention: Retention) -> Self {
        Self {
            store: LocalStore::new(id),
            pending: PendingBuffer::with_capacity_limit(retention.pending_limit),
            sessions: HashMap::new(),
            retention,
        }
    }

    pub fn id(&self) -> DatacenterId {
        self.store.id()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn pending(&self) -> &PendingBuffer {
        &self.pending
    }

    pub fn context(&self, session: SessionId) -> Option<&CausalContext> {
        self.sessions.get(&session)
    }

    /// Drops the session's context. Returns false if it never issued a request.
    pub fn close_session(&mut self, session: SessionId) -> bool {
        self.sessions.remove(&session).is_some()
    }

    /// Serves a client read from local state, then folds the newest commit
    /// of `key` into the session's context.
    pub fn read(&mut self, session: SessionId, key: &str) -> Option<String> {
        let value = self.store.read(key).map(str::to_string);
        let context = self.sessions.entry(session).or_default();
        context.on_read(key, &self.store);
        debug!(session, key, found = value.is_some(), "client read");
        value
    }

    /// Applies a client write locally and prepares its replicated message.
    ///
    /// The message carries the session's context as it was before this
    /// write; the write's own version joins the context afterwards.
    pub fn write(&mut self, session: SessionId, key: &str, value: &str) -> WriteOutcome {
        let version = self.store.apply_local_write(key, value);
        let context = self.sessions.entry(session).or_default();
        let replicated = replication::stamp(key, value, version, context.export());
        context.on_write(key, version);
        info!(
            session,
            key,
            %version,
            dependencies = replicated.dependencies.len(),
            "applied client write"
        );
        self.compact();
        WriteOutcome {
            version,
            replicated,
        }
    }

    /// True iff every dependency is already in the commit history.
    pub fn dependency_check(&self, dependencies: &[Dependency]) -> bool {
        dependencies
            .iter()
            .all(|dependency| self.store.is_committed(dependency))
    }

    /// Runs the receive pipeline for one replicated write.
    pub fn receive(&mut self, write: ReplicatedWrite) -> ReceiveOutcome {
        if !self.dependency_check(&write.dependencies) {
            if self.pending.capacity() == Some(0) {
                warn!(
                    key = %write.key,
                    version = %write.version(),
                    "pending buffer has no capacity; dropping replicated write"
                );
                return ReceiveOutcome {
                    committed: Vec::new(),
                    parked: false,
                    evicted: Some(write),
                };
            }
            let missing: Vec<String> = write
                .dependencies
                .iter()
                .filter(|dep| !self.store.is_committed(dep))
                .map(ToString::to_string)
                .collect();
            info!(
                key = %write.key,
                version = %write.version(),
                ?missing,
                "parking replicated write until its dependencies commit"
            );
            let evicted = self.pending.park(write);
            if let Some(evicted) = &evicted {
                warn!(
                    key = %evicted.key,
                    version = %evicted.version(),
                    "pending buffer full; evicted oldest parked write"
                );
            }
            return ReceiveOutcome {
                committed: Vec::new(),
                parked: true,
                evicted,
            };
        }

        let mut committed = Vec::new();
        self.commit(&write, &mut committed);
        self.drain_pending(&mut committed);
        self.compact();
        ReceiveOutcome {
            committed,
            parked: false,
            evicted: None,
        }
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id(),
            clock: self.store.clock(),
            store: self.store.snapshot(),
            history_len: self.store.history().len(),
            pending: self.pending.iter().map(ReplicatedWrite::commit_record).collect(),
            sessions: self.sessions.len(),
        }
    }

    fn commit(&mut self, write: &ReplicatedWrite, committed: &mut Vec<CommitRecord>) {
        self.store.apply_replicated_write(write);
        info!(
            key = %write.key,
            version = %write.version(),
            clock = self.store.clock(),
            "committed replicated write"
        );
        committed.push(write.commit_record());
    }

    fn drain_pending(&mut self, committed: &mut Vec<CommitRecord>) {
        let Self { store, pending, .. } = self;
        loop {
            let progressed = pending.sweep(|write| {
                let ready = write
                    .dependencies
                    .iter()
                    .all(|dependency| store.is_committed(dependency));
                if ready {
                    store.apply_replicated_write(write);
                    info!(
                        key = %write.key,
                        version = %write.version(),
                        clock = store.clock(),
                        "committed parked write"
                    );
                    committed.push(write.commit_record());
                }
                ready
            });
            if progressed == 0 {
                break;
            }
        }
    }

    fn compact(&mut self) {
        if let Some(limit) = self.retention.history_limit {
            let removed = self.store.compact(limit);
            if removed > 0 {
                debug!(removed, remaining = self.store.history().len(), "compacted commit history");
            }
        }
    }
}
