//! Worker task that owns a datacenter's state.
//!
//! Every connection task talks to the [`CausalNode`] through a [`NodeHandle`],
//! which sends a request over an mpsc channel and awaits the reply on a
//! oneshot. The worker applies requests one at a time, so the store, pending
//! buffer and session table are only ever touched by a single task.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::context::SessionId;
use crate::message::ReplicatedWrite;
use crate::model::{DatacenterId, Version};
use crate::node::{CausalNode, NodeStatus, ReceiveOutcome, Retention};
use crate::replication::{DelayPolicy, NoDelay, Replicator};

const REQUEST_QUEUE_DEPTH: usize = 1024;

/// Everything needed to start one datacenter.
#[derive(Clone)]
pub struct NodeConfig {
    pub id: DatacenterId,
    /// Address of every datacenter, this one included.
    pub peers: BTreeMap<DatacenterId, String>,
    pub delay: Arc<dyn DelayPolicy>,
    pub retention: Retention,
}

impl NodeConfig {
    pub fn new(id: DatacenterId, peers: BTreeMap<DatacenterId, String>) -> Self {
        Self {
            id,
            peers,
            delay: Arc::new(NoDelay),
            retention: Retention::unbounded(),
        }
    }

    pub fn with_delay(mut self, delay: Arc<dyn DelayPolicy>) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("id", &self.id)
            .field("peers", &self.peers)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

enum NodeRequest {
    Read {
        session: SessionId,
        key: String,
        respond_to: oneshot::Sender<Option<String>>,
    },
    Write {
        session: SessionId,
        key: String,
        value: String,
        respond_to: oneshot::Sender<Version>,
    },
    Replicated {
        write: ReplicatedWrite,
        respond_to: oneshot::Sender<ReceiveOutcome>,
    },
    CloseSession {
        session: SessionId,
    },
    Status {
        respond_to: oneshot::Sender<NodeStatus>,
    },
    Shutdown,
}

/// Cloneable handle to a running node worker.
#[derive(Clone)]
pub struct NodeHandle {
    id: DatacenterId,
    request_tx: mpsc::Sender<NodeRequest>,
    next_session: Arc<AtomicU64>,
}

impl NodeHandle {
    pub fn id(&self) -> DatacenterId {
        self.id
    }

    /// Issues a fresh session id. The session's context is created lazily on
    /// its first request.
    pub fn open_session(&self) -> SessionId {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn read(&self, session: SessionId, key: String) -> Result<Option<String>> {
        let (respond_to, response) = oneshot::channel();
        self.send(NodeRequest::Read {
            session,
            key,
            respond_to,
        })
        .await?;
        response.await.context("read response channel closed")
    }

    /// Applies the write locally and returns its version. Replication to the
    /// peers has been handed off, not completed, when this returns.
    pub async fn write(&self, session: SessionId, key: String, value: String) -> Result<Version> {
        let (respond_to, response) = oneshot::channel();
        self.send(NodeRequest::Write {
            session,
            key,
            value,
            respond_to,
        })
        .await?;
        response.await.context("write response channel closed")
    }

    pub async fn replicated(&self, write: ReplicatedWrite) -> Result<ReceiveOutcome> {
        let (respond_to, response) = oneshot::channel();
        self.send(NodeRequest::Replicated { write, respond_to })
            .await?;
        response.await.context("replicated write response channel closed")
    }

    pub async fn close_session(&self, session: SessionId) -> Result<()> {
        self.send(NodeRequest::CloseSession { session }).await
    }

    pub async fn status(&self) -> Result<NodeStatus> {
        let (respond_to, response) = oneshot::channel();
        self.send(NodeRequest::Status { respond_to }).await?;
        response.await.context("status response channel closed")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(NodeRequest::Shutdown).await
    }

    async fn send(&self, request: NodeRequest) -> Result<()> {
        self.request_tx
            .send(request)
            .await
            .map_err(|_| anyhow::anyhow!("node worker stopped"))
    }
}

/// Starts the worker and its peer links. Must be called from within a Tokio
/// runtime.
pub fn spawn_node(config: NodeConfig) -> NodeHandle {
    let NodeConfig {
        id,
        peers,
        delay,
        retention,
    } = config;

    let replicator = Replicator::spawn(id, &peers, delay);
    let node = CausalNode::with_retention(id, retention);
    let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);

    info!(id, peers = ?replicator.peers().collect::<Vec<_>>(), "starting datacenter worker");
    tokio::spawn(run_worker(node, replicator, request_rx));

    NodeHandle {
        id,
        request_tx,
        next_session: Arc::new(AtomicU64::new(1)),
    }
}

async fn run_worker(
    mut node: CausalNode,
    replicator: Replicator,
    mut requests: mpsc::Receiver<NodeRequest>,
) {
    while let Some(request) = requests.recv().await {
        match request {
            NodeRequest::Read {
                session,
                key,
                respond_to,
            } => {
                let _ = respond_to.send(node.read(session, &key));
            }
            NodeRequest::Write {
                session,
                key,
                value,
                respond_to,
            } => {
                let outcome = node.write(session, &key, &value);
                // The client is answered before replication is handed off.
                let _ = respond_to.send(outcome.version);
                replicator.replicate(&outcome.replicated);
            }
            NodeRequest::Replicated { write, respond_to } => {
                let _ = respond_to.send(node.receive(write));
            }
            NodeRequest::CloseSession { session } => {
                if node.close_session(session) {
                    debug!(session, "closed client session");
                }
            }
            NodeRequest::Status { respond_to } => {
                let _ = respond_to.send(node.status());
            }
            NodeRequest::Shutdown => break,
        }
    }

    info!(id = node.id(), "datacenter worker stopped");
}
