//! Outbound replication to peer datacenters.
//!
//! Each peer gets one long-lived link task that owns the TCP connection and
//! writes messages in the order they reach its channel. Sends are fire and
//! forget: nobody waits for an acknowledgement, and a message that cannot be
//! written is logged and dropped. A [`DelayPolicy`] can hold individual
//! messages back before they reach a link, which is how tests force writes to
//! arrive out of causal order.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, ensure};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::message::{Message, ReplicatedWrite, write_message};
use crate::model::{DatacenterId, Dependency, Version};

/// Decides whether a replicated write of `key` bound for `peer` should be
/// held back, and for how long.
pub trait DelayPolicy: Send + Sync + 'static {
    fn delay(&self, key: &str, peer: DatacenterId) -> Option<Duration>;
}

impl<F> DelayPolicy for F
where
    F: Fn(&str, DatacenterId) -> Option<Duration> + Send + Sync + 'static,
{
    fn delay(&self, key: &str, peer: DatacenterId) -> Option<Duration> {
        self(key, peer)
    }
}

/// Delivers everything immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl DelayPolicy for NoDelay {
    fn delay(&self, _key: &str, _peer: DatacenterId) -> Option<Duration> {
        None
    }
}

/// Holds matching writes back for a uniformly random interval in
/// `[min, max]`. An empty key or peer filter matches everything.
#[derive(Debug, Clone)]
pub struct RandomDelay {
    keys: HashSet<String>,
    peers: HashSet<DatacenterId>,
    min: Duration,
    max: Duration,
}

impl RandomDelay {
    pub fn new(min: Duration, max: Duration) -> Result<Self> {
        ensure!(min <= max, "delay range is empty: {min:?} > {max:?}");
        Ok(Self {
            keys: HashSet::new(),
            peers: HashSet::new(),
            min,
            max,
        })
    }

    pub fn for_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn for_peers(mut self, peers: impl IntoIterator<Item = DatacenterId>) -> Self {
        self.peers.extend(peers);
        self
    }

    fn matches(&self, key: &str, peer: DatacenterId) -> bool {
        (self.keys.is_empty() || self.keys.contains(key))
            && (self.peers.is_empty() || self.peers.contains(&peer))
    }
}

impl DelayPolicy for RandomDelay {
    fn delay(&self, key: &str, peer: DatacenterId) -> Option<Duration> {
        if !self.matches(key, peer) {
            return None;
        }
        Some(rand::thread_rng().gen_range(self.min..=self.max))
    }
}

/// Builds the message that carries a local write to the other datacenters.
///
/// `dependencies` is the issuing session's context from before this write,
/// so the message never depends on itself.
pub fn stamp(key: &str, value: &str, version: Version, dependencies: Vec<Dependency>) -> ReplicatedWrite {
    ReplicatedWrite {
        key: key.to_string(),
        value: value.to_string(),
        timestamp: version.timestamp,
        datacenter_id: version.datacenter_id,
        dependencies,
    }
}

struct PeerLink {
    outbox: mpsc::UnboundedSender<ReplicatedWrite>,
}

/// Fans replicated writes out to every peer datacenter.
pub struct Replicator {
    id: DatacenterId,
    links: BTreeMap<DatacenterId, PeerLink>,
    delay: Arc<dyn DelayPolicy>,
}

impl fmt::Debug for Replicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replicator")
            .field("id", &self.id)
            .field("peers", &self.links.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Replicator {
    /// Starts one link task per peer. `peers` may include this datacenter;
    /// that entry is skipped. Must be called from within a Tokio runtime.
    pub fn spawn(
        id: DatacenterId,
        peers: &BTreeMap<DatacenterId, String>,
        delay: Arc<dyn DelayPolicy>,
    ) -> Self {
        let mut links = BTreeMap::new();
        for (&peer, addr) in peers {
            if peer == id {
                continue;
            }
            let (outbox, inbox) = mpsc::unbounded_channel();
            tokio::spawn(run_link(id, peer, addr.clone(), inbox));
            links.insert(peer, PeerLink { outbox });
        }
        Self { id, links, delay }
    }

    pub fn peers(&self) -> impl Iterator<Item = DatacenterId> + '_ {
        self.links.keys().copied()
    }

    /// Hands `write` to every peer link without waiting for delivery.
    pub fn replicate(&self, write: &ReplicatedWrite) {
        for (&peer, link) in &self.links {
            match self.delay.delay(&write.key, peer) {
                Some(delay) => {
                    info!(
                        key = %write.key,
                        peer,
                        delay_ms = delay.as_millis() as u64,
                        "delaying replicated write"
                    );
                    let outbox = link.outbox.clone();
                    let write = write.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if outbox.send(write).is_err() {
                            debug!(peer, "peer link closed before delayed write was sent");
                        }
                    });
                }
                None => {
                    if link.outbox.send(write.clone()).is_err() {
                        warn!(peer, "peer link closed; dropping replicated write");
                    }
                }
            }
        }
    }
}

async fn run_link(
    id: DatacenterId,
    peer: DatacenterId,
    addr: String,
    mut inbox: mpsc::UnboundedReceiver<ReplicatedWrite>,
) {
    let mut connection: Option<TcpStream> = None;

    while let Some(write) = inbox.recv().await {
        if connection.is_none() {
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    debug!(from = id, peer, %addr, "connected to peer");
                    connection = Some(stream);
                }
                Err(err) => {
                    warn!(peer, %addr, error = ?err, key = %write.key, "failed to dial peer; dropping replicated write");
                    continue;
                }
            }
        }

        let Some(stream) = connection.as_mut() else {
            continue;
        };
        let version = write.version();
        let key = write.key.clone();
        match write_message(stream, &Message::Replicated(write)).await {
            Ok(()) => debug!(peer, key = %key, %version, "sent replicated write"),
            Err(err) => {
                warn!(peer, %addr, error = ?err, key = %key, "failed to send replicated write; dropping it");
                connection = None;
            }
        }
    }

    debug!(peer, "peer link shut down");
}
