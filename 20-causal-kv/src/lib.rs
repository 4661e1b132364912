//! Causally consistent key-value store replicated across datacenters.
//!
//! Each datacenter answers reads and writes from local state and ships every
//! write to its peers in the background. A replicated write carries the
//! causal context of the session that issued it, and a peer holds the write
//! back until everything in that context is visible locally.
//!
//! - [`model`] defines versions and dependencies.
//! - [`store`] keeps data, the logical clock and the commit history.
//! - [`context`] tracks what each client session has observed.
//! - [`pending`] parks replicated writes that arrived too early.
//! - [`node`] ties these together: request handling and the receive pipeline.
//! - [`replication`] fans writes out to peers, with pluggable delay injection.
//! - [`runtime`] runs a node on a single worker task behind a [`runtime::NodeHandle`].
//! - [`server`] accepts client and peer connections.
//! - [`message`] is the JSON wire protocol; [`protocol`] parses client input.
//! - [`cli`], [`client`] and [`topology`] make up the command-line surface.
//!
//! Commit history and the pending buffer grow without bound unless a
//! [`node::Retention`] limit is configured, which matters for long-running
//! deployments.

pub mod cli;
pub mod client;
pub mod context;
pub mod message;
pub mod model;
pub mod node;
pub mod pending;
pub mod protocol;
pub mod replication;
pub mod runtime;
pub mod server;
pub mod store;
pub mod topology;
