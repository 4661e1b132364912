use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::model::DatacenterId;
use crate::node::Retention;
use crate::replication::{DelayPolicy, NoDelay, RandomDelay};
use crate::runtime::NodeConfig;
use crate::topology::Topology;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one datacenter of the store.
    Server(ServerArgs),
    /// Connect to a datacenter and issue reads and writes from stdin.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TopologyArgs {
    /// Datacenter address overrides as id=addr. When given, these entries
    /// replace the built-in table of 127.0.0.1:8080-8082.
    #[arg(long = "peer", value_delimiter = ',')]
    pub peers: Vec<String>,
}

impl TopologyArgs {
    pub fn topology(&self) -> Result<Topology> {
        Topology::from_entries(&self.peers)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Index of this datacenter in the topology.
    pub index: DatacenterId,

    #[command(flatten)]
    pub topology: TopologyArgs,

    /// Only delay replicated writes of these keys (default: every key).
    #[arg(long = "delay-key", value_delimiter = ',')]
    pub delay_keys: Vec<String>,

    /// Only delay replicated writes bound for these datacenters (default: every peer).
    #[arg(long = "delay-peer", value_delimiter = ',')]
    pub delay_peers: Vec<DatacenterId>,

    /// Lower bound of the injected delay, in milliseconds.
    #[arg(long, requires = "delay_max_ms")]
    pub delay_min_ms: Option<u64>,

    /// Upper bound of the injected delay, in milliseconds. Enables delay injection.
    #[arg(long)]
    pub delay_max_ms: Option<u64>,

    /// Keep at most this many commit records, dropping superseded ones first.
    #[arg(long, value_parser = parse_limit)]
    pub history_limit: Option<usize>,

    /// Park at most this many replicated writes, evicting the oldest.
    #[arg(long, value_parser = parse_limit)]
    pub pending_limit: Option<usize>,
}

impl ServerArgs {
    pub fn delay_policy(&self) -> Result<Arc<dyn DelayPolicy>> {
        let Some(max) = self.delay_max_ms else {
            return Ok(Arc::new(NoDelay));
        };
        let min = self.delay_min_ms.unwrap_or(max);
        let policy = RandomDelay::new(Duration::from_millis(min), Duration::from_millis(max))?
            .for_keys(self.delay_keys.iter().cloned())
            .for_peers(self.delay_peers.iter().copied());
        Ok(Arc::new(policy))
    }

    pub fn retention(&self) -> Retention {
        Retention {
            history_limit: self.history_limit,
            pending_limit: self.pending_limit,
        }
    }

    pub fn node_config(&self, peers: BTreeMap<DatacenterId, String>) -> Result<NodeConfig> {
        Ok(NodeConfig::new(self.index, peers)
            .with_delay(self.delay_policy()?)
            .with_retention(self.retention()))
    }
}

fn parse_limit(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("limit must be at least 1".to_string()),
        Ok(limit) => Ok(limit),
        Err(err) => Err(err.to_string()),
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Index of the datacenter to connect to.
    pub index: DatacenterId,

    #[command(flatten)]
    pub topology: TopologyArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn server_takes_positional_index() {
        let cli = Cli::try_parse_from(["causal_kv", "server", "2"]).unwrap();
        match cli.command {
            Command::Server(args) => {
                assert_eq!(args.index, 2);
                assert!(args.topology.peers.is_empty());
                assert_eq!(args.retention(), Retention::unbounded());
                assert_eq!(args.delay_policy().unwrap().delay("y", 1), None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn delay_flags_build_random_policy() {
        let cli = Cli::try_parse_from([
            "causal_kv",
            "server",
            "0",
            "--delay-key",
            "y",
            "--delay-peer",
            "2",
            "--delay-min-ms",
            "10",
            "--delay-max-ms",
            "20",
        ])
        .unwrap();
        let Command::Server(args) = cli.command else {
            panic!("expected server command");
        };
        let policy = args.delay_policy().unwrap();
        assert_eq!(policy.delay("x", 2), None);
        let delay = policy.delay("y", 2).expect("y to dc2 is delayed");
        assert!(delay >= Duration::from_millis(10) && delay <= Duration::from_millis(20));
    }

    #[test]
    fn retention_limits_must_be_positive() {
        for flag in ["--history-limit", "--pending-limit"] {
            assert!(Cli::try_parse_from(["causal_kv", "server", "0", flag, "0"]).is_err());
        }

        let cli = Cli::try_parse_from(["causal_kv", "server", "0", "--pending-limit", "3"]).unwrap();
        let Command::Server(args) = cli.command else {
            panic!("expected server command");
        };
        assert_eq!(args.retention().pending_limit, Some(3));
    }

    #[test]
    fn client_accepts_peer_overrides() {
        let cli = Cli::try_parse_from([
            "causal_kv",
            "client",
            "1",
            "--peer",
            "0=127.0.0.1:9000,1=127.0.0.1:9001",
        ])
        .unwrap();
        let Command::Client(args) = cli.command else {
            panic!("expected client command");
        };
        let topology = args.topology.topology().unwrap();
        assert_eq!(topology.addr(args.index).unwrap(), "127.0.0.1:9001");
    }
}
