use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow, ensure};

use crate::model::DatacenterId;

const DEMO_HOST: &str = "127.0.0.1";
const DEMO_PORTS: [u16; 3] = [8080, 8081, 8082];

/// Static table of every datacenter's address, indexed by datacenter id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    datacenters: BTreeMap<DatacenterId, String>,
}

impl Topology {
    pub fn new(datacenters: BTreeMap<DatacenterId, String>) -> Result<Self> {
        ensure!(
            !datacenters.is_empty(),
            "topology requires at least one datacenter"
        );
        Ok(Self { datacenters })
    }

    /// Three datacenters on localhost ports 8080, 8081 and 8082.
    pub fn demo() -> Self {
        let datacenters = DEMO_PORTS
            .iter()
            .enumerate()
            .map(|(id, port)| (id as DatacenterId, format!("{DEMO_HOST}:{port}")))
            .collect();
        Self { datacenters }
    }

    /// Starts from the demo table unless `entries` is non-empty, in which
    /// case the entries alone form the topology.
    pub fn from_entries(entries: &[String]) -> Result<Self> {
        if entries.is_empty() {
            return Ok(Self::demo());
        }
        Self::new(parse_peers(entries)?)
    }

    pub fn addr(&self, id: DatacenterId) -> Result<&str> {
        self.datacenters
            .get(&id)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("datacenter {id} is not in the topology"))
    }

    pub fn ids(&self) -> impl Iterator<Item = DatacenterId> + '_ {
        self.datacenters.keys().copied()
    }

    pub fn datacenters(&self) -> &BTreeMap<DatacenterId, String> {
        &self.datacenters
    }
}

/// Parses `id=addr` entries into a map.
pub fn parse_peers(entries: &[String]) -> Result<BTreeMap<DatacenterId, String>> {
    let mut peers = BTreeMap::new();
    for entry in entries {
        let Some((id_str, addr)) = entry.split_once('=') else {
            return Err(anyhow!("invalid peer entry '{entry}', expected id=addr"));
        };
        let id: DatacenterId = id_str
            .trim()
            .parse()
            .with_context(|| format!("invalid datacenter id in '{entry}'"))?;
        ensure!(!addr.trim().is_empty(), "empty address in '{entry}'");
        peers.insert(id, addr.trim().to_string());
    }
    Ok(peers)
}
