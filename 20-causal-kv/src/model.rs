//! Value types that identify writes and the causal obligations between them.

use std::fmt;

use serde::{Deserialize, Serialize};

pub type DatacenterId = u32;

/// Identifies a single write event at the datacenter where it originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub timestamp: u64,
    pub datacenter_id: DatacenterId,
}

impl Version {
    pub fn new(timestamp: u64, datacenter_id: DatacenterId) -> Self {
        Self {
            timestamp,
            datacenter_id,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@dc{}", self.timestamp, self.datacenter_id)
    }
}

/// "The write of `key` carrying exactly `version` must already be visible."
///
/// The same shape doubles as a commit record once a write has been applied
/// locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub key: String,
    pub version: Version,
}

impl Dependency {
    pub fn new(key: impl Into<String>, version: Version) -> Self {
        Self {
            key: key.into(),
            version,
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.version)
    }
}

pub type CommitRecord = Dependency;
