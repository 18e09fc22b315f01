use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A byte range in the application memory pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct Range {
    pub base: u64,
    pub size: u64,
}

impl Range {
    pub fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    pub fn end(&self) -> u64 {
        self.base + self.size
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }

    pub fn overlaps(&self, other: &Range) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}..{:#x}]", self.base, self.end())
    }
}

/// Content-addressed identifier of a captured blob (SHA-256 of its bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct ResourceId(pub [u8; 32]);

impl ResourceId {
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", self)
    }
}

/// A recorded memory range tagged with the resource holding its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct Observation {
    pub range: Range,
    pub id: ResourceId,
}

/// Memory reads and writes observed while a command executed.
/// Reads are applied before the command's effect, writes after.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct Observations {
    pub reads: Vec<Observation>,
    pub writes: Vec<Observation>,
}

impl Observations {
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    pub fn add_read(&mut self, observation: Observation) {
        self.reads.push(observation);
    }

    pub fn add_write(&mut self, observation: Observation) {
        self.writes.push(observation);
    }

    /// All observed ranges, reads first, in declaration order.
    pub fn ranges(&self) -> impl Iterator<Item = Range> + '_ {
        self.reads.iter().chain(self.writes.iter()).map(|o| o.range)
    }
}
