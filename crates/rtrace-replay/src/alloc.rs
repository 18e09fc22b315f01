//! Transient allocations in the application pool for synthesized command data.

use std::collections::BTreeMap;

use rtrace_protocol::observation::{Observation, Range, ResourceId};

use crate::error::{ReplayError, Result};

/// Every allocation starts on this boundary.
pub const ALLOC_ALIGNMENT: u64 = 16;

/// One live transient allocation.
///
/// Owned by whoever requested it until handed back to
/// [`State::free`](crate::state::State::free). Not `Clone`: two results never
/// share an address.
#[derive(Debug)]
pub struct AllocResult {
    address: u64,
    size: u64,
    id: ResourceId,
}

impl AllocResult {
    pub(crate) fn new(address: u64, size: u64, id: ResourceId) -> Self {
        Self { address, size, id }
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn range(&self) -> Range {
        Range::new(self.address, self.size)
    }

    /// The allocation's contents as a read observation.
    pub fn read_observation(&self) -> Observation {
        Observation { range: self.range(), id: self.id }
    }

    /// The allocation's contents as a write observation.
    pub fn write_observation(&self) -> Observation {
        Observation { range: self.range(), id: self.id }
    }
}

/// First-fit allocator over `[base, base + capacity)`.
pub struct Allocator {
    base: u64,
    capacity: u64,
    /// address -> size of each free block, coalesced
    free: BTreeMap<u64, u64>,
    /// address -> size of each live block
    live: BTreeMap<u64, u64>,
    used: u64,
}

impl Allocator {
    pub fn new(base: u64, capacity: u64) -> Self {
        let aligned = align_up(base, ALLOC_ALIGNMENT);
        let capacity = capacity.saturating_sub(aligned - base);
        let base = aligned;
        let mut free = BTreeMap::new();
        if capacity > 0 {
            free.insert(base, capacity);
        }
        Self {
            base,
            capacity,
            free,
            live: BTreeMap::new(),
            used: 0,
        }
    }

    /// Reserve `size` bytes (at least one), returning the block address.
    pub fn alloc(&mut self, size: u64) -> Result<u64> {
        let size = align_up(size.max(1), ALLOC_ALIGNMENT);
        let found = self
            .free
            .iter()
            .find(|(_, &len)| len >= size)
            .map(|(&addr, &len)| (addr, len));
        let (address, len) = found.ok_or(ReplayError::AllocationExhausted {
            size,
            used: self.used,
            capacity: self.capacity,
        })?;
        self.free.remove(&address);
        if len > size {
            self.free.insert(address + size, len - size);
        }
        self.live.insert(address, size);
        self.used += size;
        Ok(address)
    }

    /// Return the block at `address` to the free list.
    pub fn free(&mut self, address: u64) -> Result<()> {
        let size = self
            .live
            .remove(&address)
            .ok_or(ReplayError::UnknownAllocation(address))?;
        self.used -= size;

        let mut start = address;
        let mut len = size;
        if let Some((&prev, &prev_len)) = self.free.range(..address).next_back() {
            if prev + prev_len == address {
                self.free.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.free.remove(&(address + size)) {
            len += next_len;
        }
        self.free.insert(start, len);
        Ok(())
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.base + self.capacity
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}
