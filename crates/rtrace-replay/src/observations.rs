use rtrace_protocol::observation::{Observation, Observations};

use crate::error::{ReplayError, Result};
use crate::memory::{ResourceStore, SparseMemory};

/// Applies one command's observations to the application pool.
///
/// Each half is applied at most once per applier; repeated calls are no-ops.
pub struct ObservationApplier<'c> {
    observations: &'c Observations,
    reads_applied: bool,
    writes_applied: bool,
}

impl<'c> ObservationApplier<'c> {
    pub fn new(observations: &'c Observations) -> Self {
        Self {
            observations,
            reads_applied: false,
            writes_applied: false,
        }
    }

    pub fn apply_reads(&mut self, memory: &mut SparseMemory, store: &ResourceStore) -> Result<()> {
        if self.reads_applied {
            return Ok(());
        }
        apply(&self.observations.reads, memory, store)?;
        self.reads_applied = true;
        Ok(())
    }

    pub fn apply_writes(&mut self, memory: &mut SparseMemory, store: &ResourceStore) -> Result<()> {
        if self.writes_applied {
            return Ok(());
        }
        apply(&self.observations.writes, memory, store)?;
        self.writes_applied = true;
        Ok(())
    }

    pub fn reads_applied(&self) -> bool {
        self.reads_applied
    }

    pub fn writes_applied(&self) -> bool {
        self.writes_applied
    }
}

/// Copy every observation's bytes into the pool, in declaration order.
pub fn apply(observations: &[Observation], memory: &mut SparseMemory, store: &ResourceStore) -> Result<()> {
    for o in observations {
        let data = store.get(&o.id).ok_or(ReplayError::UnresolvedObservation {
            range: o.range,
            id: o.id,
        })?;
        if data.len() as u64 != o.range.size {
            return Err(ReplayError::ObservationSizeMismatch {
                range: o.range,
                id: o.id,
                actual: data.len(),
            });
        }
        memory.write(o.range.base, &data);
    }
    Ok(())
}
