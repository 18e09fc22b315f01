//! Pool of identical descriptor sets handed out as reservations.

use std::cell::Cell;
use std::rc::Rc;

use rtrace_protocol::handle::Handle;
use rtrace_protocol::layout::DescriptorPoolSize;
use tracing::debug;

use crate::cmd_builder;
use crate::error::{ReplayError, Result};
use crate::transform::Writer;

/// What the pool does when a reservation does not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Destroy every backing pool and recreate one large enough.
    FlushOnGrow,
    /// Add another backing pool; only [`free`](HomogeneousDescriptorSetPool::free) flushes.
    NoFlushUntilFree,
}

/// Notified before the pool it is registered with flushes.
pub trait FlushUser {
    /// Every reservation issued so far is about to become invalid.
    fn on_flush(&mut self, out: &mut dyn Writer) -> Result<()>;
}

/// Identifies a registered [`FlushUser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(u64);

/// A contiguous run of sets from a [`HomogeneousDescriptorSetPool`].
#[derive(Debug, Clone)]
pub struct Reservation {
    sets: Vec<Handle>,
    generation: u64,
    pool_generation: Rc<Cell<u64>>,
}

impl Reservation {
    /// False once the pool has flushed since this reservation was made.
    pub fn is_valid(&self) -> bool {
        self.generation == self.pool_generation.get()
    }

    pub fn sets(&self) -> Result<&[Handle]> {
        if !self.is_valid() {
            return Err(ReplayError::InvalidReservation);
        }
        Ok(&self.sets)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// Descriptor sets sharing one layout, pre-allocated from backing pools.
pub struct HomogeneousDescriptorSetPool {
    device: Handle,
    /// Null once the pool has been freed.
    layout: Handle,
    per_set: Vec<DescriptorPoolSize>,
    policy: FlushPolicy,
    pools: Vec<Handle>,
    sets: Vec<Handle>,
    next: usize,
    generation: Rc<Cell<u64>>,
    users: Vec<(UserId, Box<dyn FlushUser>)>,
    next_user: u64,
}

impl HomogeneousDescriptorSetPool {
    /// An empty pool; backing pools are created on the first reservation.
    pub fn new(device: Handle, layout: Handle, per_set: Vec<DescriptorPoolSize>, policy: FlushPolicy) -> Self {
        Self {
            device,
            layout,
            per_set,
            policy,
            pools: Vec::new(),
            sets: Vec::new(),
            next: 0,
            generation: Rc::new(Cell::new(0)),
            users: Vec::new(),
            next_user: 0,
        }
    }

    pub fn device(&self) -> Handle {
        self.device
    }

    pub fn layout(&self) -> Handle {
        self.layout
    }

    pub fn capacity(&self) -> usize {
        self.sets.len()
    }

    /// Sets not yet handed out.
    pub fn available(&self) -> usize {
        self.sets.len() - self.next
    }

    pub fn backing_pools(&self) -> &[Handle] {
        &self.pools
    }

    pub fn is_freed(&self) -> bool {
        self.layout.is_null()
    }

    pub fn add_user(&mut self, user: Box<dyn FlushUser>) -> UserId {
        let id = UserId(self.next_user);
        self.next_user += 1;
        self.users.push((id, user));
        id
    }

    pub fn drop_user(&mut self, id: UserId) -> Option<Box<dyn FlushUser>> {
        let index = self.users.iter().position(|(u, _)| *u == id)?;
        Some(self.users.remove(index).1)
    }

    /// Reserve `count` sets, growing or flushing the pool if they do not fit.
    pub fn reserve(&mut self, out: &mut dyn Writer, count: usize) -> Result<Reservation> {
        if self.is_freed() {
            return Err(ReplayError::PoolFreed);
        }
        if self.next + count > self.sets.len() {
            let capacity = (self.sets.len() * 2).max(count);
            match self.policy {
                FlushPolicy::FlushOnGrow => {
                    if !self.pools.is_empty() {
                        self.flush(out)?;
                    }
                    self.grow(out, capacity)?;
                }
                FlushPolicy::NoFlushUntilFree => {
                    // Leftover sets at the end of the current pool are skipped.
                    self.next = self.sets.len();
                    self.grow(out, capacity)?;
                }
            }
        }
        let sets = self.sets[self.next..self.next + count].to_vec();
        self.next += count;
        Ok(Reservation {
            sets,
            generation: self.generation.get(),
            pool_generation: Rc::clone(&self.generation),
        })
    }

    /// Notify every user, destroy every backing pool and invalidate every
    /// outstanding reservation.
    pub fn flush(&mut self, out: &mut dyn Writer) -> Result<()> {
        for (_, user) in &mut self.users {
            user.on_flush(out)?;
        }
        for pool in self.pools.drain(..) {
            out.write_synth(cmd_builder::destroy_descriptor_pool(self.device, pool))?;
        }
        self.sets.clear();
        self.next = 0;
        self.generation.set(self.generation.get() + 1);
        debug!("descriptor set pool for layout {} flushed", self.layout);
        Ok(())
    }

    /// Disable the pool for good and release its backing pools.
    pub fn free(&mut self, out: &mut dyn Writer) -> Result<()> {
        if self.is_freed() {
            return Ok(());
        }
        self.layout = Handle::NULL;
        self.flush(out)
    }

    /// Add a backing pool of `count` sets, all allocated up front.
    fn grow(&mut self, out: &mut dyn Writer, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let s = cmd_builder::create_descriptor_pool(out.state(), self.device, count as u32, &self.per_set)?;
        let pool = out.write_synth(s)?.unwrap_or_default();
        self.pools.push(pool);
        let layouts = vec![self.layout; count];
        let (s, sets) = cmd_builder::allocate_descriptor_sets(out.state(), self.device, pool, &layouts)?;
        out.write_synth(s)?;
        self.sets.extend(sets);
        debug!("descriptor set pool for layout {} grew to {} sets", self.layout, self.sets.len());
        Ok(())
    }
}
