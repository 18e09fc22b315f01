mod common;

use std::cell::Cell;
use std::collections::HashSet;
use std::rc::Rc;

use ash::vk;
use common::{Trace, DEVICE};
use rtrace_protocol::handle::Handle;
use rtrace_protocol::layout::DescriptorPoolSize;
use rtrace_replay::error::{ReplayError, Result};
use rtrace_replay::mutate::Mutator;
use rtrace_replay::pool::{FlushPolicy, FlushUser, HomogeneousDescriptorSetPool};
use rtrace_replay::transform::Writer;

const LAYOUT: Handle = Handle(0xA000);

fn pool(policy: FlushPolicy) -> HomogeneousDescriptorSetPool {
    let per_set = vec![DescriptorPoolSize {
        descriptor_type: vk::DescriptorType::STORAGE_IMAGE.as_raw(),
        descriptor_count: 1,
    }];
    HomogeneousDescriptorSetPool::new(DEVICE, LAYOUT, per_set, policy)
}

struct CountingUser(Rc<Cell<u32>>);

impl FlushUser for CountingUser {
    fn on_flush(&mut self, _out: &mut dyn Writer) -> Result<()> {
        self.0.set(self.0.get() + 1);
        Ok(())
    }
}

#[test]
fn test_reservations_hand_out_distinct_sets() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    common::bring_up(&mut t, &mut m).unwrap();

    let mut pool = pool(FlushPolicy::FlushOnGrow);
    let a = pool.reserve(&mut m, 2).unwrap();
    let b = pool.reserve(&mut m, 1).unwrap();
    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 1);

    let sets: HashSet<Handle> = a.sets().unwrap().iter().chain(b.sets().unwrap()).copied().collect();
    assert_eq!(sets.len(), 3);
    for set in &sets {
        assert_eq!(m.state.descriptor_sets[set].layout, LAYOUT);
    }
}

#[test]
fn test_flush_on_grow_invalidates_earlier_reservations() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    common::bring_up(&mut t, &mut m).unwrap();

    let mut pool = pool(FlushPolicy::FlushOnGrow);
    let first = pool.reserve(&mut m, 2).unwrap();
    assert_eq!(pool.capacity(), 2);
    assert_eq!(pool.available(), 0);
    let before: HashSet<Handle> = first.sets().unwrap().iter().copied().collect();
    let old_pool = pool.backing_pools()[0];

    let second = pool.reserve(&mut m, 1).unwrap();
    assert!(!first.is_valid());
    assert!(matches!(first.sets(), Err(ReplayError::InvalidReservation)));
    assert!(second.is_valid());
    assert_eq!(pool.capacity(), 4);
    assert_eq!(pool.backing_pools().len(), 1);
    assert_eq!(m.state.descriptor_pools.len(), 1);

    let new_pool = pool.backing_pools()[0];
    assert_ne!(new_pool, old_pool);
    for set in second.sets().unwrap() {
        assert!(!before.contains(set));
        assert_eq!(m.state.descriptor_sets[set].pool, new_pool);
    }
}

#[test]
fn test_no_flush_until_free_keeps_reservations() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    common::bring_up(&mut t, &mut m).unwrap();

    let mut pool = pool(FlushPolicy::NoFlushUntilFree);
    let first = pool.reserve(&mut m, 2).unwrap();
    let second = pool.reserve(&mut m, 3).unwrap();
    assert!(first.is_valid());
    assert!(second.is_valid());
    assert_eq!(pool.backing_pools().len(), 2);
    assert_eq!(pool.capacity(), 6);
    assert_eq!(pool.available(), 1);

    pool.free(&mut m).unwrap();
    assert!(!first.is_valid());
    assert!(!second.is_valid());
    assert!(pool.backing_pools().is_empty());
    assert!(m.state.descriptor_pools.is_empty());
}

#[test]
fn test_freed_pool_refuses_reservations() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    common::bring_up(&mut t, &mut m).unwrap();

    let mut pool = pool(FlushPolicy::FlushOnGrow);
    pool.reserve(&mut m, 1).unwrap();
    pool.free(&mut m).unwrap();
    assert!(pool.is_freed());
    assert!(matches!(pool.reserve(&mut m, 1), Err(ReplayError::PoolFreed)));
    // Freeing again is a no-op.
    pool.free(&mut m).unwrap();
}

#[test]
fn test_users_notified_before_flush() {
    let mut t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    common::bring_up(&mut t, &mut m).unwrap();

    let flushes = Rc::new(Cell::new(0));
    let mut pool = pool(FlushPolicy::FlushOnGrow);
    let user = pool.add_user(Box::new(CountingUser(Rc::clone(&flushes))));

    // The first growth has nothing to flush.
    pool.reserve(&mut m, 1).unwrap();
    assert_eq!(flushes.get(), 0);
    pool.reserve(&mut m, 1).unwrap();
    assert_eq!(flushes.get(), 1);

    assert!(pool.drop_user(user).is_some());
    assert!(pool.drop_user(user).is_none());
    pool.flush(&mut m).unwrap();
    assert_eq!(flushes.get(), 1);
}

#[test]
fn test_zero_sized_reservation() {
    let t = Trace::new();
    let mut state = t.state();
    let mut m = Mutator::new(&mut state);
    let mut pool = pool(FlushPolicy::NoFlushUntilFree);
    let r = pool.reserve(&mut m, 0).unwrap();
    assert!(r.is_empty());
    assert!(pool.backing_pools().is_empty());
}
