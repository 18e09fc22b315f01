use rtrace_replay::alloc::Allocator;
use rtrace_replay::error::ReplayError;

#[test]
fn test_free_coalesces_neighbours() {
    let mut a = Allocator::new(0x1000, 0x100);
    let x = a.alloc(0x40).unwrap();
    let y = a.alloc(0x40).unwrap();
    let z = a.alloc(0x80).unwrap();
    assert!(matches!(a.alloc(1), Err(ReplayError::AllocationExhausted { .. })));

    a.free(x).unwrap();
    a.free(z).unwrap();
    a.free(y).unwrap();
    assert_eq!(a.used(), 0);
    assert_eq!(a.live_count(), 0);
    // One block again: the whole range fits.
    assert_eq!(a.alloc(0x100).unwrap(), 0x1000);
}

#[test]
fn test_allocations_are_aligned_and_disjoint() {
    let mut a = Allocator::new(0x1003, 0x1000);
    let x = a.alloc(3).unwrap();
    let y = a.alloc(17).unwrap();
    assert_eq!(x % 16, 0);
    assert_eq!(y % 16, 0);
    assert!(y >= x + 16);
}

#[test]
fn test_double_free_rejected() {
    let mut a = Allocator::new(0, 64);
    let x = a.alloc(8).unwrap();
    a.free(x).unwrap();
    assert!(matches!(a.free(x), Err(ReplayError::UnknownAllocation(_))));
}

#[test]
fn test_unaligned_base_stays_inside_range() {
    // [0x1003, 0x1103) leaves 0xf3 bytes from the first aligned address.
    let mut a = Allocator::new(0x1003, 0x100);
    assert!(matches!(a.alloc(0x100), Err(ReplayError::AllocationExhausted { capacity: 0xf3, .. })));
    let x = a.alloc(0xf0).unwrap();
    assert_eq!(x, 0x1010);
    assert!(x + 0xf0 <= 0x1103);
    assert!(a.contains(0x1102));
    assert!(!a.contains(0x1103));
    assert!(matches!(a.alloc(1), Err(ReplayError::AllocationExhausted { .. })));
}
