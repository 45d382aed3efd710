use test_log::test;

use tagalloc::block::{self, DSIZE, MIN_BLOCK_SIZE};
use tagalloc::{Address, Allocator, Config};

fn assert_valid(allocator: &Allocator) {
  let report = allocator.validate();
  assert!(report.is_ok(), "{report}");
}

fn ranges_overlap(
  a: (usize, usize),
  b: (usize, usize),
) -> bool {
  a.0 < b.1 && b.0 < a.1
}

#[test]
fn allocations_are_disjoint_aligned_and_large_enough() {
  let mut allocator = Allocator::new().unwrap();
  let mut ranges = Vec::new();

  for n in 1..200 {
    let size = (n * 37) % 700 + 1;
    let addr = allocator.allocate(size).unwrap();
    let usable = allocator.usable_size(addr).unwrap();

    assert_eq!(addr.get() % 8, 0);
    assert!(usable >= size);

    let range = (addr.get(), addr.get() + usable);
    assert!(ranges.iter().all(|&other| !ranges_overlap(range, other)));
    ranges.push(range);
  }

  assert_valid(&allocator);
}

#[test]
fn freeing_everything_in_any_order_coalesces_fully() {
  let orders: [fn(usize) -> usize; 3] = [|i| i, |i| 99 - i, |i| (i * 37) % 100];

  for order in orders {
    let mut allocator = Allocator::new().unwrap();
    let addrs: Vec<Address> = (0..100).map(|i| allocator.allocate(i * 11 + 1).unwrap()).collect();

    for i in 0..100 {
      allocator.free(addrs[order(i)]).unwrap();
    }

    let stats = allocator.stats();
    // One contiguous region grown in several steps collapses to one block.
    assert_eq!(stats.free_blocks, 1);
    assert!(stats.free_blocks <= stats.growths);
    assert_eq!(stats.free_bytes, allocator.region().current_size() - 4 * block::WSIZE);
    assert_eq!(allocator.free_list().len(allocator.heap()), 1);
    assert_valid(&allocator);
  }
}

#[test]
fn list_stays_intact_under_mixed_workload() {
  let mut allocator = Allocator::new().unwrap();
  let mut live: Vec<Address> = Vec::new();
  let mut seed: u32 = 0x2545_f491;

  for step in 0..2000 {
    seed ^= seed << 13;
    seed ^= seed >> 17;
    seed ^= seed << 5;
    let size = (seed % 1500) as usize + 1;

    match seed % 4 {
      0 | 1 => live.push(allocator.allocate(size).unwrap()),
      2 if !live.is_empty() => {
        let addr = live.swap_remove(seed as usize % live.len());
        allocator.free(addr).unwrap();
      }
      _ if !live.is_empty() => {
        let index = seed as usize % live.len();
        live[index] = allocator.reallocate(Some(live[index]), size).unwrap().unwrap();
      }
      _ => {}
    }

    if step % 50 == 0 {
      assert_valid(&allocator);
    }
  }

  for addr in live {
    allocator.free(addr).unwrap();
  }
  assert_valid(&allocator);
  assert_eq!(allocator.stats().free_blocks, 1);
}

#[test]
fn reallocate_grows_in_place_over_freed_neighbor() {
  let mut allocator = Allocator::new().unwrap();
  let a = allocator.allocate(100).unwrap();
  let b = allocator.allocate(100).unwrap();
  assert_eq!(b, block::next(allocator.heap(), a));

  allocator.payload_mut(a).unwrap().copy_from_slice(&[0x3C; 104]);
  allocator.free(b).unwrap();

  let combined = block::size(allocator.heap(), a) + block::size(allocator.heap(), b);
  let grown = allocator.reallocate(Some(a), combined - DSIZE).unwrap();

  assert_eq!(grown, Some(a));
  assert!(allocator.payload(a).unwrap()[..104].iter().all(|&byte| byte == 0x3C));
  assert_valid(&allocator);
}

#[test]
fn split_remainder_serves_the_next_request() {
  let config = Config {
    chunk_size: 256,
    max_heap: 256 + 16,
  };
  let mut allocator = Allocator::with_config(&config).unwrap();

  let a = allocator.allocate(64).unwrap();
  let remainder = allocator.free_list().head().unwrap();
  let remainder_size = block::size(allocator.heap(), remainder);
  assert!(remainder_size >= MIN_BLOCK_SIZE);

  // The heap cannot grow, so this must come out of the remainder.
  let b = allocator.allocate(remainder_size - DSIZE).unwrap();

  assert_eq!(b, remainder);
  assert_eq!(b, block::next(allocator.heap(), a));
  assert!(allocator.free_list().is_empty());
  assert_valid(&allocator);
}

#[test]
fn zero_size_allocation_changes_nothing() {
  let mut allocator = Allocator::new().unwrap();
  let _a = allocator.allocate(40).unwrap();
  let heap = allocator.heap().to_vec();
  let bounds = (allocator.region().low_bound(), allocator.region().high_bound());
  let free_blocks = allocator.free_list().len(allocator.heap());

  assert_eq!(allocator.allocate(0), None);

  assert_eq!(allocator.heap(), &heap[..]);
  assert_eq!((allocator.region().low_bound(), allocator.region().high_bound()), bounds);
  assert_eq!(allocator.free_list().len(allocator.heap()), free_blocks);
}

#[test]
fn exhausted_heap_recovers_after_free() {
  let config = Config {
    chunk_size: 1024,
    max_heap: 8192,
  };
  let mut allocator = Allocator::with_config(&config).unwrap();
  let mut live = Vec::new();

  while let Some(addr) = allocator.allocate(500) {
    live.push(addr);
  }
  assert!(!live.is_empty());
  assert_valid(&allocator);

  allocator.free(live.pop().unwrap()).unwrap();
  assert!(allocator.allocate(500).is_some());
  assert_valid(&allocator);
}
