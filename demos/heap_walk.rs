use std::env;
use std::io::Read;

use tagalloc::{Address, Allocator, Config, MemorySource};

/// Waits until the user presses ENTER when the demo runs with `--step`.
fn block_until_enter_pressed(step: bool) {
  if step {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

/// Prints the block table, the free list and the region bounds.
fn print_heap<S: MemorySource>(
  label: &str,
  allocator: &Allocator<S>,
) {
  let region = allocator.region();
  println!(
    "[{label}] heap {:#x}..={:#x} ({} bytes, {} growths)",
    region.low_bound(),
    region.high_bound(),
    region.current_size(),
    region.growths()
  );

  for info in allocator.blocks() {
    let state = if info.allocated { "allocated" } else { "free" };
    println!("    {} {:>8} bytes  {state}", info.addr, info.size);
  }

  let free: Vec<String> = allocator
    .free_list()
    .iter(allocator.heap())
    .map(|addr| addr.to_string())
    .collect();
  println!("    free list: [{}]", free.join(" -> "));
}

fn print_alloc<S: MemorySource>(
  allocator: &Allocator<S>,
  size: usize,
  addr: Address,
) {
  println!(
    "Allocated {} bytes, address = {}, usable = {}",
    size,
    addr,
    allocator.usable_size(addr).unwrap_or(0)
  );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  env_logger::init();

  let step = env::args().any(|arg| arg == "--step");
  let config = Config::from_env()?;
  let mut allocator = Allocator::with_config(&config)?;

  print_heap("start", &allocator);
  block_until_enter_pressed(step);

  // 1) A small block split off the first chunk.
  let first = allocator.allocate(4).ok_or("out of memory")?;
  println!("\n[1] Allocate 4 bytes");
  print_alloc(&allocator, 4, first);
  allocator.payload_mut(first)?[..4].copy_from_slice(&0xDEAD_BEEF_u32.to_le_bytes());
  print_heap("1", &allocator);
  block_until_enter_pressed(step);

  // 2) Two neighbors, so freeing the middle one has something to merge with later.
  let second = allocator.allocate(100).ok_or("out of memory")?;
  let third = allocator.allocate(100).ok_or("out of memory")?;
  println!("\n[2] Allocate two 100-byte blocks");
  print_alloc(&allocator, 100, second);
  print_alloc(&allocator, 100, third);
  print_heap("2", &allocator);
  block_until_enter_pressed(step);

  // 3) Free the middle block: it goes to the head of the free list.
  allocator.free(second)?;
  println!("\n[3] Free {second}");
  print_heap("3", &allocator);
  block_until_enter_pressed(step);

  // 4) A small request reuses the freed block (first fit, LIFO order).
  let fourth = allocator.allocate(24).ok_or("out of memory")?;
  println!(
    "\n[4] Allocate 24 bytes: {}",
    if fourth == second {
      "reused the freed block"
    } else {
      "allocated somewhere else"
    }
  );
  print_heap("4", &allocator);
  block_until_enter_pressed(step);

  // 5) Grow the first block; it moves because its neighbor is allocated.
  let moved = allocator.reallocate(Some(first), 256)?.ok_or("out of memory")?;
  println!("\n[5] Reallocate {first} to 256 bytes -> {moved}");
  println!("    first word still {:#x}", u32::from_le_bytes(allocator.payload(moved)?[..4].try_into()?));
  print_heap("5", &allocator);
  block_until_enter_pressed(step);

  // 6) A large block forces the heap to grow.
  let big = allocator.allocate(64 * 1024).ok_or("out of memory")?;
  println!("\n[6] Allocate 64 KiB");
  print_alloc(&allocator, 64 * 1024, big);
  print_heap("6", &allocator);
  block_until_enter_pressed(step);

  // 7) Free everything: the whole heap coalesces back into one block.
  for addr in [third, fourth, moved, big] {
    allocator.free(addr)?;
  }
  println!("\n[7] Free everything");
  print_heap("end", &allocator);
  println!("\n{}", allocator.validate());

  Ok(())
}
