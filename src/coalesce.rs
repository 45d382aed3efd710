//! Merging physically adjacent free blocks.
//!
//! ```text
//!   prev free, next free:
//!
//!   ┌────────┬────────┬────────┐        ┌──────────────────────────┐
//!   │ P free │ B free │ N free │   ──►  │          P free          │
//!   └────────┴────────┴────────┘        └──────────────────────────┘
//!    header ─────────────► footer        header ──────────► footer
//! ```

use log::trace;

use crate::block::{self, Address, Tag};
use crate::free_list::FreeList;

/// Merges the free block `b` with its free physical neighbors.
///
/// `b` must already be marked free and be on `list`. Every free block taking
/// part in the merge is unlinked first, then the single resulting block is
/// inserted at the head and returned.
pub fn coalesce(
  heap: &mut [u8],
  list: &mut FreeList,
  b: Address,
) -> Address {
  let prev_free = !block::prev_tag(heap, b).allocated;
  let next = block::next(heap, b);
  let next_free = !block::is_allocated(heap, next);
  let mut size = block::size(heap, b);

  if next_free {
    list.remove(heap, next);
  }
  if prev_free {
    let prev = block::prev(heap, b);
    list.remove(heap, prev);
  }
  list.remove(heap, b);

  let merged = match (prev_free, next_free) {
    (false, false) => b,
    (false, true) => {
      size += block::size(heap, next);
      block::set_tags(heap, b, Tag::free(size));
      b
    }
    (true, false) => {
      let prev = block::prev(heap, b);
      size += block::size(heap, prev);
      block::set_tags(heap, prev, Tag::free(size));
      prev
    }
    (true, true) => {
      let prev = block::prev(heap, b);
      size += block::size(heap, prev) + block::size(heap, next);
      block::set_tags(heap, prev, Tag::free(size));
      prev
    }
  };

  if prev_free || next_free {
    trace!("coalesce: {b} merged into {merged}, {size} bytes");
  }

  list.insert_head(heap, merged);
  merged
}
