//! Offline heap checker.
//!
//! [`validate`] never mutates anything and never panics on a corrupt heap:
//! every read goes through the checked `block::get_*` helpers, and each
//! problem found becomes a [`Violation`] in the returned [`Report`].
//!
//! Free-list checks:
//! - the head has no `prev` link
//! - no allocated block is on the list
//! - every link points inside the heap
//! - at most one node has a null `prev`; the walk ends at the first null
//!   `next`, so the tail is unique by construction
//! - the walk never revisits a node, and `next.prev` points back
//!
//! Heap-walk checks:
//! - prologue and epilogue are intact
//! - every block is aligned, at least the minimum size, and its header matches its footer
//! - no two free blocks are adjacent
//! - the free blocks in the heap are exactly the nodes on the list

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

use crate::block::{self, Address, DSIZE, MIN_BLOCK_SIZE, Tag, WSIZE};
use crate::free_list::FreeList;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
  #[error("free-list head {head} has prev link {prev}")]
  HeadHasPrev { head: Address, prev: Address },
  #[error("allocated block {0} is on the free list")]
  AllocatedOnList(Address),
  #[error("free-list node {block} has next link {target} outside the heap")]
  NextOutOfBounds { block: Address, target: Address },
  #[error("free-list node {block} has prev link {target} outside the heap")]
  PrevOutOfBounds { block: Address, target: Address },
  #[error("{0} free-list nodes have a null prev link")]
  MultipleHeads(usize),
  #[error("free list loops back to {0}")]
  Cycle(Address),
  #[error("free-list node {next} follows {block} but its prev link is {prev:?}")]
  BrokenBackLink {
    block: Address,
    next: Address,
    prev: Option<Address>,
  },
  #[error("free-list node {0} is not a block in the heap")]
  NotABlock(Address),
  #[error("prologue is corrupt")]
  BadPrologue,
  #[error("epilogue expected at {expected:#x}, heap walk stopped at {found:#x}")]
  BadEpilogue { expected: usize, found: usize },
  #[error("block {block} has size {size}")]
  BadSize { block: Address, size: usize },
  #[error("block {0} is not 8-byte aligned")]
  Misaligned(Address),
  #[error("block {block} header {header:#x} does not match footer {footer:#x}")]
  TagMismatch { block: Address, header: u32, footer: u32 },
  #[error("free blocks {first} and {second} are adjacent")]
  Uncoalesced { first: Address, second: Address },
  #[error("free block {0} is missing from the free list")]
  Unlisted(Address),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
  violations: Vec<Violation>,
  free_nodes: usize,
  heap_blocks: usize,
}

impl Report {
  pub fn is_ok(&self) -> bool {
    self.violations.is_empty()
  }

  pub fn violations(&self) -> &[Violation] {
    &self.violations
  }

  /// Nodes visited on the free list.
  pub fn free_nodes(&self) -> usize {
    self.free_nodes
  }

  /// Blocks visited between the sentinels.
  pub fn heap_blocks(&self) -> usize {
    self.heap_blocks
  }
}

impl fmt::Display for Report {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    if self.is_ok() {
      return write!(
        f,
        "heap ok: {} blocks, {} on the free list",
        self.heap_blocks, self.free_nodes
      );
    }

    write!(f, "{} heap violation(s):", self.violations.len())?;
    for violation in &self.violations {
      write!(f, "\n  - {violation}")?;
    }
    Ok(())
  }
}

/// Checks `list` and the block layout starting at the prologue payload `heap_start`.
pub fn validate(
  heap: &[u8],
  list: &FreeList,
  heap_start: Address,
) -> Report {
  let mut report = Report::default();

  let listed = check_free_list(heap, list, &mut report);
  check_heap(heap, heap_start, &listed, &mut report);

  report
}

fn check_free_list(
  heap: &[u8],
  list: &FreeList,
  report: &mut Report,
) -> HashSet<Address> {
  let high = heap.len().saturating_sub(1);
  let in_bounds = |b: Address| b.get() <= high;

  let mut seen = HashSet::new();
  let mut null_prev = 0;
  let mut current = list.head();

  if let Some(head) = current {
    if let Some(prev) = block::get_links(heap, head).and_then(|links| links.prev) {
      report.violations.push(Violation::HeadHasPrev { head, prev });
    }
  }

  while let Some(b) = current {
    if !seen.insert(b) {
      report.violations.push(Violation::Cycle(b));
      break;
    }

    let (Some(tag), Some(links)) = (block::get_header_tag(heap, b), block::get_links(heap, b)) else {
      report.violations.push(Violation::NotABlock(b));
      break;
    };
    report.free_nodes += 1;

    if tag.allocated {
      report.violations.push(Violation::AllocatedOnList(b));
    }

    match links.prev {
      None => null_prev += 1,
      Some(target) if !in_bounds(target) => {
        report.violations.push(Violation::PrevOutOfBounds { block: b, target });
      }
      Some(_) => {}
    }

    current = match links.next {
      None => None,
      Some(target) if !in_bounds(target) => {
        report.violations.push(Violation::NextOutOfBounds { block: b, target });
        None
      }
      Some(next) => {
        let back = block::get_links(heap, next).and_then(|links| links.prev);
        if back != Some(b) {
          report.violations.push(Violation::BrokenBackLink {
            block: b,
            next,
            prev: back,
          });
        }
        Some(next)
      }
    };
  }

  if null_prev > 1 {
    report.violations.push(Violation::MultipleHeads(null_prev));
  }

  seen
}

fn check_heap(
  heap: &[u8],
  heap_start: Address,
  listed: &HashSet<Address>,
  report: &mut Report,
) {
  let prologue = Some(Tag::allocated(DSIZE).pack());
  if block::get_word(heap, block::header(heap_start)) != prologue
    || block::get_word(heap, heap_start.get()) != prologue
  {
    report.violations.push(Violation::BadPrologue);
    return;
  }

  let epilogue = heap.len().saturating_sub(WSIZE);
  let mut blocks = HashSet::new();
  let mut prev_free: Option<Address> = None;
  let mut at = heap_start.get() + DSIZE;

  loop {
    let Some(b) = Address::new(at) else {
      report.violations.push(Violation::BadEpilogue {
        expected: epilogue,
        found: at,
      });
      break;
    };
    let Some(header) = block::get_word(heap, block::header(b)) else {
      report.violations.push(Violation::BadEpilogue {
        expected: epilogue,
        found: block::header(b),
      });
      break;
    };
    let tag = Tag::unpack(header);

    if tag.size == 0 {
      if !tag.allocated || block::header(b) != epilogue {
        report.violations.push(Violation::BadEpilogue {
          expected: epilogue,
          found: block::header(b),
        });
      }
      break;
    }

    report.heap_blocks += 1;
    blocks.insert(b);

    if b.get() % DSIZE != 0 {
      report.violations.push(Violation::Misaligned(b));
    }
    if tag.size < MIN_BLOCK_SIZE {
      report.violations.push(Violation::BadSize { block: b, size: tag.size });
    }

    let Some(footer) = block::get_word(heap, b.get() + tag.size - DSIZE) else {
      report.violations.push(Violation::BadSize { block: b, size: tag.size });
      break;
    };
    if footer != header {
      report.violations.push(Violation::TagMismatch { block: b, header, footer });
    }

    if tag.allocated {
      prev_free = None;
    } else {
      if let Some(first) = prev_free {
        report.violations.push(Violation::Uncoalesced { first, second: b });
      }
      if !listed.contains(&b) {
        report.violations.push(Violation::Unlisted(b));
      }
      prev_free = Some(b);
    }

    at = b.get() + tag.size;
  }

  let mut strays: Vec<_> = listed.difference(&blocks).copied().collect();
  strays.sort();
  report.violations.extend(strays.into_iter().map(Violation::NotABlock));
}

#[cfg(test)]
mod tests {
  use test_log::test;

  use super::*;
  use crate::Allocator;

  fn addr(offset: usize) -> Address {
    Address::new(offset).unwrap()
  }

  #[test]
  fn test_fresh_heap_is_clean() {
    let allocator = Allocator::new().unwrap();

    let report = allocator.validate();

    assert!(report.is_ok(), "{report}");
    assert_eq!(report.free_nodes(), 1);
    assert_eq!(report.heap_blocks(), 1);
  }

  #[test]
  fn test_detects_allocated_node_and_unlisted_free_block() {
    let mut allocator = Allocator::new().unwrap();
    let a = allocator.allocate(32).unwrap();
    let mut heap = allocator.heap().to_vec();
    let rest = allocator.free_list().head().unwrap();

    // List claims `a` while the real free block is left out.
    let mut list = FreeList::new();
    list.insert_head(&mut heap, a);

    let report = validate(&heap, &list, allocator.heap_start());

    assert!(report.violations().contains(&Violation::AllocatedOnList(a)));
    assert!(report.violations().contains(&Violation::Unlisted(rest)));
  }

  #[test]
  fn test_detects_out_of_bounds_and_head_prev() {
    let allocator = Allocator::new().unwrap();
    let mut heap = allocator.heap().to_vec();
    let head = allocator.free_list().head().unwrap();
    let far = addr(heap.len() + 64);

    block::set_next(&mut heap, head, Some(far));
    block::set_prev(&mut heap, head, Some(far));

    let report = validate(&heap, allocator.free_list(), allocator.heap_start());

    assert_eq!(
      report.violations(),
      &[
        Violation::HeadHasPrev { head, prev: far },
        Violation::PrevOutOfBounds { block: head, target: far },
        Violation::NextOutOfBounds { block: head, target: far },
      ]
    );
  }

  #[test]
  fn test_detects_cycle() {
    let mut allocator = Allocator::new().unwrap();
    let a = allocator.allocate(32).unwrap();
    let _guard = allocator.allocate(32).unwrap();
    allocator.free(a).unwrap();
    let mut heap = allocator.heap().to_vec();

    // a -> rest; close the loop back to the head.
    let head = allocator.free_list().head().unwrap();
    let tail = allocator.free_list().iter(&heap).last().unwrap();
    block::set_next(&mut heap, tail, Some(head));

    let report = validate(&heap, allocator.free_list(), allocator.heap_start());

    assert!(report.violations().contains(&Violation::Cycle(head)));
  }

  #[test]
  fn test_detects_second_head() {
    let mut allocator = Allocator::new().unwrap();
    let a = allocator.allocate(32).unwrap();
    let _guard = allocator.allocate(32).unwrap();
    allocator.free(a).unwrap();
    let mut heap = allocator.heap().to_vec();

    // head -> rest, and rest forgets its prev link.
    let head = allocator.free_list().head().unwrap();
    let rest = block::links(&heap, head).next.unwrap();
    block::set_prev(&mut heap, rest, None);

    let report = validate(&heap, allocator.free_list(), allocator.heap_start());

    assert_eq!(
      report.violations(),
      &[
        Violation::BrokenBackLink {
          block: head,
          next: rest,
          prev: None
        },
        Violation::MultipleHeads(2),
      ]
    );
  }

  #[test]
  fn test_detects_tag_mismatch_and_uncoalesced_blocks() {
    let mut allocator = Allocator::new().unwrap();
    let a = allocator.allocate(32).unwrap();
    let b = allocator.allocate(32).unwrap();
    let _guard = allocator.allocate(32).unwrap();
    let mut heap = allocator.heap().to_vec();

    // Mark both free behind the list's back, then break a's footer.
    block::set_tags(&mut heap, a, Tag::free(40));
    block::set_tags(&mut heap, b, Tag::free(40));
    let footer = block::footer(&heap, a);
    block::write_word(&mut heap, footer, Tag::free(48).pack());

    let report = validate(&heap, allocator.free_list(), allocator.heap_start());

    assert!(report.violations().contains(&Violation::TagMismatch {
      block: a,
      header: Tag::free(40).pack(),
      footer: Tag::free(48).pack(),
    }));
    assert!(report.violations().contains(&Violation::Uncoalesced { first: a, second: b }));
    assert!(report.violations().contains(&Violation::Unlisted(b)));
  }

  #[test]
  fn test_detects_broken_sentinels() {
    let allocator = Allocator::new().unwrap();

    let mut heap = allocator.heap().to_vec();
    block::write_word(&mut heap, 4, 0);
    let report = validate(&heap, allocator.free_list(), allocator.heap_start());
    assert!(report.violations().contains(&Violation::BadPrologue));

    let mut heap = allocator.heap().to_vec();
    let end = heap.len() - WSIZE;
    block::write_word(&mut heap, end, Tag::free(0).pack());
    let report = validate(&heap, allocator.free_list(), allocator.heap_start());
    assert!(report.violations().contains(&Violation::BadEpilogue {
      expected: end,
      found: end
    }));
  }

  #[test]
  fn test_report_display_lists_violations() {
    let report = Report {
      violations: vec![Violation::BadPrologue, Violation::MultipleHeads(3)],
      ..Report::default()
    };

    assert_eq!(
      report.to_string(),
      "2 heap violation(s):\n  - prologue is corrupt\n  - 3 free-list nodes have a null prev link"
    );
  }
}
