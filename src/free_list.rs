//! Explicit free list.
//!
//! The list is intrusive: its nodes are the free blocks themselves, and the
//! `next`/`prev` links live in the first two payload words. Insertion is
//! always at the head, so the most recently freed block is found first.
//!
//! ```text
//!   head
//!    │
//!    ▼
//!   ┌──────┐ next  ┌──────┐ next  ┌──────┐
//!   │  B3  │──────►│  B1  │──────►│  B7  │──► null
//!   │      │◄──────│      │◄──────│      │
//!   └──────┘  prev └──────┘  prev └──────┘
//!    prev = null
//! ```

use log::trace;

use crate::block::{self, Address, Links};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FreeList {
  head: Option<Address>,
}

impl FreeList {
  pub const fn new() -> Self {
    Self { head: None }
  }

  pub fn head(&self) -> Option<Address> {
    self.head
  }

  pub fn is_empty(&self) -> bool {
    self.head.is_none()
  }

  /// Pushes `b` in front of the current head.
  pub fn insert_head(
    &mut self,
    heap: &mut [u8],
    b: Address,
  ) {
    trace!("free list: insert {b} before {:?}", self.head);

    block::set_next(heap, b, self.head);
    if let Some(head) = self.head {
      block::set_prev(heap, head, Some(b));
    }
    block::set_prev(heap, b, None);
    self.head = Some(b);
  }

  /// Unlinks `b`, stitching its neighbors together. `b` must be on the list.
  pub fn remove(
    &mut self,
    heap: &mut [u8],
    b: Address,
  ) {
    let Links { next, prev } = block::links(heap, b);
    trace!("free list: remove {b} (prev {prev:?}, next {next:?})");

    match prev {
      Some(prev) => block::set_next(heap, prev, next),
      None => self.head = next,
    }
    if let Some(next) = next {
      block::set_prev(heap, next, prev);
    }
  }

  /// First-fit search: the first block from the head whose size is at least `size`.
  pub fn find_fit(
    &self,
    heap: &[u8],
    size: usize,
  ) -> Option<Address> {
    let mut current = self.head;

    while let Some(b) = current {
      if block::size(heap, b) >= size {
        return Some(b);
      }
      current = block::links(heap, b).next;
    }

    None
  }

  /// Walks the list from the head along `next` links.
  pub fn iter<'h>(
    &self,
    heap: &'h [u8],
  ) -> Iter<'h> {
    Iter { heap, current: self.head }
  }

  pub fn len(
    &self,
    heap: &[u8],
  ) -> usize {
    self.iter(heap).count()
  }
}

pub struct Iter<'h> {
  heap: &'h [u8],
  current: Option<Address>,
}

impl Iterator for Iter<'_> {
  type Item = Address;

  fn next(&mut self) -> Option<Self::Item> {
    let b = self.current?;
    self.current = block::links(self.heap, b).next;
    Some(b)
  }
}
