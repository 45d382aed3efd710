//! Boundary-tag encoding.
//!
//! Every block in the heap is laid out as:
//!
//! ```text
//!   ┌──────────┬──────────────────────────────────────┬──────────┐
//!   │  header  │               payload                │  footer  │
//!   │  4 bytes │        size - 8 bytes, 8-aligned     │  4 bytes │
//!   └──────────┴──────────────────────────────────────┴──────────┘
//!              ▲
//!              └── Address handed out to callers
//!
//!   header/footer word:  size (multiple of 8) | allocated bit
//!
//!   Free block payload:
//!   ┌──────────┬──────────┬─────────────────────────────┐
//!   │   next   │   prev   │           unused            │
//!   └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! The functions here are the only code that reads or writes metadata words.
//! They index the heap directly and panic on out-of-range offsets, which can
//! only happen if the heap is already corrupt. The `get_*` variants return
//! `None` instead and are used when the input cannot be trusted.

use std::fmt;
use std::num::NonZeroU32;

use crate::align;

/// Word and header/footer size in bytes.
pub const WSIZE: usize = 4;
/// Double word size in bytes.
pub const DSIZE: usize = 8;
/// Smallest block that can exist on its own: header, footer and one aligned payload unit.
pub const MIN_BLOCK_SIZE: usize = DSIZE + align!(1);

const ALLOCATED_BIT: u32 = 0x1;
const SIZE_MASK: u32 = !0x7;

/// Payload offset of a block inside the heap.
///
/// Offset 0 is the alignment padding word and is never a payload, so the
/// value is non-zero and a zero link word decodes to `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(NonZeroU32);

impl Address {
  /// Returns `None` for offset zero or offsets wider than a heap word.
  pub fn new(offset: usize) -> Option<Self> {
    u32::try_from(offset).ok().and_then(NonZeroU32::new).map(Self)
  }

  pub fn get(self) -> usize {
    self.0.get() as usize
  }

  fn from_word(word: u32) -> Option<Self> {
    NonZeroU32::new(word).map(Self)
  }

  fn to_word(addr: Option<Self>) -> u32 {
    addr.map_or(0, |addr| addr.0.get())
  }
}

impl fmt::Display for Address {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "{:#x}", self.0.get())
  }
}

/// Decoded header or footer word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag {
  pub size: usize,
  pub allocated: bool,
}

impl Tag {
  pub const fn free(size: usize) -> Self {
    Self { size, allocated: false }
  }

  pub const fn allocated(size: usize) -> Self {
    Self { size, allocated: true }
  }

  /// Packs size and flag into one word. The size must already be 8-aligned.
  pub fn pack(self) -> u32 {
    debug_assert_eq!(self.size % DSIZE, 0, "block size {} is not 8-aligned", self.size);
    ((self.size as u32) & SIZE_MASK) | if self.allocated { ALLOCATED_BIT } else { 0 }
  }

  pub fn unpack(word: u32) -> Self {
    Self {
      size: (word & SIZE_MASK) as usize,
      allocated: word & ALLOCATED_BIT != 0,
    }
  }
}

/// What a block's bytes mean, depending on its allocation flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
  Free {
    next: Option<Address>,
    prev: Option<Address>,
  },
  Allocated,
}

/// Free-list links stored in the first two payload words of a free block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Links {
  pub next: Option<Address>,
  pub prev: Option<Address>,
}

pub fn read_word(
  heap: &[u8],
  at: usize,
) -> u32 {
  let mut word = [0u8; WSIZE];
  word.copy_from_slice(&heap[at..at + WSIZE]);
  u32::from_le_bytes(word)
}

pub fn get_word(
  heap: &[u8],
  at: usize,
) -> Option<u32> {
  let bytes = heap.get(at..at.checked_add(WSIZE)?)?;
  let mut word = [0u8; WSIZE];
  word.copy_from_slice(bytes);
  Some(u32::from_le_bytes(word))
}

pub fn write_word(
  heap: &mut [u8],
  at: usize,
  value: u32,
) {
  heap[at..at + WSIZE].copy_from_slice(&value.to_le_bytes());
}

pub fn header(b: Address) -> usize {
  b.get() - WSIZE
}

pub fn footer(
  heap: &[u8],
  b: Address,
) -> usize {
  b.get() + size(heap, b) - DSIZE
}

pub fn header_tag(
  heap: &[u8],
  b: Address,
) -> Tag {
  Tag::unpack(read_word(heap, header(b)))
}

pub fn get_header_tag(
  heap: &[u8],
  b: Address,
) -> Option<Tag> {
  get_word(heap, b.get().checked_sub(WSIZE)?).map(Tag::unpack)
}

pub fn size(
  heap: &[u8],
  b: Address,
) -> usize {
  header_tag(heap, b).size
}

pub fn is_allocated(
  heap: &[u8],
  b: Address,
) -> bool {
  header_tag(heap, b).allocated
}

/// Payload address of the block physically after `b`.
pub fn next(
  heap: &[u8],
  b: Address,
) -> Address {
  offset(b.get() + size(heap, b))
}

/// Payload address of the block physically before `b`, found through its footer.
pub fn prev(
  heap: &[u8],
  b: Address,
) -> Address {
  let prev_size = Tag::unpack(read_word(heap, b.get() - DSIZE)).size;
  offset(b.get() - prev_size)
}

/// Tag of the block physically before `b`, read from its footer.
pub fn prev_tag(
  heap: &[u8],
  b: Address,
) -> Tag {
  Tag::unpack(read_word(heap, b.get() - DSIZE))
}

/// Writes `tag` into the header of `b` and into the footer implied by `tag.size`.
pub fn set_tags(
  heap: &mut [u8],
  b: Address,
  tag: Tag,
) {
  let word = tag.pack();
  write_word(heap, header(b), word);
  write_word(heap, b.get() + tag.size - DSIZE, word);
}

/// Writes only the header of `b`. Used for the zero-sized epilogue.
pub fn set_header(
  heap: &mut [u8],
  b: Address,
  tag: Tag,
) {
  write_word(heap, header(b), tag.pack());
}

pub fn links(
  heap: &[u8],
  b: Address,
) -> Links {
  Links {
    next: Address::from_word(read_word(heap, b.get())),
    prev: Address::from_word(read_word(heap, b.get() + WSIZE)),
  }
}

pub fn get_links(
  heap: &[u8],
  b: Address,
) -> Option<Links> {
  Some(Links {
    next: Address::from_word(get_word(heap, b.get())?),
    prev: Address::from_word(get_word(heap, b.get().checked_add(WSIZE)?)?),
  })
}

pub fn set_next(
  heap: &mut [u8],
  b: Address,
  next: Option<Address>,
) {
  write_word(heap, b.get(), Address::to_word(next));
}

pub fn set_prev(
  heap: &mut [u8],
  b: Address,
  prev: Option<Address>,
) {
  write_word(heap, b.get() + WSIZE, Address::to_word(prev));
}

pub fn state(
  heap: &[u8],
  b: Address,
) -> BlockState {
  if is_allocated(heap, b) {
    BlockState::Allocated
  } else {
    let Links { next, prev } = links(heap, b);
    BlockState::Free { next, prev }
  }
}

/// Converts an offset computed from valid tags back into an address.
///
/// Tags are 32-bit and every payload sits past the padding word, so the
/// conversion cannot fail on a consistent heap.
fn offset(at: usize) -> Address {
  Address::new(at).expect("block tags point outside the addressable heap")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn addr(offset: usize) -> Address {
    Address::new(offset).unwrap()
  }

  #[test]
  fn test_pack_unpack() {
    let tag = Tag::allocated(48);

    assert_eq!(tag.pack(), 49);
    assert_eq!(Tag::unpack(49), tag);
    assert_eq!(Tag::unpack(Tag::free(4096).pack()), Tag::free(4096));
  }

  #[test]
  fn test_flag_never_leaks_into_size() {
    for size in (0..256).step_by(DSIZE) {
      let word = Tag::allocated(size).pack();
      assert_eq!(Tag::unpack(word).size, size);
      assert!(Tag::unpack(word).allocated);
    }
  }

  #[test]
  fn test_address_rejects_null() {
    assert!(Address::new(0).is_none());
    assert!(Address::new(u32::MAX as usize + 1).is_none());
    assert_eq!(addr(24).get(), 24);
    assert_eq!(addr(24).to_string(), "0x18");
  }

  #[test]
  fn test_neighbors_through_tags() {
    let mut heap = vec![0u8; 128];

    // Two blocks back to back: 24 bytes at 16, 32 bytes at 40.
    set_tags(&mut heap, addr(16), Tag::allocated(24));
    set_tags(&mut heap, addr(40), Tag::free(32));

    assert_eq!(header(addr(16)), 12);
    assert_eq!(footer(&heap, addr(16)), 32);
    assert_eq!(next(&heap, addr(16)), addr(40));
    assert_eq!(prev(&heap, addr(40)), addr(16));
    assert_eq!(prev_tag(&heap, addr(40)), Tag::allocated(24));
    assert_eq!(read_word(&heap, footer(&heap, addr(40))), Tag::free(32).pack());
  }

  #[test]
  fn test_links_round_trip_through_state() {
    let mut heap = vec![0u8; 64];
    set_tags(&mut heap, addr(16), Tag::free(32));

    assert_eq!(state(&heap, addr(16)), BlockState::Free { next: None, prev: None });

    set_next(&mut heap, addr(16), Some(addr(48)));
    set_prev(&mut heap, addr(16), None);

    assert_eq!(
      state(&heap, addr(16)),
      BlockState::Free {
        next: Some(addr(48)),
        prev: None
      }
    );

    set_tags(&mut heap, addr(16), Tag::allocated(32));
    assert_eq!(state(&heap, addr(16)), BlockState::Allocated);
  }

  #[test]
  fn test_checked_reads_stop_at_the_end() {
    let heap = vec![0u8; 16];

    assert_eq!(get_word(&heap, 12), Some(0));
    assert_eq!(get_word(&heap, 13), None);
    assert_eq!(get_header_tag(&heap, addr(20)), None);
    assert_eq!(get_links(&heap, addr(12)), None);
  }

  #[test]
  #[should_panic(expected = "outside the addressable heap")]
  fn test_next_of_corrupt_block_panics() {
    let mut heap = vec![0u8; 32];
    // A header claiming a size that runs past the 32-bit offset range.
    write_word(&mut heap, 12, Tag::allocated(0xFFFF_FFF8).pack());

    next(&heap, addr(16));
  }
}
