use log::{debug, log_enabled, trace, warn, Level};

use crate::block::{self, Address, DSIZE, MIN_BLOCK_SIZE, Tag, WSIZE};
use crate::coalesce::coalesce;
use crate::config::{Config, PROLOGUE_BYTES};
use crate::error::{AllocError, HeapError};
use crate::free_list::FreeList;
use crate::region::{HeapRegion, MemorySource, VecSource};
use crate::validate::{self, Report};
use crate::{align, align::ALIGNMENT};

/// Largest request whose block size still fits in a 32-bit boundary tag.
const MAX_REQUEST: usize = u32::MAX as usize - DSIZE - ALIGNMENT;

/// Block size needed for a `size`-byte payload: aligned payload plus header and footer.
fn block_size(size: usize) -> Option<usize> {
  (size <= MAX_REQUEST).then(|| align!(size) + DSIZE)
}

/// One block as seen by a heap walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub addr: Address,
  pub size: usize,
  pub allocated: bool,
}

/// Point-in-time summary of the heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub heap_size: usize,
  pub free_bytes: usize,
  pub free_blocks: usize,
  pub allocated_bytes: usize,
  pub allocated_blocks: usize,
  pub growths: usize,
}

/// First-fit allocator over an explicit, LIFO-ordered free list.
///
/// ```text
///   offset 0    4          8          12
///   ┌──────────┬──────────┬──────────┬──────────────────────┬──────────┐
///   │ padding  │ prologue │ prologue │  blocks ...          │ epilogue │
///   │          │ hdr 8/1  │ ftr 8/1  │                      │ hdr 0/1  │
///   └──────────┴──────────┴──────────┴──────────────────────┴──────────┘
///                         ▲
///                         └── heap_start
/// ```
#[derive(Debug)]
pub struct Allocator<S: MemorySource = VecSource> {
  region: HeapRegion<S>,
  free_list: FreeList,
  heap_start: Address,
  chunk_size: usize,
}

impl Allocator<VecSource> {
  /// Initializes an allocator over a `Vec`-backed heap with the default settings.
  pub fn new() -> Result<Self, AllocError> {
    Self::with_config(&Config::default())
  }

  pub fn with_config(config: &Config) -> Result<Self, AllocError> {
    Self::init(VecSource::new(config.max_heap), config)
  }
}

#[cfg(unix)]
impl Allocator<crate::region::MmapSource> {
  /// Initializes an allocator whose heap lives in an `mmap` reservation of `config.max_heap` bytes.
  pub fn with_mmap(config: &Config) -> Result<Self, AllocError> {
    config.validate()?;
    let source = crate::region::MmapSource::reserve(config.max_heap).map_err(AllocError::Initialization)?;
    Self::init(source, config)
  }
}

impl<S: MemorySource> Allocator<S> {
  /// Writes the sentinel prefix and materializes the first free block of
  /// `config.chunk_size` bytes.
  pub fn init(
    source: S,
    config: &Config,
  ) -> Result<Self, AllocError> {
    config.validate()?;

    let mut region = HeapRegion::new(source);
    let base = region.grow(PROLOGUE_BYTES).map_err(AllocError::Initialization)?;

    let heap = region.bytes_mut();
    let prologue = Tag::allocated(DSIZE).pack();
    block::write_word(heap, base, 0);
    block::write_word(heap, base + WSIZE, prologue);
    block::write_word(heap, base + 2 * WSIZE, prologue);
    block::write_word(heap, base + 3 * WSIZE, Tag::allocated(0).pack());

    let Some(heap_start) = Address::new(base + 2 * WSIZE) else {
      return Err(AllocError::Initialization(HeapError::TooLarge(base)));
    };

    let mut allocator = Self {
      region,
      free_list: FreeList::new(),
      heap_start,
      chunk_size: config.chunk_size,
    };

    let first = allocator
      .extend_heap(config.chunk_size)
      .map_err(AllocError::Initialization)?;

    debug!(
      "allocator ready: first free block {first}, {} bytes",
      block::size(allocator.heap(), first)
    );

    Ok(allocator)
  }

  /// Returns the payload address of a block with at least `size` usable
  /// bytes, or `None` for `size == 0` and when the heap cannot grow.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<Address> {
    if size == 0 {
      return None;
    }

    let Some(asize) = block_size(size) else {
      warn!("allocate({size}): request too large for 32-bit boundary tags");
      return None;
    };

    let b = match self.free_list.find_fit(self.region.bytes(), asize) {
      Some(b) => b,
      None => match self.extend_heap(asize.max(self.chunk_size)) {
        Ok(b) => b,
        Err(err) => {
          warn!("allocate({size}): {err}");
          return None;
        }
      },
    };

    self.free_list.remove(self.region.bytes_mut(), b);
    self.place(b, asize);

    debug!(
      "allocate({size}): {b}, block {} bytes, heap {} bytes",
      block::size(self.heap(), b),
      self.region.current_size()
    );

    Some(b)
  }

  /// Returns the block at `addr` to the free list and merges it with free neighbors.
  ///
  /// Addresses that do not name an allocated block are rejected without
  /// touching the heap.
  pub fn free(
    &mut self,
    addr: Address,
  ) -> Result<(), AllocError> {
    let tag = self.allocated_block(addr)?;

    let heap = self.region.bytes_mut();
    block::set_tags(heap, addr, Tag::free(tag.size));
    self.free_list.insert_head(heap, addr);
    let merged = coalesce(heap, &mut self.free_list, addr);

    debug!("free({addr}): {} bytes, now part of {merged}", tag.size);

    Ok(())
  }

  /// Resizes the block at `addr`, moving it only when it cannot grow in place.
  ///
  /// - `addr == None` allocates.
  /// - `size == 0` frees and returns `None`.
  /// - If the block is already large enough it is returned unchanged.
  /// - If the next block is free and both together are large enough, the
  ///   block absorbs its neighbor without copying.
  /// - Otherwise a new block is allocated, `min(usable, size)` bytes are
  ///   copied and the old block is freed. If that allocation fails the old
  ///   block stays as it was and `None` is returned.
  pub fn reallocate(
    &mut self,
    addr: Option<Address>,
    size: usize,
  ) -> Result<Option<Address>, AllocError> {
    let Some(addr) = addr else {
      return Ok(self.allocate(size));
    };

    if size == 0 {
      self.free(addr)?;
      return Ok(None);
    }

    let tag = self.allocated_block(addr)?;
    let Some(asize) = block_size(size) else {
      warn!("reallocate({addr}, {size}): request too large for 32-bit boundary tags");
      return Ok(None);
    };

    if asize <= tag.size {
      trace!("reallocate({addr}, {size}): fits in {} bytes", tag.size);
      return Ok(Some(addr));
    }

    let heap = self.region.bytes_mut();
    let next = block::next(heap, addr);
    let next_tag = block::header_tag(heap, next);

    if !next_tag.allocated && tag.size + next_tag.size >= asize {
      self.free_list.remove(heap, next);
      block::set_tags(heap, addr, Tag::allocated(tag.size + next_tag.size));
      self.place(addr, asize);

      debug!("reallocate({addr}, {size}): grew in place over {next}");
      return Ok(Some(addr));
    }

    let Some(moved) = self.allocate(size) else {
      return Ok(None);
    };

    let count = (tag.size - DSIZE).min(size);
    self
      .region
      .bytes_mut()
      .copy_within(addr.get()..addr.get() + count, moved.get());
    self.free(addr)?;

    debug!("reallocate({addr}, {size}): moved to {moved}, copied {count} bytes");

    Ok(Some(moved))
  }

  /// Bytes the caller may use at `addr`.
  pub fn usable_size(
    &self,
    addr: Address,
  ) -> Result<usize, AllocError> {
    Ok(self.allocated_block(addr)?.size - DSIZE)
  }

  pub fn payload(
    &self,
    addr: Address,
  ) -> Result<&[u8], AllocError> {
    let usable = self.usable_size(addr)?;
    Ok(&self.region.bytes()[addr.get()..addr.get() + usable])
  }

  pub fn payload_mut(
    &mut self,
    addr: Address,
  ) -> Result<&mut [u8], AllocError> {
    let usable = self.usable_size(addr)?;
    Ok(&mut self.region.bytes_mut()[addr.get()..addr.get() + usable])
  }

  pub fn heap(&self) -> &[u8] {
    self.region.bytes()
  }

  pub fn region(&self) -> &HeapRegion<S> {
    &self.region
  }

  pub fn free_list(&self) -> &FreeList {
    &self.free_list
  }

  /// Payload address of the prologue block.
  pub fn heap_start(&self) -> Address {
    self.heap_start
  }

  /// Every block between the prologue and the epilogue, in address order.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      heap: self.heap(),
      current: block::next(self.heap(), self.heap_start),
    }
  }

  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      heap_size: self.region.current_size(),
      growths: self.region.growths(),
      ..HeapStats::default()
    };

    for info in self.blocks() {
      if info.allocated {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += info.size;
      } else {
        stats.free_blocks += 1;
        stats.free_bytes += info.size;
      }
    }

    stats
  }

  /// Checks the free list and heap layout; see [`validate::validate`].
  pub fn validate(&self) -> Report {
    validate::validate(self.heap(), &self.free_list, self.heap_start)
  }

  /// Logs the block table and the free list at debug level.
  pub fn dump(&self) {
    if !log_enabled!(Level::Debug) {
      return;
    }

    debug!(
      "heap {:#x}..={:#x}, {} bytes, free list head {:?}",
      self.region.low_bound(),
      self.region.high_bound(),
      self.region.current_size(),
      self.free_list.head()
    );
    for (n, info) in self.blocks().enumerate() {
      let state = if info.allocated { "allocated" } else { "free" };
      debug!("  {n:>4}. {} {:>8} bytes {state}", info.addr, info.size);
    }
    for (n, b) in self.free_list.iter(self.heap()).enumerate() {
      debug!("  free {n:>4}. {b} {:?}", block::state(self.heap(), b));
    }
  }

  /// Grows the heap by `bytes` and turns the new space into a free block,
  /// merged with a free block that ended at the old epilogue.
  fn extend_heap(
    &mut self,
    bytes: usize,
  ) -> Result<Address, HeapError> {
    let start = self.region.grow(bytes)?;
    let size = self.region.current_size() - start;

    // The old epilogue header becomes the new block's header.
    let b = Address::new(start).ok_or(HeapError::TooLarge(start))?;
    let heap = self.region.bytes_mut();
    block::set_tags(heap, b, Tag::free(size));
    let end = block::next(heap, b);
    block::set_header(heap, end, Tag::allocated(0));

    self.free_list.insert_head(heap, b);
    Ok(coalesce(heap, &mut self.free_list, b))
  }

  /// Marks the free, already unlinked block `b` allocated, splitting off the
  /// tail as a new free block when at least `MIN_BLOCK_SIZE` bytes are left.
  fn place(
    &mut self,
    b: Address,
    asize: usize,
  ) {
    let heap = self.region.bytes_mut();
    let csize = block::size(heap, b);
    let remainder = csize - asize;

    if remainder >= MIN_BLOCK_SIZE {
      block::set_tags(heap, b, Tag::allocated(asize));
      let rest = block::next(heap, b);
      block::set_tags(heap, rest, Tag::free(remainder));
      self.free_list.insert_head(heap, rest);
      trace!("place: split {b} into {asize} + {remainder} at {rest}");
    } else {
      block::set_tags(heap, b, Tag::allocated(csize));
    }
  }

  /// Validates `addr` as the payload of an allocated block and returns its tag.
  fn allocated_block(
    &self,
    addr: Address,
  ) -> Result<Tag, AllocError> {
    let heap = self.heap();
    let invalid = || {
      warn!("rejected {addr}: not the payload of a block");
      AllocError::InvalidAddress(addr)
    };

    if addr.get() % ALIGNMENT != 0 || addr <= self.heap_start {
      return Err(invalid());
    }

    let header = block::get_word(heap, block::header(addr)).ok_or_else(invalid)?;
    let tag = Tag::unpack(header);

    // The block must end at or before the epilogue header.
    let end = addr.get() + tag.size;
    if tag.size < MIN_BLOCK_SIZE || end > heap.len() {
      return Err(invalid());
    }
    if block::get_word(heap, end - DSIZE) != Some(header) {
      return Err(invalid());
    }

    if !tag.allocated {
      warn!("rejected {addr}: block is already free");
      return Err(AllocError::DoubleFree(addr));
    }

    Ok(tag)
  }
}

/// Iterator over the blocks of a heap, see [`Allocator::blocks`].
pub struct Blocks<'h> {
  heap: &'h [u8],
  current: Address,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    let Tag { size, allocated } = block::header_tag(self.heap, self.current);
    if size == 0 {
      return None;
    }

    let info = BlockInfo {
      addr: self.current,
      size,
      allocated,
    };
    self.current = block::next(self.heap, self.current);
    Some(info)
  }
}
