//! The growable heap region.
//!
//! A [`HeapRegion`] is a contiguous run of bytes that only ever grows at its
//! end, like a program break moved with `sbrk(2)`. The bytes come from a
//! [`MemorySource`]:
//!
//! ```text
//!   low bound                                   break        capacity
//!   ▼                                           ▼            ▼
//!   ┌───────────────────────────────────────────┬────────────┐
//!   │              region (in use)              │  reserved  │
//!   └───────────────────────────────────────────┴────────────┘
//!                                               ──► grow(n)
//! ```
//!
//! - [`VecSource`] keeps the bytes in a bounded `Vec<u8>`.
//! - [`MmapSource`] reserves the whole capacity with `mmap(2)` once, so the
//!   bytes never move while the break advances.

use log::{debug, warn};

use crate::align;
use crate::error::HeapError;

/// Raw memory behind a heap region.
pub trait MemorySource {
  /// Moves the break forward by `bytes` and returns the old break. Fresh bytes are zeroed.
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<usize, HeapError>;

  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];

  /// Most bytes this source can ever hand out.
  fn capacity(&self) -> usize;

  fn len(&self) -> usize {
    self.bytes().len()
  }
}

/// Heap bytes kept in a `Vec<u8>` that refuses to grow past `max_heap`.
#[derive(Debug, Clone)]
pub struct VecSource {
  buf: Vec<u8>,
  max_heap: usize,
}

impl VecSource {
  pub fn new(max_heap: usize) -> Self {
    Self { buf: Vec::new(), max_heap }
  }
}

impl MemorySource for VecSource {
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<usize, HeapError> {
    let old_brk = self.buf.len();
    let available = self.max_heap - old_brk;

    if bytes > available {
      return Err(HeapError::Exhausted {
        requested: bytes,
        available,
      });
    }

    self.buf.resize(old_brk + bytes, 0);
    Ok(old_brk)
  }

  fn bytes(&self) -> &[u8] {
    &self.buf
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    &mut self.buf
  }

  fn capacity(&self) -> usize {
    self.max_heap
  }
}

#[cfg(unix)]
pub use self::mmap::MmapSource;

#[cfg(unix)]
mod mmap {
  use std::{io, ptr, slice};

  use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_NORESERVE, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void};

  use super::MemorySource;
  use crate::error::HeapError;

  /// Heap bytes inside one anonymous private mapping reserved up front.
  ///
  /// Only the prefix below the break is ever exposed, so the region behaves
  /// exactly like [`VecSource`](super::VecSource) while keeping payload
  /// addresses stable in memory.
  #[derive(Debug)]
  pub struct MmapSource {
    base: ptr::NonNull<u8>,
    brk: usize,
    reserved: usize,
  }

  impl MmapSource {
    pub fn reserve(bytes: usize) -> Result<Self, HeapError> {
      let addr = unsafe {
        libc::mmap(
          ptr::null_mut(),
          bytes,
          PROT_READ | PROT_WRITE,
          MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE,
          -1,
          0,
        )
      };

      if addr == MAP_FAILED {
        return Err(HeapError::Reserve {
          bytes,
          errno: io::Error::last_os_error().raw_os_error(),
        });
      }

      let base = ptr::NonNull::new(addr.cast::<u8>()).ok_or(HeapError::Reserve { bytes, errno: None })?;

      Ok(Self {
        base,
        brk: 0,
        reserved: bytes,
      })
    }
  }

  impl MemorySource for MmapSource {
    fn extend(
      &mut self,
      bytes: usize,
    ) -> Result<usize, HeapError> {
      let old_brk = self.brk;
      let available = self.reserved - old_brk;

      if bytes > available {
        return Err(HeapError::Exhausted {
          requested: bytes,
          available,
        });
      }

      // Anonymous mappings start zeroed and the break never moves back.
      self.brk += bytes;
      Ok(old_brk)
    }

    fn bytes(&self) -> &[u8] {
      // SAFETY: `base..base + brk` lies inside the live mapping and is only
      // reachable through `self`.
      unsafe { slice::from_raw_parts(self.base.as_ptr(), self.brk) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
      // SAFETY: as in `bytes`, and `&mut self` guarantees exclusive access.
      unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.brk) }
    }

    fn capacity(&self) -> usize {
      self.reserved
    }
  }

  impl Drop for MmapSource {
    fn drop(&mut self) {
      unsafe {
        libc::munmap(self.base.as_ptr().cast::<c_void>(), self.reserved);
      }
    }
  }
}

/// A contiguous byte range that grows at its high end and never shrinks.
#[derive(Debug)]
pub struct HeapRegion<S> {
  source: S,
  growths: usize,
}

impl<S: MemorySource> HeapRegion<S> {
  pub fn new(source: S) -> Self {
    Self { source, growths: 0 }
  }

  /// Extends the region by `bytes` rounded up to a double word and returns
  /// the offset of the first new byte.
  ///
  /// On failure nothing changes.
  pub fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<usize, HeapError> {
    if u32::try_from(bytes).is_err() {
      return Err(HeapError::TooLarge(bytes));
    }
    let rounded = align!(bytes);

    let new_size = self.current_size().saturating_add(rounded);
    if u32::try_from(new_size).is_err() {
      warn!("heap growth to {new_size} bytes exceeds 32-bit tags");
      return Err(HeapError::TooLarge(new_size));
    }

    let old_brk = self.source.extend(rounded).inspect_err(|err| {
      warn!("heap growth by {rounded} bytes failed: {err}");
    })?;
    self.growths += 1;

    debug!(
      "heap grew by {rounded} bytes, break {:#x} -> {:#x}",
      old_brk,
      old_brk + rounded
    );

    Ok(old_brk)
  }

  pub fn low_bound(&self) -> usize {
    0
  }

  /// Offset of the last byte in the region.
  pub fn high_bound(&self) -> usize {
    self.current_size().saturating_sub(1)
  }

  pub fn current_size(&self) -> usize {
    self.source.len()
  }

  pub fn capacity(&self) -> usize {
    self.source.capacity()
  }

  /// Number of successful `grow` calls.
  pub fn growths(&self) -> usize {
    self.growths
  }

  pub fn bytes(&self) -> &[u8] {
    self.source.bytes()
  }

  pub fn bytes_mut(&mut self) -> &mut [u8] {
    self.source.bytes_mut()
  }
}
