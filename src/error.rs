use thiserror::Error;

use crate::block::Address;

/// Failures of the backing memory behind a [`HeapRegion`](crate::HeapRegion).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
  #[error("heap exhausted: requested {requested} bytes with {available} remaining")]
  Exhausted { requested: usize, available: usize },
  #[error("heap of {0} bytes cannot be addressed with 32-bit boundary tags")]
  TooLarge(usize),
  #[error("failed to reserve {bytes} bytes of backing memory (errno {errno:?})")]
  Reserve { bytes: usize, errno: Option<i32> },
}

/// Rejected allocator settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("chunk size {0} must be a multiple of 8 and at least 16 bytes")]
  ChunkSize(usize),
  #[error("max heap {max_heap} must hold the sentinels plus one chunk of {chunk_size} bytes and fit in 32 bits")]
  MaxHeap { max_heap: usize, chunk_size: usize },
  #[error("{var}={value:?} is not a byte count")]
  Parse { var: &'static str, value: String },
}

/// Errors reported by the [`Allocator`](crate::Allocator).
///
/// Running out of memory during `allocate`/`reallocate` is not an error: those
/// return `None` and leave the heap consistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
  #[error("allocator initialization failed")]
  Initialization(#[source] HeapError),
  #[error("invalid allocator configuration")]
  Config(#[from] ConfigError),
  #[error("{0} is not the payload of an allocated block")]
  InvalidAddress(Address),
  #[error("{0} was already freed")]
  DoubleFree(Address),
}
