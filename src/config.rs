//! Allocator settings.
//!
//! Defaults follow the classic textbook allocator driver: the heap grows in
//! 4 KiB chunks and may not exceed 20 MiB. Both can be overridden from the
//! environment with `TAGALLOC_CHUNK_SIZE` and `TAGALLOC_MAX_HEAP`.

use std::env;

use crate::block::{MIN_BLOCK_SIZE, WSIZE};
use crate::error::ConfigError;

/// Bytes requested from the heap region when no free block fits.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;
/// Upper bound for the backing memory.
pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

pub const CHUNK_SIZE_VAR: &str = "TAGALLOC_CHUNK_SIZE";
pub const MAX_HEAP_VAR: &str = "TAGALLOC_MAX_HEAP";

/// Padding word, prologue header and footer, epilogue header.
pub(crate) const PROLOGUE_BYTES: usize = 4 * WSIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  pub chunk_size: usize,
  pub max_heap: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      chunk_size: DEFAULT_CHUNK_SIZE,
      max_heap: DEFAULT_MAX_HEAP,
    }
  }
}

impl Config {
  /// Reads overrides from the process environment and validates the result.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_vars(|name| env::var(name).ok())
  }

  /// Same as [`Config::from_env`] but with a caller-supplied variable lookup.
  pub fn from_vars<F>(mut var: F) -> Result<Self, ConfigError>
  where
    F: FnMut(&str) -> Option<String>,
  {
    let mut config = Self::default();

    if let Some(value) = var(CHUNK_SIZE_VAR) {
      config.chunk_size = parse_bytes(CHUNK_SIZE_VAR, value)?;
    }
    if let Some(value) = var(MAX_HEAP_VAR) {
      config.max_heap = parse_bytes(MAX_HEAP_VAR, value)?;
    }

    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.chunk_size % 8 != 0 || self.chunk_size < MIN_BLOCK_SIZE {
      return Err(ConfigError::ChunkSize(self.chunk_size));
    }

    let fits_words = u32::try_from(self.max_heap).is_ok();
    let too_small = PROLOGUE_BYTES
      .checked_add(self.chunk_size)
      .is_none_or(|need| self.max_heap < need);
    if !fits_words || too_small {
      return Err(ConfigError::MaxHeap {
        max_heap: self.max_heap,
        chunk_size: self.chunk_size,
      });
    }

    Ok(())
  }
}

fn parse_bytes(
  var: &'static str,
  value: String,
) -> Result<usize, ConfigError> {
  value.trim().parse().map_err(|_| ConfigError::Parse { var, value })
}
