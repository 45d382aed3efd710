//! # tagalloc - A Boundary-Tag Memory Allocator Library
//!
//! This crate provides a **first-fit explicit free-list allocator** that
//! manages a single linear heap which only grows at its end, the way a
//! program break grows with `sbrk(2)`.
//!
//! ## Overview
//!
//! Every block carries its size and allocation state twice, in a header
//! before the payload and a footer after it. Free blocks additionally store
//! `next`/`prev` links in their own payload, which forms the free list:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                               HEAP                                   │
//!   │                                                                      │
//!   │  ┌───┬──────┬────────────┬──────────────────┬──────────────┬─────┐   │
//!   │  │pad│ prol │  A1 (used) │    F1 (free)     │  A2 (used)   │ epi │   │
//!   │  └───┴──────┴────────────┴──────────────────┴──────────────┴─────┘   │
//!   │                                 ▲                                    │
//!   │                                 │                                    │
//!   │                        free list head                                │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Allocation: first fit from the free list head, split when the leftover
//!               can hold a block of its own.
//!   Free:       push on the free list head, merge with free neighbors.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Boundary-tag encoding and neighbor arithmetic
//!   ├── region     - Growable heap region and its memory sources
//!   ├── free_list  - Intrusive doubly linked free list
//!   ├── coalesce   - Merging adjacent free blocks
//!   ├── allocator  - Allocator (init/allocate/free/reallocate)
//!   ├── validate   - Offline heap checker
//!   ├── config     - Chunk size and heap limit
//!   └── error      - Error types
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::Allocator;
//!
//! let mut allocator = Allocator::new()?;
//!
//! let addr = allocator.allocate(64).expect("heap has room");
//! allocator.payload_mut(addr)?[..5].copy_from_slice(b"hello");
//!
//! let addr = allocator.reallocate(Some(addr), 256)?.expect("heap has room");
//! assert_eq!(&allocator.payload(addr)?[..5], b"hello");
//!
//! allocator.free(addr)?;
//! assert!(allocator.validate().is_ok());
//! # Ok::<(), tagalloc::AllocError>(())
//! ```
//!
//! ## How It Works
//!
//! Addresses are offsets into the heap bytes, always pointing at a payload:
//!
//! ```text
//!   Single Block:
//!   ┌────────────┬────────────────────────────────┬────────────┐
//!   │   header   │            payload             │   footer   │
//!   │ size | 1/0 │  allocated: caller's bytes     │ size | 1/0 │
//!   │  4 bytes   │  free:      next, prev, ...    │  4 bytes   │
//!   └────────────┴────────────────────────────────┴────────────┘
//!                ▲
//!                └── Address returned to the caller (8-byte aligned)
//! ```
//!
//! The footer of the block before `b` sits right before `b`'s header, so
//! both physical neighbors are reachable in constant time. Freeing merges
//! with them immediately, which keeps the heap free of adjacent free blocks.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: an [`Allocator`] is an ordinary value; share it
//!   behind your own lock or create one per thread
//! - **First fit only**: no size classes or best-fit search
//! - **No shrinking**: the heap never returns memory to its source
//! - **32-bit tags**: a heap holds at most 4 GiB

pub mod align;
pub mod allocator;
pub mod block;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod free_list;
pub mod region;
pub mod validate;

pub use allocator::{Allocator, BlockInfo, Blocks, HeapStats};
pub use block::{Address, BlockState, Tag};
pub use config::Config;
pub use error::{AllocError, ConfigError, HeapError};
pub use free_list::FreeList;
#[cfg(unix)]
pub use region::MmapSource;
pub use region::{HeapRegion, MemorySource, VecSource};
pub use validate::{Report, Violation};
