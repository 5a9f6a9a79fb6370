//! # brkalloc - A First-Fit Free-List Heap Allocator
//!
//! This crate provides a small, thread-safe heap allocator that manages one
//! contiguous region grown with the `sbrk` system call (or any other
//! [`Region`]), offering the classic `malloc`/`free`/`realloc` primitives.
//!
//! ## Overview
//!
//! ```text
//!   Managed region:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         HEAP MEMORY                                  │
//!   │                                                                      │
//!   │   ┌──────┬──────┬──────┬──────┐                                      │
//!   │   │  A   │  B   │  C   │  D   │        (not yet mapped)              │
//!   │   │ used │ free │ used │ used │                                      │
//!   │   └──────┴──────┴──────┴──────┘                                      │
//!   │   ▲                           ▲                                      │
//!   │   │                           │                                      │
//!   │  head                     Program Break == end of tail (D)           │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   acquire:  first free block big enough (B), else grow at the break.
//!   release:  the block at the break (D) is given back to the OS,
//!             any other block is only flagged free.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   brkalloc
//!   ├── align      - Alignment constant and align! macro
//!   ├── block      - Block header and the payload <-> header mapping
//!   ├── region     - Region trait, SbrkRegion, ArenaRegion
//!   ├── heap       - Heap: the unlocked first-fit engine
//!   ├── locked     - LockedHeap: spin-locked allocator, GlobalAlloc
//!   ├── report     - Block listing for debugging
//!   └── ffi        - malloc/free/realloc/calloc symbols (feature `malloc-abi`)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use brkalloc::{LockedHeap, SbrkRegion};
//!
//! static HEAP: LockedHeap<SbrkRegion> = LockedHeap::new(SbrkRegion::new());
//!
//! let ptr = HEAP.acquire(64) as *mut u64;
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!   *ptr = 42;
//!   let ptr = HEAP.resize(ptr.cast(), 256);
//!   HEAP.release(ptr);
//! }
//! ```
//!
//! The same heap can be installed as the Rust global allocator:
//!
//! ```rust,ignore
//! #[global_allocator]
//! static ALLOCATOR: LockedHeap<SbrkRegion> = LockedHeap::new(SbrkRegion::new());
//! ```
//!
//! ## Block Layout
//!
//! ```text
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ is_free: bool   │  │  │                          │  │
//!   │  │ next: null/ptr  │  │  │   N bytes usable         │  │
//!   │  └─────────────────┘  │  │   (16-byte aligned)      │  │
//!   │  HEADER_SIZE bytes    │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! Requests are rounded up to 16 bytes. Blocks are linked in creation order,
//! which is also address order because the region only grows upwards.
//!
//! ## Limitations
//!
//! - **No splitting or coalescing**: a reused block keeps its full capacity,
//!   neighbouring free blocks are never merged
//! - **Top-only trimming**: memory goes back to the OS only when the block at
//!   the program break is released
//! - **Fixed alignment**: layouts aligned beyond 16 bytes are refused
//! - **One coarse lock**: every operation is serialized
//! - **Unix-only** `SbrkRegion`: requires `libc` and `sbrk`
//!
//! ## Safety
//!
//! The header of a block is found by stepping back [`HEADER_SIZE`] bytes from
//! the pointer handed to the caller. Passing a pointer this allocator did not
//! return, or one it already released, corrupts the block list; this is not
//! detected and is undefined behavior.

pub mod align;
mod block;
#[cfg(feature = "malloc-abi")]
pub mod ffi;
pub mod heap;
mod locked;
pub mod region;
mod report;

pub use block::{Block, HEADER_SIZE};
pub use heap::{BlockInfo, Heap, HeapError, HeapStats, IntegrityError, Placement, Release, Resize};
pub use locked::LockedHeap;
pub use region::{ArenaRegion, Region, RegionError, SbrkRegion};
pub use report::Report;
