//! The unlocked allocation engine.
//!
//! [`Heap`] owns the tracking list and the region it grows into. It performs
//! no locking of its own: every method takes `&mut self` (or `&self` for
//! reads), and [`LockedHeap`](crate::LockedHeap) wraps it in a mutex so that
//! each public operation, growth and list append included, happens inside one
//! critical section.

use std::{
  marker::PhantomData,
  num::NonZeroUsize,
  ptr::{self, NonNull},
};

use thiserror::Error;

use crate::{
  align,
  block::{Block, HEADER_SIZE},
  region::{Region, RegionError},
  report::Report,
};

/// Why a request could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
  #[error("out of memory: {0}")]
  OutOfMemory(#[from] RegionError),
  #[error("request of {size} bytes overflows the block size")]
  SizeOverflow { size: usize },
}

/// How an allocation was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
  /// An existing free block was handed out again.
  Reused,
  /// The region was extended and a new block appended.
  Grown,
}

/// What happened to a released block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
  /// The block was at the top of the region and its footprint was returned.
  Trimmed { bytes: usize },
  /// The block stays in the list, flagged free for reuse.
  MarkedFree,
  /// The block was at the top but the region refused to shrink; it is kept
  /// in the list as a free block.
  Retained(RegionError),
}

/// How a resize was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resize {
  /// The block was already large enough.
  InPlace,
  /// The payload was copied into a new block and the old one released.
  Moved(Release),
}

/// A violated tracking-list invariant, reported by [`Heap::check_integrity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IntegrityError {
  #[error("head is {head:#x} but tail is {tail:#x}")]
  HeadTailMismatch { head: usize, tail: usize },
  #[error("block {at:#x} links back to {next:#x}")]
  OutOfOrder { at: usize, next: usize },
  #[error("list ends at {last:#x} but tail is {tail:#x}")]
  TailMismatch { last: usize, tail: usize },
  #[error("tail payload ends at {tail_end:#x} but region top is {top:#x}")]
  TopMismatch { tail_end: usize, top: usize },
}

/// Snapshot of one block in the tracking list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Header address.
  pub addr: usize,
  /// Payload address.
  pub payload: usize,
  pub size: usize,
  pub is_free: bool,
  /// Header address of the successor, `0` for the tail.
  pub next: usize,
}

/// Aggregate counters over the tracking list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub blocks: usize,
  pub free_blocks: usize,
  /// Payload bytes of in-use blocks.
  pub used_bytes: usize,
  /// Payload bytes of free blocks.
  pub free_bytes: usize,
  /// Bytes carved from the region, headers included.
  pub mapped_bytes: usize,
}

/// First-fit heap over a single [`Region`].
pub struct Heap<R> {
  head: *mut Block,
  tail: *mut Block,
  region: R,
}

// SAFETY: the heap exclusively owns every block it links, and the region.
unsafe impl<R: Send> Send for Heap<R> {}

impl<R: Region> Heap<R> {
  pub const fn new(region: R) -> Self {
    Self {
      head: ptr::null_mut(),
      tail: ptr::null_mut(),
      region,
    }
  }

  pub fn region(&self) -> &R {
    &self.region
  }

  /// Current top of the managed region.
  pub fn top(&self) -> *mut u8 {
    self.region.top()
  }

  pub fn head(&self) -> *const Block {
    self.head
  }

  pub fn tail(&self) -> *const Block {
    self.tail
  }

  pub fn is_empty(&self) -> bool {
    self.head.is_null()
  }

  fn find_free_block(
    &self,
    size: usize,
  ) -> Option<NonNull<Block>> {
    let mut current = self.head;

    while let Some(block) = NonNull::new(current) {
      // SAFETY: every linked block is a live header inside the region.
      let header = unsafe { block.as_ref() };
      if header.is_free && header.size >= size {
        return Some(block);
      }
      current = header.next;
    }

    None
  }

  fn push(
    &mut self,
    block: NonNull<Block>,
  ) {
    let block = block.as_ptr();

    if self.head.is_null() {
      self.head = block;
    } else {
      // SAFETY: a non-empty list has a live tail.
      unsafe { (*self.tail).next = block };
    }
    self.tail = block;
  }

  /// Node whose `next` is `block`, or null when `block` is the head.
  fn predecessor(
    &self,
    block: NonNull<Block>,
  ) -> *mut Block {
    let block = block.as_ptr();
    if self.head == block {
      return ptr::null_mut();
    }

    let mut current = self.head;
    unsafe {
      while !current.is_null() && (*current).next != block {
        current = (*current).next;
      }
    }
    current
  }

  /// Hands out a block with at least `size` usable bytes.
  ///
  /// The request is rounded up to [`ALIGNMENT`](crate::align::ALIGNMENT).
  /// The first free block large enough, in creation order, is reused whole;
  /// otherwise the region is extended and the new block appended to the list.
  pub fn allocate(
    &mut self,
    size: NonZeroUsize,
  ) -> Result<(NonNull<u8>, Placement), HeapError> {
    let requested = size.get();
    let size = align!(requested).ok_or(HeapError::SizeOverflow { size: requested })?;

    if let Some(block) = self.find_free_block(size) {
      unsafe { (*block.as_ptr()).is_free = false };
      return Ok((Block::payload(block), Placement::Reused));
    }

    let total = size
      .checked_add(HEADER_SIZE)
      .ok_or(HeapError::SizeOverflow { size: requested })?;

    let block = unsafe {
      let base = self.region.extend(total)?;
      Block::init(base, size)
    };
    self.push(block);

    Ok((Block::payload(block), Placement::Grown))
  }

  /// Releases the block owning `ptr`.
  ///
  /// A block that ends exactly at the region top is unlinked and its whole
  /// footprint returned to the region. Any other block is flagged free and
  /// kept for reuse; neighbours are never merged.
  ///
  /// # Safety
  ///
  /// `ptr` must come from [`Heap::allocate`] or [`Heap::reallocate`] on this
  /// heap and must not have been released since.
  pub unsafe fn deallocate(
    &mut self,
    ptr: NonNull<u8>,
  ) -> Release {
    let block = unsafe { Block::from_payload(ptr) };
    let (end, footprint) = unsafe { (Block::end(block), block.as_ref().footprint()) };

    if end != self.region.top() {
      unsafe { (*block.as_ptr()).is_free = true };
      return Release::MarkedFree;
    }

    debug_assert_eq!(block.as_ptr(), self.tail);

    // Located before shrinking: the header is gone once the region gives it back.
    let prev = self.predecessor(block);

    if let Err(err) = unsafe { self.region.shrink(footprint) } {
      unsafe { (*block.as_ptr()).is_free = true };
      return Release::Retained(err);
    }

    if prev.is_null() {
      self.head = ptr::null_mut();
      self.tail = ptr::null_mut();
    } else {
      unsafe { (*prev).next = ptr::null_mut() };
      self.tail = prev;
    }

    Release::Trimmed { bytes: footprint }
  }

  /// Grows the block owning `ptr` to at least `size` bytes.
  ///
  /// A block that is already large enough is returned unchanged, its
  /// recorded capacity included. Otherwise a new block is allocated, the old
  /// payload copied over and the old block released. When the new block
  /// cannot be allocated the old one is left untouched.
  ///
  /// # Safety
  ///
  /// Same contract as [`Heap::deallocate`].
  pub unsafe fn reallocate(
    &mut self,
    ptr: NonNull<u8>,
    size: NonZeroUsize,
  ) -> Result<(NonNull<u8>, Resize), HeapError> {
    let old_size = unsafe { Block::from_payload(ptr).as_ref().size };

    if old_size >= size.get() {
      return Ok((ptr, Resize::InPlace));
    }

    let (new_ptr, _) = self.allocate(size)?;

    let release = unsafe {
      ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size.min(size.get()));
      self.deallocate(ptr)
    };

    Ok((new_ptr, Resize::Moved(release)))
  }

  /// Usable capacity of the block owning `ptr`.
  ///
  /// # Safety
  ///
  /// Same contract as [`Heap::deallocate`].
  pub unsafe fn usable_size(
    &self,
    ptr: NonNull<u8>,
  ) -> usize {
    unsafe { Block::from_payload(ptr).as_ref().size }
  }

  /// Iterates the tracking list in creation order.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      current: self.head,
      _heap: PhantomData,
    }
  }

  pub fn stats(&self) -> HeapStats {
    self.blocks().fold(HeapStats::default(), |mut stats, block| {
      stats.blocks += 1;
      stats.mapped_bytes += HEADER_SIZE + block.size;
      if block.is_free {
        stats.free_blocks += 1;
        stats.free_bytes += block.size;
      } else {
        stats.used_bytes += block.size;
      }
      stats
    })
  }

  /// Human-readable dump of the tracking list.
  pub fn report(&self) -> Report<'_, R> {
    Report::new(self)
  }

  /// Walks the list and checks its structural invariants.
  ///
  /// Blocks are carved from a region that only grows upwards, so creation
  /// order is address order; a link that does not move forward means a cycle
  /// or a corrupted header. The tail must end exactly at the region top.
  pub fn check_integrity(&self) -> Result<(), IntegrityError> {
    let (head, tail) = (self.head as usize, self.tail as usize);
    if (head == 0) != (tail == 0) {
      return Err(IntegrityError::HeadTailMismatch { head, tail });
    }
    if head == 0 {
      return Ok(());
    }

    let mut current = self.head;
    unsafe {
      while !(*current).next.is_null() {
        let next = (*current).next;
        if next <= current {
          return Err(IntegrityError::OutOfOrder {
            at: current as usize,
            next: next as usize,
          });
        }
        current = next;
      }

      if current != self.tail {
        return Err(IntegrityError::TailMismatch {
          last: current as usize,
          tail,
        });
      }

      let tail_end = Block::end(NonNull::new_unchecked(self.tail)) as usize;
      let top = self.region.top() as usize;
      if tail_end != top {
        return Err(IntegrityError::TopMismatch { tail_end, top });
      }
    }

    Ok(())
  }
}

/// Iterator over [`BlockInfo`] snapshots, see [`Heap::blocks`].
pub struct Blocks<'a> {
  current: *mut Block,
  _heap: PhantomData<&'a Block>,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    let block = NonNull::new(self.current)?;
    let header = unsafe { block.as_ref() };
    self.current = header.next;

    Some(BlockInfo {
      addr: block.as_ptr() as usize,
      payload: Block::payload(block).as_ptr() as usize,
      size: header.size,
      is_free: header.is_free,
      next: header.next as usize,
    })
  }
}
