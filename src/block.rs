use std::{mem, ptr::NonNull};

use crate::align::ALIGNMENT;

/// Metadata record placed immediately in front of every payload.
///
/// Blocks form an intrusive singly linked list in the order they were carved
/// from the region. The `align` attribute pads the header to a multiple of
/// [`ALIGNMENT`], so a payload that starts right after an aligned header is
/// itself aligned.
#[repr(C, align(16))]
pub struct Block {
  /// Usable payload capacity in bytes.
  pub size: usize,
  pub is_free: bool,
  pub next: *mut Block,
}

/// Width of a block header, and the distance between a header and its payload.
pub const HEADER_SIZE: usize = mem::size_of::<Block>();

const _: () = assert!(mem::align_of::<Block>() == ALIGNMENT);
const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);

impl Block {
  pub fn new(
    size: usize,
    is_free: bool,
    next: *mut Block,
  ) -> Self {
    Self { size, is_free, next }
  }

  /// Writes a fresh, in-use header at `base` and returns it.
  ///
  /// # Safety
  ///
  /// `base` must be aligned to [`ALIGNMENT`] and valid for writes of
  /// `HEADER_SIZE + size` bytes that nothing else references.
  pub unsafe fn init(
    base: NonNull<u8>,
    size: usize,
  ) -> NonNull<Block> {
    let block = base.cast::<Block>();
    unsafe { block.write(Block::new(size, false, std::ptr::null_mut())) };
    block
  }

  /// Payload address handed to callers for `block`.
  #[inline]
  pub fn payload(block: NonNull<Block>) -> NonNull<u8> {
    // SAFETY: every block lives in front of at least `HEADER_SIZE` bytes of
    // the region it was carved from, so the offset stays in bounds.
    unsafe { block.cast::<u8>().add(HEADER_SIZE) }
  }

  /// Recovers the header that owns `payload`.
  ///
  /// This is the single place where the header/payload addressing contract is
  /// trusted: nothing here can tell a real payload from any other address.
  ///
  /// # Safety
  ///
  /// `payload` must have been returned by [`Block::payload`] for a block that
  /// is still linked into a live heap. Foreign pointers and pointers that were
  /// already released are undefined behavior.
  #[inline]
  pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<Block> {
    unsafe { payload.sub(HEADER_SIZE).cast::<Block>() }
  }

  /// First address past the payload of `block`.
  ///
  /// # Safety
  ///
  /// `block` must point to an initialized header.
  #[inline]
  pub unsafe fn end(block: NonNull<Block>) -> *mut u8 {
    unsafe { Block::payload(block).as_ptr().add((*block.as_ptr()).size) }
  }

  /// Bytes the block occupies in the region, header included.
  #[inline]
  pub fn footprint(&self) -> usize {
    HEADER_SIZE + self.size
  }
}
