//! Contiguous memory regions the heap grows into.
//!
//! A [`Region`] behaves like the classic program break: one upper boundary
//! (`top`) that moves up on [`Region::extend`] and down on [`Region::shrink`].
//! The heap never asks for anything else, which lets the same engine run on
//! the real break ([`SbrkRegion`]) or on a plain buffer ([`ArenaRegion`]).

use std::{
  io,
  ptr::{self, NonNull},
};

use libc::{c_void, intptr_t, sbrk};
use thiserror::Error;

use crate::align::ALIGNMENT;

/// Failure to move the top of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegionError {
  #[error("region exhausted: requested {requested} bytes, {available} available")]
  Exhausted { requested: usize, available: usize },
  #[error("cannot shrink region by {requested} bytes, only {mapped} mapped")]
  Underflow { requested: usize, mapped: usize },
  #[error("increment of {0} bytes does not fit the break offset type")]
  TooLarge(usize),
  #[error("sbrk failed with errno {errno}")]
  Os { errno: i32 },
}

/// A contiguous, monotonically extendable memory region.
///
/// # Safety
///
/// Implementors must guarantee that:
///
/// - `extend(n)` returns the previous `top`, and afterwards the `n` bytes
///   starting there are valid for reads and writes and `top` has advanced by
///   at least `n` bytes;
/// - the returned base is aligned to [`ALIGNMENT`];
/// - `shrink(n)` only ever moves `top` down by exactly `n` bytes;
/// - nothing outside the owning heap moves the same boundary.
pub unsafe trait Region {
  /// Current upper boundary of the region.
  fn top(&self) -> *mut u8;

  /// Grows the region by `increment` bytes and returns the base of the new extension.
  ///
  /// # Safety
  ///
  /// Must be called with exclusive access to the region.
  unsafe fn extend(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, RegionError>;

  /// Returns the last `decrement` bytes of the region.
  ///
  /// # Safety
  ///
  /// Nothing may reference the returned bytes afterwards.
  unsafe fn shrink(
    &mut self,
    decrement: usize,
  ) -> Result<(), RegionError>;
}

/// The process data segment, moved with `sbrk(2)`.
///
/// Only one `SbrkRegion` should be in use per process, and no other code may
/// call `brk`/`sbrk` concurrently with it.
#[derive(Debug, Default)]
pub struct SbrkRegion {
  _private: (),
}

impl SbrkRegion {
  pub const fn new() -> Self {
    Self { _private: () }
  }

  unsafe fn move_break(increment: intptr_t) -> Result<*mut u8, RegionError> {
    let address = unsafe { sbrk(increment) };

    if address == usize::MAX as *mut c_void {
      let errno = io::Error::last_os_error().raw_os_error().unwrap_or(libc::ENOMEM);
      return Err(RegionError::Os { errno });
    }

    Ok(address as *mut u8)
  }
}

fn to_offset(bytes: usize) -> Result<intptr_t, RegionError> {
  intptr_t::try_from(bytes).map_err(|_| RegionError::TooLarge(bytes))
}

unsafe impl Region for SbrkRegion {
  fn top(&self) -> *mut u8 {
    unsafe { sbrk(0) as *mut u8 }
  }

  unsafe fn extend(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, RegionError> {
    let increment = to_offset(increment)?;

    unsafe {
      // The initial break, or one left behind by another user, may sit off
      // the alignment grid.
      let top = self.top() as usize;
      let pad = top.next_multiple_of(ALIGNMENT) - top;
      if pad > 0 {
        Self::move_break(pad as intptr_t)?;
      }

      match Self::move_break(increment) {
        Ok(base) => NonNull::new(base).ok_or(RegionError::Os { errno: libc::ENOMEM }),
        Err(err) => {
          if pad > 0 {
            let _ = Self::move_break(-(pad as intptr_t));
          }
          Err(err)
        }
      }
    }
  }

  unsafe fn shrink(
    &mut self,
    decrement: usize,
  ) -> Result<(), RegionError> {
    let decrement = to_offset(decrement)?;
    unsafe { Self::move_break(-decrement) }.map(|_| ())
  }
}

/// A region carved out of a caller-provided buffer.
///
/// Behaves like the program break over a fixed capacity: extending past the
/// end fails with [`RegionError::Exhausted`] instead of asking the OS for more.
#[derive(Debug)]
pub struct ArenaRegion {
  start: *mut u8,
  capacity: usize,
  used: usize,
}

// SAFETY: the region exclusively owns the buffer it was built from.
unsafe impl Send for ArenaRegion {}

impl ArenaRegion {
  /// A region with no capacity; every extension fails.
  pub const fn empty() -> Self {
    Self {
      start: ptr::null_mut(),
      capacity: 0,
      used: 0,
    }
  }

  /// Builds a region over `len` bytes starting at `start`.
  ///
  /// Leading bytes needed to reach [`ALIGNMENT`] are skipped.
  ///
  /// # Safety
  ///
  /// The memory must be valid for reads and writes, outlive the region and
  /// every pointer the heap hands out from it, and not be used by anything else.
  pub unsafe fn new(
    start: *mut u8,
    len: usize,
  ) -> Self {
    let skip = (start as usize).next_multiple_of(ALIGNMENT) - start as usize;

    if start.is_null() || skip >= len {
      return Self::empty();
    }

    Self {
      start: unsafe { start.add(skip) },
      capacity: (len - skip) & !(ALIGNMENT - 1),
      used: 0,
    }
  }

  /// Builds a region that owns a leaked static buffer.
  pub fn from_static(buffer: &'static mut [u8]) -> Self {
    // SAFETY: a `'static` exclusive borrow satisfies every requirement of `new`.
    unsafe { Self::new(buffer.as_mut_ptr(), buffer.len()) }
  }

  /// First usable address.
  pub fn start(&self) -> *mut u8 {
    self.start
  }

  /// Total usable bytes.
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes currently below `top`.
  pub fn used(&self) -> usize {
    self.used
  }
}

unsafe impl Region for ArenaRegion {
  fn top(&self) -> *mut u8 {
    self.start.wrapping_add(self.used)
  }

  unsafe fn extend(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, RegionError> {
    let available = self.capacity - self.used;
    if increment > available {
      return Err(RegionError::Exhausted {
        requested: increment,
        available,
      });
    }

    let base = self.top();
    self.used += increment;

    NonNull::new(base).ok_or(RegionError::Exhausted {
      requested: increment,
      available,
    })
  }

  unsafe fn shrink(
    &mut self,
    decrement: usize,
  ) -> Result<(), RegionError> {
    if decrement > self.used {
      return Err(RegionError::Underflow {
        requested: decrement,
        mapped: self.used,
      });
    }

    self.used -= decrement;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn arena(bytes: usize) -> (Vec<u8>, ArenaRegion) {
    let mut buffer = vec![0u8; bytes];
    let region = unsafe { ArenaRegion::new(buffer.as_mut_ptr(), buffer.len()) };
    (buffer, region)
  }

  #[test]
  fn test_arena_extend_and_shrink() {
    let (_buffer, mut region) = arena(1024);
    let start = region.start();

    assert_eq!(start as usize % ALIGNMENT, 0);
    assert_eq!(region.top(), start);

    unsafe {
      let first = region.extend(64).unwrap();
      assert_eq!(first.as_ptr(), start);
      assert_eq!(region.top(), start.add(64));

      let second = region.extend(32).unwrap();
      assert_eq!(second.as_ptr(), start.add(64));
      assert_eq!(region.used(), 96);

      region.shrink(32).unwrap();
      assert_eq!(region.top(), start.add(64));
      region.shrink(64).unwrap();
      assert_eq!(region.top(), start);
    }
  }

  #[test]
  fn test_arena_exhausted() {
    let (_buffer, mut region) = arena(256);
    let capacity = region.capacity();

    unsafe {
      let err = region.extend(capacity + ALIGNMENT).unwrap_err();
      assert_eq!(
        err,
        RegionError::Exhausted {
          requested: capacity + ALIGNMENT,
          available: capacity,
        }
      );
      assert_eq!(region.used(), 0);

      region.extend(capacity).unwrap();
      assert!(region.extend(ALIGNMENT).is_err());
    }
  }

  #[test]
  fn test_arena_underflow() {
    let (_buffer, mut region) = arena(256);

    unsafe {
      region.extend(32).unwrap();
      assert_eq!(
        region.shrink(48),
        Err(RegionError::Underflow {
          requested: 48,
          mapped: 32,
        })
      );
      assert_eq!(region.used(), 32);
    }
  }

  #[test]
  fn test_arena_skips_unaligned_prefix() {
    let mut buffer = vec![0u8; 256];
    let misaligned = unsafe { buffer.as_mut_ptr().add(1) };
    let region = unsafe { ArenaRegion::new(misaligned, 255) };

    assert_eq!(region.start() as usize % ALIGNMENT, 0);
    assert!(region.start() > misaligned);
    assert!(region.capacity() <= 255 - (region.start() as usize - misaligned as usize));
    assert_eq!(region.capacity() % ALIGNMENT, 0);
  }

  #[test]
  fn test_empty_arena() {
    let mut region = ArenaRegion::empty();

    assert_eq!(region.capacity(), 0);
    assert!(unsafe { region.extend(ALIGNMENT) }.is_err());
  }

  #[test]
  fn test_error_display() {
    let err = RegionError::Exhausted {
      requested: 64,
      available: 16,
    };
    assert_eq!(err.to_string(), "region exhausted: requested 64 bytes, 16 available");
    assert_eq!(RegionError::Os { errno: 12 }.to_string(), "sbrk failed with errno 12");
  }
}
