//! C allocator entry points over the process-wide heap.
//!
//! Linking the `cdylib` built with the `malloc-abi` feature (or preloading it)
//! replaces the platform allocator for the whole process. Only alignments up
//! to [`ALIGNMENT`] are supported: the aligned entry points accept them and
//! reject anything stricter.

use std::ffi::{c_int, c_void};

use libc::{EINVAL, ENOMEM};

use crate::{LockedHeap, SbrkRegion, align::ALIGNMENT};

/// The heap behind every exported symbol. Initialized at compile time and
/// never torn down.
static HEAP: LockedHeap<SbrkRegion> = LockedHeap::new(SbrkRegion::new());

/// # Safety
///
/// The returned pointer must be released with [`free`] or [`realloc`] from
/// this library.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
  HEAP.acquire(size).cast()
}

/// # Safety
///
/// `ptr` must be null or a live pointer from this library's allocation
/// functions. Double frees and foreign pointers are undefined behavior.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
  unsafe { HEAP.release(ptr.cast()) }
}

/// # Safety
///
/// Same contract as [`free`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc(
  ptr: *mut c_void,
  size: usize,
) -> *mut c_void {
  unsafe { HEAP.resize(ptr.cast(), size).cast() }
}

/// # Safety
///
/// Same contract as [`malloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn calloc(
  nmemb: usize,
  size: usize,
) -> *mut c_void {
  HEAP.acquire_zeroed(nmemb, size).cast()
}

/// # Safety
///
/// Same contract as [`free`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> usize {
  unsafe { HEAP.usable_size(ptr.cast()) }
}

/// # Safety
///
/// `memptr` must be valid for a pointer-sized write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posix_memalign(
  memptr: *mut *mut c_void,
  alignment: usize,
  size: usize,
) -> c_int {
  if !alignment.is_power_of_two() || alignment % size_of::<*mut c_void>() != 0 {
    return EINVAL;
  }
  if alignment > ALIGNMENT {
    return ENOMEM;
  }

  let ptr = HEAP.acquire(size);
  if ptr.is_null() && size != 0 {
    return ENOMEM;
  }
  unsafe { memptr.write(ptr.cast()) };
  0
}

/// # Safety
///
/// Same contract as [`malloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn aligned_alloc(
  alignment: usize,
  size: usize,
) -> *mut c_void {
  if !alignment.is_power_of_two() || alignment > ALIGNMENT {
    return std::ptr::null_mut();
  }
  HEAP.acquire(size).cast()
}

/// # Safety
///
/// Same contract as [`malloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memalign(
  alignment: usize,
  size: usize,
) -> *mut c_void {
  unsafe { aligned_alloc(alignment, size) }
}

/// Dumps the tracking list to standard output.
#[unsafe(no_mangle)]
pub extern "C" fn print_mem_list() {
  HEAP.print_mem_list();
}
