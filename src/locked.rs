//! The process-facing allocator: a [`Heap`] behind one spin lock.

use std::{
  alloc::{GlobalAlloc, Layout},
  cell::Cell,
  fmt::Write as _,
  num::NonZeroUsize,
  ptr::{self, NonNull},
};

use log::Level;

use crate::{
  align::ALIGNMENT,
  heap::{Heap, Placement, Release, Resize},
  region::Region,
  report::RawStdout,
};

thread_local! {
  // Const-initialized and without a destructor, so touching it never allocates.
  static LOGGING: Cell<bool> = const { Cell::new(false) };
}

/// Emits a log record unless the current thread is already inside the logger.
///
/// Loggers allocate; when this crate is the global allocator those
/// allocations come straight back here.
macro_rules! heap_log {
  ($level:expr, $($arg:tt)+) => {
    if log::log_enabled!($level) {
      let _ = LOGGING.try_with(|active| {
        if !active.replace(true) {
          log::log!($level, $($arg)+);
          active.set(false);
        }
      });
    }
  };
}

/// A [`Heap`] guarded by a single exclusive lock.
///
/// Every operation takes the lock once, performs the whole search, growth,
/// list update or shrink inside that critical section, and drops the lock
/// before logging and before returning. Failures are reported as null
/// pointers; nothing panics across this boundary.
///
/// `new` is `const`, so the usual setup is a `static` that lives for the
/// whole process:
///
/// ```rust
/// use brkalloc::{LockedHeap, SbrkRegion};
///
/// static HEAP: LockedHeap<SbrkRegion> = LockedHeap::new(SbrkRegion::new());
/// ```
pub struct LockedHeap<R> {
  inner: spin::Mutex<Heap<R>>,
}

impl<R: Region> LockedHeap<R> {
  pub const fn new(region: R) -> Self {
    Self {
      inner: spin::Mutex::new(Heap::new(region)),
    }
  }

  /// Locks the heap for direct inspection or use.
  pub fn lock(&self) -> spin::MutexGuard<'_, Heap<R>> {
    self.inner.lock()
  }

  /// Returns a pointer to at least `size` usable bytes, or null.
  ///
  /// A zero-byte request returns null without touching the lock.
  pub fn acquire(
    &self,
    size: usize,
  ) -> *mut u8 {
    let Some(size) = NonZeroUsize::new(size) else {
      return ptr::null_mut();
    };

    let result = self.inner.lock().allocate(size);

    match result {
      Ok((ptr, placement)) => {
        heap_log!(Level::Trace, "acquire({size}) -> {:p} ({})", ptr, match placement {
          Placement::Reused => "reused",
          Placement::Grown => "grown",
        });
        ptr.as_ptr()
      }
      Err(err) => {
        heap_log!(Level::Warn, "acquire({size}) failed: {err}");
        ptr::null_mut()
      }
    }
  }

  /// Returns `count * size` zeroed bytes, or null on zero size, overflow or
  /// exhaustion.
  pub fn acquire_zeroed(
    &self,
    count: usize,
    size: usize,
  ) -> *mut u8 {
    let Some(total) = count.checked_mul(size) else {
      heap_log!(Level::Warn, "acquire_zeroed({count}, {size}) overflows");
      return ptr::null_mut();
    };

    let ptr = self.acquire(total);
    if !ptr.is_null() {
      // The block belongs to the caller now; no need to hold the lock.
      unsafe { ptr.write_bytes(0, total) };
    }
    ptr
  }

  /// Releases a pointer obtained from this heap. Null is ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer returned by [`acquire`],
  /// [`acquire_zeroed`] or [`resize`] on this same heap. Releasing a foreign
  /// pointer or releasing twice is undefined behavior and is not detected:
  /// the header in front of `ptr` is trusted as-is.
  ///
  /// [`acquire`]: LockedHeap::acquire
  /// [`acquire_zeroed`]: LockedHeap::acquire_zeroed
  /// [`resize`]: LockedHeap::resize
  pub unsafe fn release(
    &self,
    ptr: *mut u8,
  ) {
    let Some(ptr) = NonNull::new(ptr) else {
      return;
    };

    let release = unsafe { self.inner.lock().deallocate(ptr) };
    log_release(ptr, release);
  }

  /// Resizes the block at `ptr` to hold at least `size` bytes.
  ///
  /// - a null `ptr` behaves like [`acquire`](LockedHeap::acquire);
  /// - a zero `size` behaves like [`release`](LockedHeap::release) and returns null;
  /// - a block that is already large enough is returned as is;
  /// - otherwise the contents move to a new block. If that block cannot be
  ///   obtained, null is returned and `ptr` stays valid and unchanged.
  ///
  /// # Safety
  ///
  /// Same contract as [`release`](LockedHeap::release).
  pub unsafe fn resize(
    &self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    let Some(size) = NonZeroUsize::new(size) else {
      unsafe { self.release(ptr) };
      return ptr::null_mut();
    };
    let Some(old) = NonNull::new(ptr) else {
      return self.acquire(size.get());
    };

    let result = unsafe { self.inner.lock().reallocate(old, size) };

    match result {
      Ok((new, Resize::InPlace)) => {
        heap_log!(Level::Trace, "resize({:p}, {size}) -> in place", old);
        new.as_ptr()
      }
      Ok((new, Resize::Moved(release))) => {
        heap_log!(Level::Trace, "resize({:p}, {size}) -> {:p}", old, new);
        log_release(old, release);
        new.as_ptr()
      }
      Err(err) => {
        heap_log!(Level::Warn, "resize({:p}, {size}) failed: {err}", old);
        ptr::null_mut()
      }
    }
  }

  /// Usable capacity of the block at `ptr`, `0` for null.
  ///
  /// # Safety
  ///
  /// Same contract as [`release`](LockedHeap::release).
  pub unsafe fn usable_size(
    &self,
    ptr: *mut u8,
  ) -> usize {
    match NonNull::new(ptr) {
      Some(ptr) => unsafe { self.inner.lock().usable_size(ptr) },
      None => 0,
    }
  }

  /// Writes the block listing to standard output.
  ///
  /// Output goes straight to the file descriptor so that printing never
  /// allocates while the lock is held.
  pub fn print_mem_list(&self) {
    let heap = self.inner.lock();
    let _ = write!(RawStdout, "{}", heap.report());
  }
}

fn log_release(
  ptr: NonNull<u8>,
  release: Release,
) {
  match release {
    Release::Trimmed { bytes } => {
      heap_log!(Level::Trace, "release({:p}) -> returned {bytes} bytes", ptr);
    }
    Release::MarkedFree => {
      heap_log!(Level::Trace, "release({:p}) -> marked free", ptr);
    }
    Release::Retained(err) => {
      heap_log!(Level::Error, "release({:p}) could not shrink region: {err}", ptr);
    }
  }
}

unsafe impl<R: Region + Send> GlobalAlloc for LockedHeap<R> {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }
    self.acquire(layout.size())
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }
    self.acquire_zeroed(1, layout.size())
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    unsafe { self.release(ptr) }
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }
    unsafe { self.resize(ptr, new_size) }
  }
}
