/// Alignment of every block header and therefore of every payload pointer.
///
/// Matches the strictest fundamental alignment on the supported targets
/// (`max_align_t` is 16 bytes on x86_64 and aarch64).
pub const ALIGNMENT: usize = 16;

/// Rounds `value` up to the next multiple of [`ALIGNMENT`].
///
/// Evaluates to `None` when rounding would overflow `usize`.
///
/// # Examples
///
/// ```rust
/// use brkalloc::align;
///
/// assert_eq!(align!(1), Some(16));
/// assert_eq!(align!(16), Some(16));
/// assert_eq!(align!(17), Some(32));
/// assert_eq!(align!(usize::MAX), None);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value as usize)
      .checked_add($crate::align::ALIGNMENT - 1)
      .map(|v| v & !($crate::align::ALIGNMENT - 1))
  };
}

/// Returns `true` when `addr` sits on an [`ALIGNMENT`] boundary.
#[inline]
pub fn is_aligned(addr: usize) -> bool {
  addr & (ALIGNMENT - 1) == 0
}
