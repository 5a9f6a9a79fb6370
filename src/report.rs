use std::fmt;

use libc::{STDOUT_FILENO, c_void, write};

use crate::{heap::Heap, region::Region};

/// Listing of every block in a heap, one line each.
///
/// ```text
/// head = 0x5555555a1000, tail = 0x5555555a1040
/// addr = 0x5555555a1000, size = 32, is_free = false, next = 0x5555555a1040
/// addr = 0x5555555a1040, size = 64, is_free = true, next = 0x0
/// ```
pub struct Report<'a, R> {
  heap: &'a Heap<R>,
}

impl<'a, R: Region> Report<'a, R> {
  pub(crate) fn new(heap: &'a Heap<R>) -> Self {
    Self { heap }
  }
}

impl<R: Region> fmt::Display for Report<'_, R> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(f, "head = {:p}, tail = {:p}", self.heap.head(), self.heap.tail())?;

    for block in self.heap.blocks() {
      writeln!(
        f,
        "addr = {:#x}, size = {}, is_free = {}, next = {:#x}",
        block.addr, block.size, block.is_free, block.next
      )?;
    }

    Ok(())
  }
}

/// Unbuffered standard output that never allocates.
///
/// `std::io::stdout` may allocate its buffer on first use, which would
/// re-enter the allocator while its lock is held.
pub(crate) struct RawStdout;

impl fmt::Write for RawStdout {
  fn write_str(
    &mut self,
    s: &str,
  ) -> fmt::Result {
    let mut bytes = s.as_bytes();

    while !bytes.is_empty() {
      let written = unsafe { write(STDOUT_FILENO, bytes.as_ptr() as *const c_void, bytes.len()) };
      if written < 0 {
        if std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted {
          continue;
        }
        return Err(fmt::Error);
      }
      bytes = &bytes[written as usize..];
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::{fmt::Write as _, num::NonZeroUsize};

  use super::*;
  use crate::region::ArenaRegion;

  #[test]
  fn test_report_lists_blocks() {
    let mut buffer = vec![0u128; 64];
    let region = unsafe { ArenaRegion::new(buffer.as_mut_ptr().cast(), 1024) };
    let mut heap = Heap::new(region);

    assert_eq!(heap.report().to_string(), "head = 0x0, tail = 0x0\n");

    let a = heap.allocate(NonZeroUsize::new(32).unwrap()).unwrap().0;
    let _b = heap.allocate(NonZeroUsize::new(64).unwrap()).unwrap().0;
    unsafe { heap.deallocate(a) };

    let blocks: Vec<_> = heap.blocks().collect();
    let expected = format!(
      "head = {:#x}, tail = {:#x}\n\
       addr = {:#x}, size = 32, is_free = true, next = {:#x}\n\
       addr = {:#x}, size = 64, is_free = false, next = 0x0\n",
      blocks[0].addr, blocks[1].addr, blocks[0].addr, blocks[1].addr, blocks[1].addr
    );
    assert_eq!(heap.report().to_string(), expected);
  }

  #[test]
  fn test_raw_stdout_writes() {
    assert!(RawStdout.write_str("").is_ok());
    assert!(write!(RawStdout, "{}", "").is_ok());
  }
}
