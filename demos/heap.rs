//! Walks through the program break as blocks are acquired and released.
//!
//! `SbrkRegion` assumes nothing else moves the break, but this process also
//! runs the system allocator, which grows the break for its own use (stdout
//! buffers, the logger). Logging is therefore switched on only after the
//! break-sensitive steps, and the printed break values are indicative: a
//! foreign `brk` between two steps means a release only marks the block free.

use std::io::Read;

use brkalloc::{LockedHeap, Region, SbrkRegion};

static HEAP: LockedHeap<SbrkRegion> = LockedHeap::new(SbrkRegion::new());

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break = {:?}",
    label,
    std::process::id(),
    SbrkRegion::new().top(),
  );
}

fn main() {
  print_program_break("start");
  block_until_enter_pressed();

  // 1) Three blocks back to back.
  let first = HEAP.acquire(4);
  let second = HEAP.acquire(12);
  let third = HEAP.acquire(64);
  println!("\n[1] Acquired {first:p}, {second:p}, {third:p}");
  print_program_break("after three acquires");
  HEAP.print_mem_list();
  block_until_enter_pressed();

  unsafe {
    first.cast::<u32>().write(0xDEADBEEF);
    second.write_bytes(0xAB, 12);
    println!("[1] Value at first = 0x{:X}", first.cast::<u32>().read());

    // 2) Releasing an interior block only flags it free.
    HEAP.release(first);
    println!("\n[2] Released first, break unchanged");
    print_program_break("after interior release");
    HEAP.print_mem_list();
    block_until_enter_pressed();

    // 3) A small request reuses it.
    let reused = HEAP.acquire(2);
    println!(
      "\n[3] Acquired 2 bytes at {reused:p}: {}",
      if reused == first { "reused the freed block" } else { "new block" }
    );
    block_until_enter_pressed();

    // 4) A large block moves the break, releasing it moves it back.
    print_program_break("before large acquire");
    let big = HEAP.acquire(64 * 1024);
    print_program_break("after large acquire");
    HEAP.release(big);
    print_program_break("after large release");
    block_until_enter_pressed();

    // From here on every heap operation is traced.
    env_logger::builder().filter_level(log::LevelFilter::Trace).init();

    // 5) Growing a block relocates it and keeps its contents.
    let grown = HEAP.resize(second, 256);
    println!("\n[5] Resized second {second:p} -> {grown:p}, first byte = 0x{:X}", grown.read());
    HEAP.print_mem_list();

    HEAP.release(grown);
    HEAP.release(third);
    HEAP.release(reused);
  }

  println!("\n[6] End of example.");
  HEAP.print_mem_list();
  print_program_break("end");
}
