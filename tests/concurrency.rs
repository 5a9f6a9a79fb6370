use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
};

use brkalloc::{ArenaRegion, LockedHeap};
use rand::{Rng, SeedableRng, rngs::StdRng};

const ARENA: usize = 8 * 1024 * 1024;
const THREADS: usize = 8;
const ROUNDS: usize = 2_000;

fn locked_heap() -> (Vec<u128>, Arc<LockedHeap<ArenaRegion>>) {
  let mut buffer = vec![0u128; ARENA / 16];
  let region = unsafe { ArenaRegion::new(buffer.as_mut_ptr().cast(), ARENA) };
  (buffer, Arc::new(LockedHeap::new(region)))
}

/// Every thread stamps its blocks with its own id and checks the stamp is
/// intact before releasing: a block handed to two threads at once would show
/// another thread's id.
#[test]
fn threads_never_share_a_block() {
  let _ = env_logger::builder().is_test(true).try_init();
  let (_buffer, heap) = locked_heap();

  let handles: Vec<_> = (0..THREADS)
    .map(|id| {
      let heap = Arc::clone(&heap);
      thread::spawn(move || {
        let mut rng = StdRng::seed_from_u64(id as u64);
        let stamp = id as u8 + 1;
        let mut held: Vec<(*mut u8, usize)> = Vec::new();

        for _ in 0..ROUNDS {
          if held.len() < 8 && rng.gen_bool(0.6) {
            let size = rng.gen_range(1..512);
            let ptr = heap.acquire(size);
            assert!(!ptr.is_null());
            unsafe { ptr.write_bytes(stamp, size) };
            held.push((ptr, size));
          } else if !held.is_empty() {
            let (ptr, size) = held.swap_remove(rng.gen_range(0..held.len()));
            let bytes = unsafe { std::slice::from_raw_parts(ptr, size) };
            assert!(bytes.iter().all(|&b| b == stamp), "block {ptr:p} was shared");

            if rng.gen_bool(0.2) {
              let grown = unsafe { heap.resize(ptr, size * 2) };
              assert!(!grown.is_null());
              let bytes = unsafe { std::slice::from_raw_parts(grown, size) };
              assert!(bytes.iter().all(|&b| b == stamp), "resize lost data at {grown:p}");
              unsafe { heap.release(grown) };
            } else {
              unsafe { heap.release(ptr) };
            }
          }
        }

        for (ptr, _) in held {
          unsafe { heap.release(ptr) };
        }
      })
    })
    .collect();

  for handle in handles {
    handle.join().unwrap();
  }

  let heap = heap.lock();
  heap.check_integrity().unwrap();
  assert_eq!(heap.stats().used_bytes, 0);
}

/// An observer thread repeatedly takes the lock and validates the list shape
/// while workers churn.
#[test]
fn list_stays_well_formed_under_contention() {
  let (_buffer, heap) = locked_heap();
  let done = Arc::new(AtomicBool::new(false));

  let observer = {
    let heap = Arc::clone(&heap);
    let done = Arc::clone(&done);
    thread::spawn(move || {
      let mut checks = 0usize;
      loop {
        let finished = done.load(Ordering::Acquire);
        let heap = heap.lock();
        heap.check_integrity().unwrap();

        let mut addrs: Vec<usize> = heap.blocks().map(|b| b.addr).collect();
        let len = addrs.len();
        addrs.dedup();
        assert_eq!(addrs.len(), len, "duplicate block in list");

        checks += 1;
        if finished {
          break checks;
        }
      }
    })
  };

  let workers: Vec<_> = (0..THREADS)
    .map(|id| {
      let heap = Arc::clone(&heap);
      thread::spawn(move || {
        let mut rng = StdRng::seed_from_u64(0x5EED + id as u64);
        for _ in 0..ROUNDS {
          let ptr = heap.acquire(rng.gen_range(1..256));
          assert!(!ptr.is_null());
          unsafe { heap.release(ptr) };
        }
      })
    })
    .collect();

  for worker in workers {
    worker.join().unwrap();
  }
  done.store(true, Ordering::Release);

  assert!(observer.join().unwrap() > 0);
  heap.lock().check_integrity().unwrap();
}
